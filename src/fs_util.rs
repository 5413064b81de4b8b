// Copyright 2016 Mozilla Foundation
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Portable path/file helpers (component D).

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::*;

/// Move `from` to `to`. If `to` exists it is removed first. Not guaranteed
/// atomic across filesystems.
pub fn rename(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        remove_any(to)?;
    }
    fs::rename(from, to).chain_err(|| format!("failed to move {:?} to {:?}", from, to))
}

fn remove_any(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Copy `from` to `to` via a sibling temp file of `to`, then rename. On any
/// failure the temp file is removed by its scoped handle.
pub fn copy(from: &Path, to: &Path) -> Result<()> {
    let dir = to.parent().unwrap_or_else(|| Path::new("."));
    let tmp = TempFile::new(dir, "copy")?;
    fs::copy(from, tmp.path()).chain_err(|| format!("failed to copy {:?}", from))?;
    rename(tmp.path(), to)?;
    tmp.forget();
    Ok(())
}

/// Remove `to` if present, attempt a hard link from `from`; on failure fall
/// back to `copy`. After a successful link, bump the link's modification
/// time (so two files that happen to share inode history don't look stale
/// relative to each other for access-time based eviction).
pub fn link_or_copy(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        remove_any(to)?;
    }
    match fs::hard_link(from, to) {
        Ok(()) => {
            let now = filetime::FileTime::now();
            let _ = filetime::set_file_mtime(to, now);
            Ok(())
        }
        Err(_) => copy(from, to),
    }
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    pub modify_time: std::time::SystemTime,
    pub access_time: std::time::SystemTime,
    pub size: u64,
    pub is_dir: bool,
}

/// Walk `path` recursively. Directory entries are aggregated (`size` and the
/// times are recursive) and listed *after* the files they contain.
pub fn walk_directory(path: &Path) -> Result<Vec<FileInfo>> {
    let mut out = Vec::new();
    walk_directory_inner(path, &mut out)?;
    Ok(out)
}

fn walk_directory_inner(path: &Path, out: &mut Vec<FileInfo>) -> Result<(u64, std::time::SystemTime, std::time::SystemTime)> {
    let mut total_size = 0u64;
    let mut newest_mtime = std::time::UNIX_EPOCH;
    let mut newest_atime = std::time::UNIX_EPOCH;

    let mut entries: Vec<_> = fs::read_dir(path)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let entry_path = entry.path();
        let meta = entry.metadata()?;
        if meta.is_dir() {
            let (size, mtime, atime) = walk_directory_inner(&entry_path, out)?;
            total_size += size;
            newest_mtime = newest_mtime.max(mtime);
            newest_atime = newest_atime.max(atime);
            out.push(FileInfo {
                path: entry_path,
                modify_time: mtime,
                access_time: atime,
                size,
                is_dir: true,
            });
        } else {
            let mtime = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            let atime = meta.accessed().unwrap_or(mtime);
            total_size += meta.len();
            newest_mtime = newest_mtime.max(mtime);
            newest_atime = newest_atime.max(atime);
            out.push(FileInfo {
                path: entry_path,
                modify_time: mtime,
                access_time: atime,
                size: meta.len(),
                is_dir: false,
            });
        }
    }

    Ok((total_size, newest_mtime, newest_atime))
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A scoped temp file/directory handle: generates a unique name combining
/// the process identity and a monotonically increasing counter, and removes
/// the named file *or* directory on drop (if it still exists).
pub struct TempFile {
    path: PathBuf,
    forgotten: bool,
}

impl TempFile {
    pub fn new(dir: &Path, ext: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!(".bc-{}-{}-{}.{}", std::process::id(), n, uuid::Uuid::new_v4(), ext);
        Ok(TempFile { path: dir.join(name), forgotten: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the cleanup: the caller has taken ownership of the path
    /// (typically just renamed it into its final location).
    pub fn forget(mut self) {
        self.forgotten = true;
        drop(self);
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.forgotten {
            return;
        }
        if let Ok(meta) = fs::symlink_metadata(&self.path) {
            if meta.is_dir() {
                let _ = fs::remove_dir_all(&self.path);
            } else {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}

/// Resolve `name` against the process `PATH`, following symlinks, skipping
/// any resolved executable whose file stem matches `exclude` (used to
/// prevent the wrapper from finding itself via a self-named symlink).
pub fn find_executable(name: &OsStr, exclude: &str) -> Result<PathBuf> {
    for candidate in which::which_all(name)
        .map_err(|e| Error::from(format!("could not resolve {:?}: {}", name, e)))?
    {
        let resolved = fs::canonicalize(&candidate).unwrap_or(candidate);
        let stem_matches_exclude = resolved
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case(exclude))
            .unwrap_or(false);
        if !stem_matches_exclude {
            return Ok(resolved);
        }
    }
    bail!("no executable for {:?} found that is not {}", name, exclude)
}

/// Pretty-print a byte count the way `--show-stats`/`--show-config` does
/// (e.g. `"5.0 GiB"`).
pub fn human_readable_size(bytes: u64) -> String {
    use number_prefix::NumberPrefix;
    match NumberPrefix::binary(bytes as f64) {
        NumberPrefix::Standalone(b) => format!("{} B", b),
        NumberPrefix::Prefixed(prefix, n) => format!("{:.1} {}B", n, prefix),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn copy_creates_identical_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"hello").unwrap();
        let dst = dir.path().join("dst.txt");
        copy(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello");
    }

    #[test]
    fn link_or_copy_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"v1").unwrap();
        let dst = dir.path().join("dst.txt");
        std::fs::write(&dst, b"stale").unwrap();
        link_or_copy(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"v1");
    }

    #[test]
    fn walk_directory_lists_files_before_their_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut f = fs::File::create(dir.path().join("sub").join("a.txt")).unwrap();
        f.write_all(b"hi").unwrap();
        let infos = walk_directory(dir.path()).unwrap();
        let file_idx = infos.iter().position(|i| !i.is_dir).unwrap();
        let dir_idx = infos.iter().position(|i| i.is_dir).unwrap();
        assert!(file_idx < dir_idx);
    }

    #[test]
    fn temp_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path;
        {
            let tmp = TempFile::new(dir.path(), "tmp").unwrap();
            std::fs::write(tmp.path(), b"x").unwrap();
            path = tmp.path().to_path_buf();
        }
        assert!(!path.exists());
    }

    #[test]
    fn temp_file_forget_keeps_it() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = TempFile::new(dir.path(), "tmp").unwrap();
        std::fs::write(tmp.path(), b"x").unwrap();
        let path = tmp.path().to_path_buf();
        tmp.forget();
        assert!(path.exists());
    }
}
