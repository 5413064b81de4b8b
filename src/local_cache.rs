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

//! Content-addressed store of cache entries: per-entry locking, stats, and
//! size-bounded eviction (component H). Layout follows `spec.md` §3:
//!
//! ```text
//! <root>/c/<hash[0..2]>/<hash[2..32]>/.entry
//! <root>/c/<hash[0..2]>/<hash[2..32]>/<file_id>...
//! <root>/c/<hash[0..2]>/<hash[2..32]>.lock   (ephemeral)
//! <root>/c/<hash[0..2]>/stats.json
//! <root>/c/<hash[0..2]>/stats.json.lock      (ephemeral)
//! ```

use std::path::{Path, PathBuf};

use log::{debug, error};
use rand::Rng as _;

use crate::cache_entry::{CacheEntry, CompressionMode, ExpectedFile};
use crate::cache_stats::{self, Stats};
use crate::compression;
use crate::errors::*;
use crate::fs_util;
use crate::hasher::Hash;
use crate::lock::FileLock;

/// Eviction fires probabilistically from `add` only, about one call in a
/// hundred.
const HOUSEKEEPING_PROBABILITY: f64 = 0.01;

pub struct LocalCache {
    root: PathBuf,
    remote_locks: bool,
    max_cache_size: Option<u64>,
}

impl LocalCache {
    pub fn new(root: PathBuf, remote_locks: bool) -> Self {
        LocalCache { root, remote_locks, max_cache_size: None }
    }

    fn entries_root(&self) -> PathBuf {
        self.root.join("c")
    }

    fn prefix_dir(&self, hash: &Hash) -> PathBuf {
        self.entries_root().join(hash.prefix())
    }

    fn entry_dir(&self, hash: &Hash) -> PathBuf {
        self.prefix_dir(hash).join(hash.leaf())
    }

    fn entry_lock_path(&self, hash: &Hash) -> PathBuf {
        self.prefix_dir(hash).join(format!("{}.lock", hash.leaf()))
    }

    fn entry_file(&self, hash: &Hash) -> PathBuf {
        self.entry_dir(hash).join(".entry")
    }

    fn stats_path(&self, hash: &Hash) -> PathBuf {
        self.prefix_dir(hash).join("stats.json")
    }

    fn stats_lock_path(&self, hash: &Hash) -> PathBuf {
        self.prefix_dir(hash).join("stats.json.lock")
    }

    fn acquire_entry_lock(&self, hash: &Hash) -> FileLock {
        FileLock::acquire(&self.entry_lock_path(hash), self.remote_locks)
    }

    /// Look up `hash`. On a miss, bumps the local-miss counter and returns
    /// an empty, invalid entry with no lock held. On a hit, reads and
    /// deserializes `.entry`, bumps local-hit, and returns the entry plus
    /// the still-held lock -- the caller materializes artifacts while
    /// holding it.
    pub fn lookup(&self, hash: &Hash) -> (CacheEntry, Option<FileLock>) {
        let lock = self.acquire_entry_lock(hash);
        if !lock.has_lock() {
            debug!("lookup({}): failed to acquire entry lock, treating as miss", hash);
            self.update_stats(hash, Stats::local_miss());
            return (CacheEntry::empty(), None);
        }

        let entry_path = self.entry_file(hash);
        if !entry_path.exists() {
            self.update_stats(hash, Stats::local_miss());
            return (CacheEntry::empty(), None);
        }

        let result = std::fs::read(&entry_path)
            .map_err(Error::from)
            .and_then(|bytes| CacheEntry::deserialize(&bytes));

        match log_miss(&format!("lookup({})", hash), result) {
            Some(entry) => {
                self.update_stats(hash, Stats::local_hit());
                (entry, Some(lock))
            }
            None => {
                self.update_stats(hash, Stats::local_miss());
                (CacheEntry::empty(), None)
            }
        }
    }

    /// Materialize artifacts from a local entry into `expected_files`'
    /// paths, using the held `lock` for the duration.
    pub fn materialize(
        &self,
        hash: &Hash,
        entry: &CacheEntry,
        expected_files: &[ExpectedFile],
        allow_hard_links: bool,
        _lock: &FileLock,
    ) -> Result<()> {
        for file in expected_files {
            if !entry.file_ids.contains(&file.file_id) {
                if file.required {
                    bail!(ErrorKind::InvalidStoreLayout(format!(
                        "entry for {} is missing required file_id {:?}",
                        hash, file.file_id
                    )));
                }
                continue;
            }
            self.get_file(
                hash,
                &file.file_id,
                &file.path,
                entry.compression_mode == CompressionMode::All,
                allow_hard_links,
            )?;
        }
        Ok(())
    }

    /// Create the entry directory, materialize each `file_id` from its
    /// source path, and write `.entry`. The entry directory is created
    /// exclusively under the per-entry lock; once created, its contents are
    /// immutable until removal.
    pub fn add(
        &self,
        hash: &Hash,
        entry: &CacheEntry,
        expected_files: &[ExpectedFile],
        allow_hard_links: bool,
        compress_format: compression::Format,
        compress_level: Option<i32>,
    ) -> Result<()> {
        let lock = self.acquire_entry_lock(hash);
        if !lock.has_lock() {
            bail!(ErrorKind::LockTimeout(self.entry_lock_path(hash).display().to_string()));
        }

        let dir = self.entry_dir(hash);
        std::fs::create_dir_all(&dir)?;

        let sources: std::collections::HashMap<&str, &Path> = expected_files
            .iter()
            .map(|f| (f.file_id.as_str(), f.path.as_path()))
            .collect();

        for file_id in &entry.file_ids {
            let source = sources
                .get(file_id.as_str())
                .ok_or_else(|| Error::from(format!("no source path for file_id {:?}", file_id)))?;
            let target = dir.join(file_id);
            if entry.compression_mode == CompressionMode::All {
                compression::compress_file(source, &target, compress_format, compress_level)?;
            } else if allow_hard_links {
                fs_util::link_or_copy(source, &target)?;
            } else {
                fs_util::copy(source, &target)?;
            }
        }

        let bytes = entry.serialize();
        let tmp = fs_util::TempFile::new(&dir, "entry")?;
        std::fs::write(tmp.path(), &bytes)?;
        fs_util::rename(tmp.path(), &self.entry_file(hash))?;
        tmp.forget();

        drop(lock);

        if rand::thread_rng().gen_bool(HOUSEKEEPING_PROBABILITY) {
            if let Some(max_size) = self.max_cache_size {
                self.perform_housekeeping(max_size);
            }
        }
        Ok(())
    }

    /// Materialize one artifact into `target_path`, the symmetric inverse
    /// of how `add` stored it.
    pub fn get_file(
        &self,
        hash: &Hash,
        file_id: &str,
        target_path: &Path,
        is_compressed: bool,
        allow_hard_links: bool,
    ) -> Result<()> {
        let source = self.entry_dir(hash).join(file_id);
        if let Some(dir) = target_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        if is_compressed {
            compression::decompress_file(&source, target_path)
        } else if allow_hard_links {
            fs_util::link_or_copy(&source, target_path)
        } else {
            fs_util::copy(&source, target_path)
        }
    }

    pub fn update_stats(&self, hash: &Hash, delta: Stats) {
        let lock_path = self.stats_lock_path(hash);
        let lock = FileLock::acquire(&lock_path, self.remote_locks);
        if !lock.has_lock() {
            error!("update_stats({}): could not acquire stats lock, dropping update", hash);
            return;
        }
        let path = self.stats_path(hash);
        let mut stats = cache_stats::load(&path);
        stats.add(delta);
        if let Err(e) = cache_stats::save(&path, &stats) {
            error!("update_stats({}): failed to write stats.json: {}", hash, e);
        }
    }

    /// Remove every entry directory (under its lock) and every prefix
    /// `stats.json`.
    pub fn clear(&self) {
        let entries_root = self.entries_root();
        let prefixes = match std::fs::read_dir(&entries_root) {
            Ok(d) => d,
            Err(_) => return,
        };
        for prefix_entry in prefixes.flatten() {
            let prefix_path = prefix_entry.path();
            if !is_valid_prefix_name(&prefix_entry.file_name()) {
                continue;
            }
            if let Ok(leaves) = std::fs::read_dir(&prefix_path) {
                for leaf_entry in leaves.flatten() {
                    let name = leaf_entry.file_name();
                    let name_str = name.to_string_lossy();
                    if !name_str.ends_with(".lock") && is_valid_leaf_name(&name) {
                        if let Ok(hash) = Hash::from_hex(&format!(
                            "{}{}",
                            prefix_entry.file_name().to_string_lossy(),
                            name_str
                        )) {
                            let lock = self.acquire_entry_lock(&hash);
                            if lock.has_lock() {
                                let _ = std::fs::remove_dir_all(&leaf_entry.path());
                            }
                        }
                    }
                }
            }
            let _ = std::fs::remove_file(prefix_path.join("stats.json"));
        }
    }

    pub fn show_stats(&self) -> Stats {
        let mut total = Stats::default();
        if let Ok(prefixes) = std::fs::read_dir(self.entries_root()) {
            for prefix_entry in prefixes.flatten() {
                if !is_valid_prefix_name(&prefix_entry.file_name()) {
                    continue;
                }
                total.add(cache_stats::load(&prefix_entry.path().join("stats.json")));
            }
        }
        total
    }

    pub fn zero_stats(&self) {
        if let Ok(prefixes) = std::fs::read_dir(self.entries_root()) {
            for prefix_entry in prefixes.flatten() {
                let _ = std::fs::remove_file(prefix_entry.path().join("stats.json"));
            }
        }
    }

    /// The current total size of all valid entries, in bytes.
    pub fn total_size(&self) -> u64 {
        self.list_entries().iter().map(|e| e.size).sum()
    }

    /// Evict oldest-first (by access time, descending) once the
    /// accumulated size of survivors exceeds `max_cache_size`.
    pub fn perform_housekeeping(&self, max_cache_size: u64) {
        let mut entries = self.list_entries();
        // Newest access time first; ties broken by the order `list_entries`
        // produced them in (i.e. walk order), matching spec.md §4.H.
        entries.sort_by(|a, b| b.access_time.cmp(&a.access_time));

        let mut accumulated = 0u64;
        for entry in entries {
            accumulated += entry.size;
            if accumulated > max_cache_size {
                let lock = self.acquire_entry_lock(&entry.hash);
                if lock.has_lock() {
                    let _ = std::fs::remove_dir_all(&entry.dir);
                }
            }
        }
    }

    fn list_entries(&self) -> Vec<EntryInfo> {
        let mut out = Vec::new();
        let prefixes = match std::fs::read_dir(self.entries_root()) {
            Ok(d) => d,
            Err(_) => return out,
        };
        for prefix_entry in prefixes.flatten() {
            let prefix_name = prefix_entry.file_name();
            if !is_valid_prefix_name(&prefix_name) {
                continue;
            }
            let leaves = match std::fs::read_dir(prefix_entry.path()) {
                Ok(d) => d,
                Err(_) => continue,
            };
            for leaf_entry in leaves.flatten() {
                let leaf_name = leaf_entry.file_name();
                let leaf_str = leaf_name.to_string_lossy();
                if leaf_str.ends_with(".lock") || !is_valid_leaf_name(&leaf_name) {
                    continue;
                }
                let hash = match Hash::from_hex(&format!("{}{}", prefix_name.to_string_lossy(), leaf_str)) {
                    Ok(h) => h,
                    Err(_) => continue,
                };
                let dir = leaf_entry.path();
                let (size, access_time) = dir_size_and_access_time(&dir);
                out.push(EntryInfo { hash, dir, size, access_time });
            }
        }
        out
    }

    /// Convenience for callers that already know the configured cache size
    /// (set lazily so that `LocalCache` itself stays config-agnostic for
    /// unit tests that construct it directly).
    pub fn with_max_cache_size(mut self, max: u64) -> Self {
        self.max_cache_size = Some(max);
        self
    }
}

struct EntryInfo {
    hash: Hash,
    dir: PathBuf,
    size: u64,
    access_time: std::time::SystemTime,
}

fn dir_size_and_access_time(dir: &Path) -> (u64, std::time::SystemTime) {
    match fs_util::walk_directory(dir) {
        Ok(infos) => {
            let size: u64 = infos.iter().filter(|i| !i.is_dir).map(|i| i.size).sum();
            let newest = infos
                .iter()
                .map(|i| i.access_time)
                .max()
                .unwrap_or(std::time::UNIX_EPOCH);
            (size, newest)
        }
        Err(_) => (0, std::time::UNIX_EPOCH),
    }
}

fn is_valid_prefix_name(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .map(|s| s.len() == 2 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()))
        .unwrap_or(false)
}

fn is_valid_leaf_name(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .map(|s| s.len() == 30 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()))
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache_entry::CompressionMode;

    fn make_cache(root: &Path) -> LocalCache {
        LocalCache::new(root.to_path_buf(), false)
    }

    fn write_source(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn add_then_lookup_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let cache = make_cache(root.path());

        let object_src = write_source(src_dir.path(), "hello.o", b"object bytes");
        let expected = vec![ExpectedFile { file_id: "object".into(), path: object_src.clone(), required: true }];
        let entry = CacheEntry::new(vec!["object".into()], CompressionMode::None, b"out".to_vec(), b"".to_vec(), 0).unwrap();

        let hash = crate::hasher::hash_bytes(b"fingerprint");
        cache.add(&hash, &entry, &expected, false, compression::Format::Lz4, None).unwrap();

        let (looked_up, lock) = cache.lookup(&hash);
        assert!(looked_up.valid);
        assert_eq!(looked_up.std_out, b"out");
        assert!(lock.is_some());

        let target_dir = tempfile::tempdir().unwrap();
        let target = target_dir.path().join("out.o");
        cache.get_file(&hash, "object", &target, false, false).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"object bytes");
    }

    #[test]
    fn lookup_of_absent_hash_is_a_miss() {
        let root = tempfile::tempdir().unwrap();
        let cache = make_cache(root.path());
        let hash = crate::hasher::hash_bytes(b"never-added");
        let (entry, lock) = cache.lookup(&hash);
        assert!(!entry.valid);
        assert!(lock.is_none());
    }

    #[test]
    fn clear_removes_all_entries() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let cache = make_cache(root.path());
        let object_src = write_source(src_dir.path(), "a.o", b"a");
        let expected = vec![ExpectedFile { file_id: "object".into(), path: object_src, required: true }];
        let entry = CacheEntry::new(vec!["object".into()], CompressionMode::None, vec![], vec![], 0).unwrap();
        let hash = crate::hasher::hash_bytes(b"clear-me");
        cache.add(&hash, &entry, &expected, false, compression::Format::Lz4, None).unwrap();

        cache.clear();
        let (looked_up, _) = cache.lookup(&hash);
        assert!(!looked_up.valid);
    }

    #[test]
    fn stats_accumulate_across_lookups() {
        let root = tempfile::tempdir().unwrap();
        let cache = make_cache(root.path());
        let hash = crate::hasher::hash_bytes(b"stats");
        let _ = cache.lookup(&hash);
        let _ = cache.lookup(&hash);
        let stats = cache.show_stats();
        assert_eq!(stats.local_misses, 2);
    }

    #[test]
    fn zero_stats_resets_counters() {
        let root = tempfile::tempdir().unwrap();
        let cache = make_cache(root.path());
        let hash = crate::hasher::hash_bytes(b"stats2");
        let _ = cache.lookup(&hash);
        cache.zero_stats();
        assert_eq!(cache.show_stats(), Stats::default());
    }

    #[test]
    fn housekeeping_keeps_newest_entries_under_budget() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let cache = make_cache(root.path());

        let mut hashes = Vec::new();
        for i in 0..3 {
            let src = write_source(src_dir.path(), &format!("f{}.o", i), &vec![b'x'; 50]);
            let expected = vec![ExpectedFile { file_id: "object".into(), path: src, required: true }];
            let entry = CacheEntry::new(vec!["object".into()], CompressionMode::None, vec![], vec![], 0).unwrap();
            let hash = crate::hasher::hash_bytes(format!("entry-{}", i).as_bytes());
            cache.add(&hash, &entry, &expected, false, compression::Format::Lz4, None).unwrap();
            hashes.push(hash);
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        // Budget smaller than the combined size of all three ~50-byte
        // entries but large enough for the newest couple.
        cache.perform_housekeeping(90);

        let (oldest, _) = cache.lookup(&hashes[0]);
        assert!(!oldest.valid);
        let (newest, _) = cache.lookup(&hashes[2]);
        assert!(newest.valid);
    }
}
