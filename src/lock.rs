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

//! Scoped, process-exclusive lock on a file path, with stale-owner recovery
//! (component E).
//!
//! Two strategies, matching `spec.md` §4.E:
//!
//! - *Local*: a kernel-level named mutex scoped to the whole host (backed by
//!   `fslock`'s `flock`/`LockFileEx` wrapper). Fast, but does not survive a
//!   networked filesystem.
//! - *Remote-safe*: exclusive creation of a lock file whose content is the
//!   owner's PID (POSIX) or an exclusive, delete-on-close handle (Windows).
//!   Works across hosts sharing a filesystem, including network shares.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::errors::*;

const TOTAL_WAIT_BUDGET: Duration = Duration::from_secs(10);
const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(250);
const STALE_CHECK_INTERVAL: Duration = Duration::from_millis(100);
const STALE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

enum Held {
    /// Kernel-level mutex, released implicitly on drop.
    Local(fslock::LockFile),
    /// Lock-file path whose content names the owning process; unlinked on
    /// drop.
    RemoteSafe(PathBuf, WindowsHandle),
    /// Construction failed within budget: a "no-lock" placeholder. Callers
    /// must check `has_lock`.
    None,
}

/// On non-Windows this is a zero-sized marker; on Windows it owns the
/// exclusive, delete-on-close file handle so the OS removes the lock file
/// for us even if the process is killed.
#[cfg(not(windows))]
struct WindowsHandle;

#[cfg(windows)]
struct WindowsHandle(Option<std::fs::File>);

pub struct FileLock {
    path: PathBuf,
    held: Held,
}

impl FileLock {
    /// Acquire an exclusive lock associated with `path`. `remote_safe`
    /// selects the cross-host-capable strategy.
    pub fn acquire(path: &Path, remote_safe: bool) -> FileLock {
        let deadline = Instant::now() + TOTAL_WAIT_BUDGET;
        let held = if remote_safe {
            Self::acquire_remote_safe(path, deadline)
        } else {
            Self::acquire_local(path, deadline)
        };
        FileLock { path: path.to_path_buf(), held }
    }

    pub fn has_lock(&self) -> bool {
        !matches!(self.held, Held::None)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_local(path: &Path, deadline: Instant) -> Held {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match fslock::LockFile::open(path) {
                Ok(mut lock) => match lock.try_lock() {
                    Ok(true) => return Held::Local(lock),
                    Ok(false) | Err(_) => {}
                },
                Err(_) => {}
            }
            if Instant::now() >= deadline {
                return Held::None;
            }
            std::thread::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    fn acquire_remote_safe(path: &Path, deadline: Instant) -> Held {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let mut backoff = INITIAL_BACKOFF;
        let mut last_stale_check = Instant::now();
        loop {
            match create_exclusive(path) {
                Ok(handle) => return Held::RemoteSafe(path.to_path_buf(), handle),
                Err(_) => {
                    if last_stale_check.elapsed() >= STALE_CHECK_INTERVAL {
                        last_stale_check = Instant::now();
                        break_if_stale(path);
                    }
                }
            }
            if Instant::now() >= deadline {
                return Held::None;
            }
            std::thread::sleep(backoff.min(deadline.saturating_duration_since(Instant::now())));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match &mut self.held {
            Held::Local(_lock) => {
                // fslock::LockFile releases the flock on drop.
                let _ = std::fs::remove_file(&self.path);
            }
            Held::RemoteSafe(path, _handle) => {
                let _ = std::fs::remove_file(path);
            }
            Held::None => {}
        }
    }
}

#[cfg(unix)]
fn create_exclusive(path: &Path) -> std::io::Result<WindowsHandle> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)?;
    let _ = write!(f, "{}", std::process::id());
    Ok(WindowsHandle)
}

#[cfg(windows)]
fn create_exclusive(path: &Path) -> std::io::Result<WindowsHandle> {
    // share-mode-none + delete-on-close semantics: nobody else can even
    // open the file while we hold it, and it vanishes the moment our
    // handle closes (including on abnormal process exit).
    use std::os::windows::fs::OpenOptionsExt;
    const FILE_FLAG_DELETE_ON_CLOSE: u32 = 0x0400_0000;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .share_mode(0)
        .custom_flags(FILE_FLAG_DELETE_ON_CLOSE)
        .open(path)?;
    let _ = write!(f, "{}", std::process::id());
    Ok(WindowsHandle(Some(f)))
}

/// Once per ~100ms while waiting, check whether the existing lock file
/// names a dead owner or is simply too old, and unlink it if so. Parse
/// failures are non-fatal -- keep waiting.
fn break_if_stale(path: &Path) {
    let mut contents = String::new();
    let opened = std::fs::File::open(path).and_then(|mut f| f.read_to_string(&mut contents));
    if opened.is_err() {
        return;
    }

    let too_old = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|mtime| SystemTime::now().duration_since(mtime).unwrap_or_default() > STALE_AGE)
        .unwrap_or(false);

    let owner_dead = contents
        .trim()
        .parse::<i32>()
        .map(|pid| !process_is_alive(pid))
        .unwrap_or(false);

    if too_old || owner_dead {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
    // kill(pid, 0) checks for existence/permission without sending a signal.
    unsafe { libc::kill(pid, 0) == 0 || *libc::__errno_location() == libc::EPERM }
}

#[cfg(windows)]
fn process_is_alive(pid: i32) -> bool {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::OpenProcess;
    use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid as u32);
        if handle.is_null() {
            false
        } else {
            CloseHandle(handle);
            true
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn remote_safe_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.lock");
        {
            let lock = FileLock::acquire(&path, true);
            assert!(lock.has_lock());
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn remote_safe_second_acquire_blocks_until_first_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.lock");
        let first = FileLock::acquire(&path, true);
        assert!(first.has_lock());
        drop(first);
        let second = FileLock::acquire(&path, true);
        assert!(second.has_lock());
    }

    #[test]
    fn stale_lock_with_dead_owner_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.lock");
        // A PID essentially guaranteed not to be alive.
        std::fs::write(&path, "999999").unwrap();
        let lock = FileLock::acquire(&path, true);
        assert!(lock.has_lock());
    }

    #[test]
    fn stale_lock_by_age_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.lock");
        std::fs::write(&path, std::process::id().to_string()).unwrap();
        let old = filetime::FileTime::from_unix_time(1, 0);
        filetime::set_file_mtime(&path, old).unwrap();
        let lock = FileLock::acquire(&path, true);
        assert!(lock.has_lock());
    }
}
