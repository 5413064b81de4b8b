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

//! Orchestrates the local and remote tiers into one lookup/store API
//! (component J). Lookup tries local first, then remote; a remote hit is
//! *not* promoted into the local tier (`spec.md` §4.J) -- the next
//! invocation that misses locally pays the remote round-trip again, which
//! keeps the local store strictly a product of this host's own builds.

use std::path::Path;

use log::debug;

use crate::cache_entry::{CacheEntry, CompressionMode, ExpectedFile};
use crate::config::Config;
use crate::errors::*;
use crate::hasher::Hash;
use crate::local_cache::LocalCache;
use crate::remote::RemoteCache;

pub struct Engine {
    local: LocalCache,
    remote: Option<Box<dyn RemoteCache>>,
    config: &'static Config,
}

pub enum Lookup {
    Miss,
    Hit,
}

impl Engine {
    pub fn new(config: &'static Config) -> Self {
        let local = LocalCache::new(config.dir.clone(), config.remote_locks)
            .with_max_cache_size(config.max_cache_size);
        let remote = crate::remote::connect(&config.remote);
        Engine { local, remote, config }
    }

    /// Look up `hash` and, on a hit, materialize `expected_files` and
    /// return the entry's captured stdout/stderr/return code. `allow_hard_links`
    /// is computed by the caller from the wrapper's capability set, config,
    /// and the entry's own compression mode (`spec.md` §4.K).
    pub fn lookup(&self, hash: &Hash, expected_files: &[ExpectedFile], allow_hard_links: bool) -> Lookup {
        let (entry, lock) = self.local.lookup(hash);
        if entry.valid {
            if let Some(lock) = &lock {
                if let Some(found) = log_bypass(
                    "materialize local hit",
                    self.local.materialize(hash, &entry, expected_files, allow_hard_links, lock),
                ) {
                    let _ = found;
                    return Lookup::Hit;
                }
            }
        }
        drop(lock);

        if let Some(remote) = &self.remote {
            if remote.is_connected() {
                match log_miss("remote lookup", remote.lookup(hash)) {
                    Some(Some(remote_entry)) => {
                        if self
                            .materialize_from_remote(remote.as_ref(), hash, &remote_entry, expected_files)
                            .is_ok()
                        {
                            return Lookup::Hit;
                        }
                    }
                    _ => {}
                }
            }
        }
        Lookup::Miss
    }

    fn materialize_from_remote(
        &self,
        remote: &dyn RemoteCache,
        hash: &Hash,
        entry: &CacheEntry,
        expected_files: &[ExpectedFile],
    ) -> Result<()> {
        for file in expected_files {
            if !entry.file_ids.contains(&file.file_id) {
                if file.required {
                    bail!(ErrorKind::InvalidStoreLayout(format!(
                        "remote entry for {} is missing required file_id {:?}",
                        hash, file.file_id
                    )));
                }
                continue;
            }
            let data = remote
                .get_file(hash, &file.file_id)?
                .ok_or_else(|| Error::from(ErrorKind::RemoteProvider(format!("missing object for {:?}", file.file_id))))?;
            if let Some(dir) = file.path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            // Remote entries are always compressed (`spec.md` §4.I).
            let tmp = crate::fs_util::TempFile::new(file.path.parent().unwrap_or_else(|| Path::new(".")), "remote")?;
            std::fs::write(tmp.path(), &data)?;
            crate::compression::decompress_file(tmp.path(), &file.path)?;
            tmp.forget();
        }
        Ok(())
    }

    /// Store a fresh result: always locally; also remotely if connected,
    /// with compression forced on regardless of local policy. A tier whose
    /// `max_*_entry_size` ceiling is nonzero and exceeded by this entry's
    /// files is skipped entirely for that tier (`spec.md` §4.M).
    pub fn add(&self, hash: &Hash, entry: &CacheEntry, expected_files: &[ExpectedFile], allow_hard_links: bool) {
        let total_size = entry_size(expected_files);

        if !self.config.read_only {
            if within_ceiling(total_size, self.config.max_local_entry_size) {
                log_bypass(
                    "add to local cache",
                    self.local.add(
                        hash,
                        entry,
                        expected_files,
                        allow_hard_links,
                        self.config.compress_format,
                        self.config.compress_level,
                    ),
                );
            } else {
                debug!(
                    "entry for {} ({} bytes) exceeds max_local_entry_size ({} bytes), not caching locally",
                    hash, total_size, self.config.max_local_entry_size
                );
            }
        }

        if self.config.read_only_remote {
            return;
        }
        if let Some(remote) = &self.remote {
            if remote.is_connected() {
                if within_ceiling(total_size, self.config.max_remote_entry_size) {
                    self.add_to_remote(remote.as_ref(), hash, entry, expected_files);
                } else {
                    debug!(
                        "entry for {} ({} bytes) exceeds max_remote_entry_size ({} bytes), not caching remotely",
                        hash, total_size, self.config.max_remote_entry_size
                    );
                }
            }
        }
    }

    fn add_to_remote(&self, remote: &dyn RemoteCache, hash: &Hash, entry: &CacheEntry, expected_files: &[ExpectedFile]) {
        let remote_entry = CacheEntry {
            compression_mode: CompressionMode::All,
            ..entry.clone()
        };
        for file in expected_files {
            if !entry.file_ids.contains(&file.file_id) {
                continue;
            }
            let contents = match log_bypass("read build output for remote upload", std::fs::read(&file.path).map_err(Error::from))
            {
                Some(c) => c,
                None => continue,
            };
            let compressed = match log_bypass(
                "compress for remote",
                crate::compression::compress(&contents, self.config.compress_format, self.config.compress_level),
            ) {
                Some(c) => c,
                None => continue,
            };
            log_bypass("upload remote file", remote.put_file(hash, &file.file_id, &compressed));
        }
        log_bypass("upload remote entry", remote.add_entry(hash, &remote_entry));
    }
}

/// Sum of the on-disk sizes of `expected_files` that are actually present
/// (a missing optional file contributes nothing).
fn entry_size(expected_files: &[ExpectedFile]) -> u64 {
    expected_files
        .iter()
        .filter_map(|f| std::fs::metadata(&f.path).ok())
        .map(|m| m.len())
        .sum()
}

/// `0` means "no ceiling" (`spec.md` §4.M default).
fn within_ceiling(size: u64, ceiling: u64) -> bool {
    ceiling == 0 || size <= ceiling
}
