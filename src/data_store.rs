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

//! Filesystem key-value store per named namespace, with per-item TTL and
//! probabilistic self-cleaning (component F). Used by the direct-mode
//! manifest index (component G).

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng as _;

use crate::errors::*;
use crate::fs_util;

/// Housekeeping fires probabilistically on construction, about one call in
/// a thousand.
const HOUSEKEEPING_PROBABILITY: f64 = 0.001;

pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    pub fn new(root: PathBuf) -> Self {
        let store = DataStore { root };
        if rand::thread_rng().gen_bool(HOUSEKEEPING_PROBABILITY) {
            store.perform_housekeeping();
        }
        store
    }

    pub fn store(&self, key: &str, value: &[u8], timeout_seconds: u64) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let expiry = now_secs().saturating_add(timeout_seconds);
        let mut buf = Vec::with_capacity(8 + value.len());
        buf.write_u64::<LittleEndian>(expiry).unwrap();
        buf.extend_from_slice(value);

        let path = self.path_for(key);
        let tmp = fs_util::TempFile::new(&self.root, "item")?;
        std::fs::write(tmp.path(), &buf)?;
        fs_util::rename(tmp.path(), &path)?;
        tmp.forget();
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        let contents = std::fs::read(&path).ok()?;
        if contents.len() < 8 {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        let mut cursor = &contents[0..8];
        let expiry = cursor.read_u64::<LittleEndian>().unwrap();
        if expiry < now_secs() {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        Some(contents[8..].to_vec())
    }

    pub fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.path_for(key));
    }

    pub fn clear(&self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(encode_key(key))
    }

    /// Decode every key, read each value solely for its self-deleting side
    /// effect, and remove items whose keys cannot be decoded.
    fn perform_housekeeping(&self) {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            match decode_key(name) {
                Ok(key) => {
                    let _ = self.get(&key);
                }
                Err(_) => {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

/// Characters in `[0-9 a-z _ -]` pass literally; any other byte is encoded
/// as `.HH` (two lower-case hex chars).
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_digit() || b.is_ascii_lowercase() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!(".{:02x}", b));
        }
    }
    out
}

fn decode_key(encoded: &str) -> Result<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'.' {
            if i + 2 >= bytes.len() {
                bail!(ErrorKind::Corrupt(format!("truncated escape in key {:?}", encoded)));
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .map_err(|e| Error::from(ErrorKind::Corrupt(e.to_string())))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::from(ErrorKind::Corrupt(format!("bad escape in key {:?}", encoded))))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| Error::from(ErrorKind::Corrupt(e.to_string())))
}

#[cfg(test)]
mod test {
    use super::*;

    fn store(dir: &Path) -> DataStore {
        DataStore { root: dir.to_path_buf() }
    }

    #[test]
    fn store_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.store("foo/bar.o", b"contents", 3600).unwrap();
        assert_eq!(s.get("foo/bar.o").unwrap(), b"contents");
    }

    #[test]
    fn expired_item_reads_as_missing_and_self_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.store("k", b"v", 0).unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert!(s.get("k").is_none());
        assert!(!s.path_for("k").exists());
    }

    #[test]
    fn remove_deletes_item() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.store("k", b"v", 3600).unwrap();
        s.remove("k");
        assert!(s.get("k").is_none());
    }

    #[test]
    fn key_encoding_is_reversible_for_special_chars() {
        let key = "weird/key with spaces:and.dots";
        let encoded = encode_key(key);
        assert!(encoded.bytes().all(|b| b.is_ascii_digit()
            || b.is_ascii_lowercase()
            || b == b'_'
            || b == b'-'
            || b == b'.'
            || b.is_ascii_hexdigit()));
        assert_eq!(decode_key(&encoded).unwrap(), key);
    }

    #[test]
    fn clear_removes_all_items() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.store("k", b"v", 3600).unwrap();
        s.clear();
        assert!(s.get("k").is_none());
    }
}
