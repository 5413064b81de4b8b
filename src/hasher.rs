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

//! Streaming 128-bit digest over heterogeneous inputs (component A).
//!
//! The digest is xxh3-128: fast, non-cryptographic, stable across platforms
//! for a given byte stream. Collision-resistance is a practical assumption,
//! not a security property (see `spec.md` Non-goals).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use twox_hash::xxh3::Hash128;

use crate::errors::*;

/// A separator marker injected between logically distinct fields so that
/// `update("hell") + sep + update("oworld")` differs from
/// `update("hello") + sep + update("world")`.
const SEPARATOR: &[u8] = b"\x1e\xffbuildcache-sep\xff\x1e";

/// 128-bit opaque digest. Canonical form is a 32-character lowercase hex
/// string: the first two hex characters are a prefix directory, the
/// remaining thirty name a leaf directory under it (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash {
    bytes: [u8; 16],
}

impl Hash {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Hash { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// The two-character prefix directory name.
    pub fn prefix(&self) -> String {
        self.to_hex()[0..2].to_owned()
    }

    /// The thirty-character leaf directory name.
    pub fn leaf(&self) -> String {
        self.to_hex()[2..32].to_owned()
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(32);
        for b in &self.bytes {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    pub fn from_hex(s: &str) -> Result<Hash> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!(ErrorKind::Corrupt(format!("not a valid 32-char hex hash: {:?}", s)));
        }
        let mut bytes = [0u8; 16];
        for i in 0..16 {
            bytes[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|e| Error::from(ErrorKind::Corrupt(e.to_string())))?;
        }
        Ok(Hash { bytes })
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Streaming digest builder. Clone forks the accumulated state so a common
/// prefix can be committed once and the suffix varied independently.
#[derive(Clone)]
pub struct Hasher {
    inner: Hash128,
}

impl Default for Hasher {
    fn default() -> Self {
        Hasher::new()
    }
}

impl Hasher {
    pub fn new() -> Self {
        Hasher { inner: Hash128::default() }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.write(bytes);
        self
    }

    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.update(s.as_bytes())
    }

    /// Hash an ordered sequence of strings. Order matters; callers who want
    /// order-independence should sort before calling.
    pub fn update_seq<S: AsRef<str>>(&mut self, items: &[S]) -> &mut Self {
        for item in items {
            self.update_str(item.as_ref());
            self.inject_separator();
        }
        self
    }

    /// Hash an ordered map of string to string. Iterates in ascending key
    /// order so that any insertion order of the same key/value pairs yields
    /// the same digest (`spec.md` invariant 4).
    pub fn update_map(&mut self, map: &BTreeMap<String, String>) -> &mut Self {
        for (k, v) in map {
            self.update_str(k);
            self.inject_separator();
            self.update_str(v);
            self.inject_separator();
        }
        self
    }

    /// Write a fixed marker that cannot appear in ordinary field data, so
    /// that field boundaries are unambiguous.
    pub fn inject_separator(&mut self) -> &mut Self {
        self.inner.write(SEPARATOR);
        self
    }

    pub fn update_from_file(&mut self, path: &Path) -> Result<&mut Self> {
        let mut f = File::open(path)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.inner.write(&buf[..n]);
        }
        Ok(self)
    }

    /// Archive-format-aware hashing: if `path` is a UNIX `ar` archive,
    /// hashes each member's header excluding mtime/uid/gid, and each body in
    /// order (with the even-byte padding rule), so that two archives that
    /// differ only in per-member timestamps hash identically. Falls back to
    /// plain content hashing otherwise.
    pub fn update_from_file_deterministic(&mut self, path: &Path) -> Result<&mut Self> {
        let contents = std::fs::read(path)?;
        if contents.starts_with(AR_MAGIC) {
            self.hash_ar_archive(&contents)?;
        } else {
            self.inner.write(&contents);
        }
        Ok(self)
    }

    fn hash_ar_archive(&mut self, data: &[u8]) -> Result<()> {
        const HEADER_LEN: usize = 60;
        let mut offset = AR_MAGIC.len();
        while offset < data.len() {
            if offset + HEADER_LEN > data.len() {
                bail!(ErrorKind::Corrupt("truncated ar member header".into()));
            }
            let header = &data[offset..offset + HEADER_LEN];
            if &header[58..60] != b"`\n" {
                bail!(ErrorKind::Corrupt("bad ar member header magic".into()));
            }
            // Header layout (all ASCII, space padded):
            // name(16) mtime(12) uid(6) gid(6) mode(8) size(10) magic(2)
            let name = &header[0..16];
            let mode = &header[40..48];
            let size_str = std::str::from_utf8(&header[48..58])
                .map_err(|e| Error::from(ErrorKind::Corrupt(e.to_string())))?;
            let size: usize = size_str
                .trim_end()
                .parse()
                .map_err(|_| Error::from(ErrorKind::Corrupt("bad ar member size".into())))?;

            self.inner.write(name);
            self.inner.write(mode);
            self.inner.write(size_str.trim_end().as_bytes());

            let body_start = offset + HEADER_LEN;
            let body_end = body_start
                .checked_add(size)
                .ok_or_else(|| Error::from(ErrorKind::Corrupt("ar member size overflow".into())))?;
            if body_end > data.len() {
                bail!(ErrorKind::Corrupt("truncated ar member body".into()));
            }
            self.inner.write(&data[body_start..body_end]);

            // Members are padded to an even offset with a newline.
            offset = body_end + (size % 2);
        }
        Ok(())
    }

    pub fn finalize(&self) -> Hash {
        let v: u128 = self.inner.finish_128();
        Hash::from_bytes(v.to_be_bytes())
    }
}

const AR_MAGIC: &[u8] = b"!<arch>\n";

/// Convenience: hash a byte slice in a single call.
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let mut h = Hasher::new();
    h.update(bytes);
    h.finalize()
}

pub fn hash_file(path: &Path) -> io::Result<Hash> {
    let mut h = Hasher::new();
    h.update_from_file(path)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    Ok(h.finalize())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn same_input_same_digest() {
        let a = hash_bytes(b"hello world");
        let b = hash_bytes(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn different_input_different_digest() {
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn separator_disambiguates_field_boundary() {
        let mut h1 = Hasher::new();
        h1.update_str("hell");
        h1.inject_separator();
        h1.update_str("oworld");

        let mut h2 = Hasher::new();
        h2.update_str("hello");
        h2.inject_separator();
        h2.update_str("world");

        assert_ne!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn map_hash_is_order_independent() {
        let mut m1 = BTreeMap::new();
        m1.insert("a".to_string(), "1".to_string());
        m1.insert("b".to_string(), "2".to_string());

        let mut m2 = BTreeMap::new();
        m2.insert("b".to_string(), "2".to_string());
        m2.insert("a".to_string(), "1".to_string());

        let mut h1 = Hasher::new();
        h1.update_map(&m1);
        let mut h2 = Hasher::new();
        h2.update_map(&m2);

        assert_eq!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn fork_from_common_prefix_diverges() {
        let mut base = Hasher::new();
        base.update_str("common-prefix");

        let mut a = base.clone();
        a.update_str("suffix-a");
        let mut b = base.clone();
        b.update_str("suffix-b");

        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn deterministic_ar_ignores_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.ar");
        let b = dir.path().join("b.ar");
        write_test_archive(&a, 1_000_000_000);
        write_test_archive(&b, 2_000_000_000);

        let mut ha = Hasher::new();
        ha.update_from_file_deterministic(&a).unwrap();
        let mut hb = Hasher::new();
        hb.update_from_file_deterministic(&b).unwrap();
        assert_eq!(ha.finalize(), hb.finalize());

        let mut pa = Hasher::new();
        pa.update_from_file(&a).unwrap();
        let mut pb = Hasher::new();
        pb.update_from_file(&b).unwrap();
        assert_ne!(pa.finalize(), pb.finalize());
    }

    fn write_test_archive(path: &Path, mtime: u64) {
        let mut f = File::create(path).unwrap();
        f.write_all(AR_MAGIC).unwrap();
        let body = b"int main(){}";
        let header = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            "hello.o/", mtime, 0, 0, 100644, body.len()
        );
        f.write_all(header.as_bytes()).unwrap();
        f.write_all(body).unwrap();
        if body.len() % 2 == 1 {
            f.write_all(b"\n").unwrap();
        }
    }

    #[test]
    fn hash_roundtrips_through_hex() {
        let h = hash_bytes(b"roundtrip");
        let hex = h.to_hex();
        assert_eq!(Hash::from_hex(&hex).unwrap(), h);
    }
}
