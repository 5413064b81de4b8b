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

//! In-memory records and serialization for a cache entry and the direct-mode
//! manifest (component G). See `spec.md` §4.G for the wire formats.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::*;
use crate::serializer::{Reader, Writer};

pub const ENTRY_FORMAT_VERSION: i32 = 3;
pub const MANIFEST_FORMAT_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    None,
    All,
}

impl CompressionMode {
    fn to_i32(self) -> i32 {
        match self {
            CompressionMode::None => 0,
            CompressionMode::All => 1,
        }
    }

    fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(CompressionMode::None),
            1 => Ok(CompressionMode::All),
            other => bail!(ErrorKind::Corrupt(format!("unknown compression_mode {}", other))),
        }
    }
}

/// A (path, required) pair describing one output the current invocation
/// expects. Used both to place retrieved artifacts and to harvest produced
/// artifacts on a miss.
#[derive(Debug, Clone)]
pub struct ExpectedFile {
    pub file_id: String,
    pub path: PathBuf,
    pub required: bool,
}

/// The unit stored per fingerprint.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub file_ids: Vec<String>,
    pub compression_mode: CompressionMode,
    pub std_out: Vec<u8>,
    pub std_err: Vec<u8>,
    pub return_code: i32,
    /// Distinguishes "looked up and missing" from "looked up and found".
    pub valid: bool,
}

impl CacheEntry {
    pub fn empty() -> Self {
        CacheEntry {
            file_ids: Vec::new(),
            compression_mode: CompressionMode::None,
            std_out: Vec::new(),
            std_err: Vec::new(),
            return_code: 0,
            valid: false,
        }
    }

    pub fn new(
        file_ids: Vec<String>,
        compression_mode: CompressionMode,
        std_out: Vec<u8>,
        std_err: Vec<u8>,
        return_code: i32,
    ) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for id in &file_ids {
            if !seen.insert(id.clone()) {
                bail!(ErrorKind::Corrupt(format!("duplicate file_id {:?}", id)));
            }
        }
        Ok(CacheEntry {
            file_ids,
            compression_mode,
            std_out,
            std_err,
            return_code,
            valid: true,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_i32(ENTRY_FORMAT_VERSION);
        w.write_i32(self.compression_mode.to_i32());
        w.write_string_seq(&self.file_ids);
        w.write_bytes_as_string(&self.std_out);
        w.write_bytes_as_string(&self.std_err);
        w.write_i32(self.return_code);
        w.into_bytes()
    }

    /// Accepts any writer version `>= 1`. Version 2 encoded `file_ids` as a
    /// `map<string,string>` (file-id to absolute source path) -- the reader
    /// downgrades it to the vector of keys. Version 1 lacks
    /// `compression_mode` (treated as `None`).
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let version = r.read_i32()?;
        if version < 1 {
            bail!(ErrorKind::UnsupportedVersion(version, ENTRY_FORMAT_VERSION));
        }
        if version > ENTRY_FORMAT_VERSION {
            bail!(ErrorKind::UnsupportedVersion(version, ENTRY_FORMAT_VERSION));
        }

        let compression_mode = if version >= 3 {
            CompressionMode::from_i32(r.read_i32()?)?
        } else {
            CompressionMode::None
        };

        let file_ids = if version == 2 {
            r.read_string_map()?.into_iter().map(|(k, _v)| k).collect()
        } else {
            r.read_string_seq()?
        };

        let std_out = r.read_bytes_as_string()?;
        let std_err = r.read_bytes_as_string()?;
        let return_code = r.read_i32()?;

        CacheEntry::new(file_ids, compression_mode, std_out, std_err, return_code)
    }
}

/// Maps a preprocessor-free fingerprint to a preprocessor-mode fingerprint,
/// validated by re-hashing the listed implicit inputs.
#[derive(Debug, Clone)]
pub struct DirectModeManifest {
    pub hash: crate::hasher::Hash,
    pub files_with_hashes: BTreeMap<String, crate::hasher::Hash>,
}

impl DirectModeManifest {
    pub fn new(hash: crate::hasher::Hash, files_with_hashes: BTreeMap<String, crate::hasher::Hash>) -> Self {
        DirectModeManifest { hash, files_with_hashes }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_i32(MANIFEST_FORMAT_VERSION);
        w.write_string(&self.hash.to_hex());
        let pairs: Vec<(String, String)> = self
            .files_with_hashes
            .iter()
            .map(|(path, h)| (path.clone(), h.to_hex()))
            .collect();
        w.write_string_map(&pairs);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let version = r.read_i32()?;
        if version != MANIFEST_FORMAT_VERSION {
            bail!(ErrorKind::UnsupportedVersion(version, MANIFEST_FORMAT_VERSION));
        }
        let hash = crate::hasher::Hash::from_hex(&r.read_string()?)?;
        let mut files_with_hashes = BTreeMap::new();
        for (path, hex) in r.read_string_map()? {
            files_with_hashes.insert(path, crate::hasher::Hash::from_hex(&hex)?);
        }
        Ok(DirectModeManifest { hash, files_with_hashes })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hasher::hash_bytes;

    #[test]
    fn entry_round_trips_current_version() {
        let entry = CacheEntry::new(
            vec!["object".to_string(), "dep".to_string()],
            CompressionMode::All,
            b"out".to_vec(),
            b"err".to_vec(),
            0,
        )
        .unwrap();
        let bytes = entry.serialize();
        let back = CacheEntry::deserialize(&bytes).unwrap();
        assert_eq!(back.file_ids, entry.file_ids);
        assert_eq!(back.compression_mode, entry.compression_mode);
        assert_eq!(back.std_out, entry.std_out);
        assert_eq!(back.return_code, entry.return_code);
    }

    #[test]
    fn rejects_duplicate_file_ids() {
        let err = CacheEntry::new(
            vec!["object".to_string(), "object".to_string()],
            CompressionMode::None,
            vec![],
            vec![],
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn version_1_has_no_compression_mode_field() {
        let mut w = Writer::new();
        w.write_i32(1);
        w.write_string_seq(&["object"]);
        w.write_bytes_as_string(b"out");
        w.write_bytes_as_string(b"err");
        w.write_i32(0);
        let entry = CacheEntry::deserialize(&w.into_bytes()).unwrap();
        assert_eq!(entry.compression_mode, CompressionMode::None);
        assert_eq!(entry.file_ids, vec!["object".to_string()]);
    }

    #[test]
    fn version_2_downgrades_map_to_file_id_vector() {
        let mut w = Writer::new();
        w.write_i32(2);
        w.write_string_map(&[("object".into(), "/abs/path/to/obj".into())]);
        w.write_bytes_as_string(b"out");
        w.write_bytes_as_string(b"err");
        w.write_i32(0);
        let entry = CacheEntry::deserialize(&w.into_bytes()).unwrap();
        assert_eq!(entry.file_ids, vec!["object".to_string()]);
    }

    #[test]
    fn newer_than_supported_version_is_rejected() {
        let mut w = Writer::new();
        w.write_i32(ENTRY_FORMAT_VERSION + 1);
        let err = CacheEntry::deserialize(&w.into_bytes()).unwrap_err();
        assert!(err.to_string().contains("unsupported format version"));
    }

    #[test]
    fn manifest_round_trips() {
        let mut files = BTreeMap::new();
        files.insert("foo.h".to_string(), hash_bytes(b"foo.h contents"));
        let manifest = DirectModeManifest::new(hash_bytes(b"preproc-hash"), files);
        let bytes = manifest.serialize();
        let back = DirectModeManifest::deserialize(&bytes).unwrap();
        assert_eq!(back.hash, manifest.hash);
        assert_eq!(back.files_with_hashes, manifest.files_with_hashes);
    }
}
