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

//! Compress/decompress byte blobs and files (component B).
//!
//! Wire format of a compressed blob (`spec.md` §4.B):
//! ```text
//! offset 0, 4 bytes  little-endian format tag (0x00345a4c = LZ4, 0x4454535a = ZSTD)
//! offset 4, 4 bytes  little-endian original (uncompressed) length in bytes
//! offset 8, ...      codec-specific payload
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::*;
use crate::fs_util;

const TAG_LZ4: u32 = 0x0034_5a4c;
const TAG_ZSTD: u32 = 0x4454_535a;
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Lz4,
    Zstd,
}

impl Format {
    fn tag(self) -> u32 {
        match self {
            Format::Lz4 => TAG_LZ4,
            Format::Zstd => TAG_ZSTD,
        }
    }

    pub fn from_name(name: &str) -> Option<Format> {
        match name.to_ascii_lowercase().as_str() {
            "lz4" => Some(Format::Lz4),
            "zstd" => Some(Format::Zstd),
            _ => None,
        }
    }
}

/// Compress `data` with `format`, clamping `level` into the codec's
/// supported range (using a codec-specific default when `None`).
pub fn compress(data: &[u8], format: Format, level: Option<i32>) -> Result<Vec<u8>> {
    if data.len() > i32::MAX as usize {
        bail!("input too large for the selected codec");
    }
    let payload = match format {
        Format::Lz4 => {
            let level = level.unwrap_or(1).clamp(0, 16) as u32;
            let mut encoder = lz4::EncoderBuilder::new()
                .level(level)
                .build(Vec::new())
                .chain_err(|| "failed to initialize lz4 encoder")?;
            encoder.write_all(data).chain_err(|| "lz4 compression failed")?;
            let (buf, result) = encoder.finish();
            result.chain_err(|| "lz4 compression failed")?;
            buf
        }
        Format::Zstd => {
            let level = level.unwrap_or(3).clamp(1, 22);
            zstd::encode_all(data, level).chain_err(|| "zstd compression failed")?
        }
    };

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.write_u32::<LittleEndian>(format.tag()).unwrap();
    out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decompress a framed blob produced by `compress`.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        bail!(ErrorKind::Corrupt("compressed blob header too short".into()));
    }
    let mut cursor = &data[0..8];
    let tag = cursor.read_u32::<LittleEndian>().unwrap();
    let declared_len = cursor.read_u32::<LittleEndian>().unwrap();

    // The reference behaviour for a declared length that cannot be
    // represented as a valid (non-negative) i32 is to reject outright
    // rather than coerce via a cast-before-negate (spec.md §9 open question).
    if declared_len > i32::MAX as u32 {
        bail!(ErrorKind::InvalidUncompressedSize);
    }

    let payload = &data[HEADER_LEN..];
    let out = match tag {
        TAG_LZ4 => {
            let mut decoder =
                lz4::Decoder::new(payload).chain_err(|| "failed to initialize lz4 decoder")?;
            let mut buf = Vec::with_capacity(declared_len as usize);
            decoder.read_to_end(&mut buf).chain_err(|| "lz4 decompression failed")?;
            buf
        }
        TAG_ZSTD => {
            zstd::decode_all(payload).chain_err(|| "zstd decompression failed")?
        }
        other => bail!(ErrorKind::UnknownCodec(other)),
    };

    if out.len() as u32 != declared_len {
        bail!(ErrorKind::InvalidUncompressedSize);
    }
    Ok(out)
}

/// Compress the contents of `from` into `to`, writing via a temp file in
/// `to`'s directory and atomically renaming into place.
pub fn compress_file(from: &Path, to: &Path, format: Format, level: Option<i32>) -> Result<()> {
    let data = std::fs::read(from)?;
    let compressed = compress(&data, format, level)?;
    let dir = to.parent().unwrap_or_else(|| Path::new("."));
    let tmp = fs_util::TempFile::new(dir, "tmp")?;
    std::fs::write(tmp.path(), &compressed)?;
    fs_util::rename(tmp.path(), to)?;
    tmp.forget();
    Ok(())
}

/// Decompress `from` into `to`, via a temp file plus atomic rename.
pub fn decompress_file(from: &Path, to: &Path) -> Result<()> {
    let mut f = File::open(from)?;
    let mut data = Vec::new();
    f.read_to_end(&mut data)?;
    let decompressed = decompress(&data)?;
    let dir = to.parent().unwrap_or_else(|| Path::new("."));
    let tmp = fs_util::TempFile::new(dir, "tmp")?;
    std::fs::write(tmp.path(), &decompressed)?;
    fs_util::rename(tmp.path(), to)?;
    tmp.forget();
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lz4_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = compress(&data, Format::Lz4, None).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn zstd_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = compress(&data, Format::Zstd, Some(5)).unwrap();
        let decompressed = decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn empty_input_round_trips() {
        let compressed = compress(&[], Format::Zstd, None).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_too_short_header() {
        let err = decompress(&[1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut data = vec![0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0];
        data.extend_from_slice(b"payload");
        let err = decompress(&data).unwrap_err();
        assert!(err.to_string().contains("unknown compression codec tag"));
    }

    #[test]
    fn rejects_declared_length_over_i32_max() {
        let mut data = vec![];
        data.write_u32::<LittleEndian>(TAG_ZSTD).unwrap();
        data.write_u32::<LittleEndian>(0xffff_ffff).unwrap();
        let err = decompress(&data).unwrap_err();
        assert!(err.to_string().contains("Invalid uncompressed data size"));
    }
}
