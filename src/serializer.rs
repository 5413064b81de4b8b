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

//! Versioned little-endian binary (de)serialization of primitives,
//! sequences, and maps (component C). Hand-rolled rather than built on
//! `serde`/`bincode`: the on-disk layouts in `spec.md` §4.G are a public,
//! bit-for-bit-stable contract with field-level version skew (§4.G), which a
//! generic derive can't express directly.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::*;

pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.buf.push(if v { 1 } else { 0 });
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.write_i32::<LittleEndian>(v).unwrap();
        self
    }

    pub fn write_string(&mut self, v: &str) -> &mut Self {
        self.buf.write_i32::<LittleEndian>(v.len() as i32).unwrap();
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    pub fn write_bytes_as_string(&mut self, v: &[u8]) -> &mut Self {
        self.buf.write_i32::<LittleEndian>(v.len() as i32).unwrap();
        self.buf.extend_from_slice(v);
        self
    }

    pub fn write_string_seq<S: AsRef<str>>(&mut self, items: &[S]) -> &mut Self {
        self.buf.write_i32::<LittleEndian>(items.len() as i32).unwrap();
        for item in items {
            self.write_string(item.as_ref());
        }
        self
    }

    pub fn write_string_map(&mut self, items: &[(String, String)]) -> &mut Self {
        self.buf.write_i32::<LittleEndian>(items.len() as i32).unwrap();
        for (k, v) in items {
            self.write_string(k);
            self.write_string(v);
        }
        self
    }
}

impl Default for Writer {
    fn default() -> Self {
        Writer::new()
    }
}

/// A cursor-based reader. Reading past the end raises.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            bail!(ErrorKind::Corrupt(format!(
                "attempted to read {} bytes with only {} remaining",
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.take(4)?.read_i32::<LittleEndian>().unwrap())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        let bytes = self.take(len)?.to_vec();
        String::from_utf8(bytes).map_err(|e| Error::from(ErrorKind::Corrupt(e.to_string())))
    }

    pub fn read_bytes_as_string(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_string_seq(&mut self) -> Result<Vec<String>> {
        let count = self.read_len()?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_string()?);
        }
        Ok(out)
    }

    pub fn read_string_map(&mut self) -> Result<Vec<(String, String)>> {
        let count = self.read_len()?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let k = self.read_string()?;
            let v = self.read_string()?;
            out.push((k, v));
        }
        Ok(out)
    }

    fn read_len(&mut self) -> Result<usize> {
        let n = self.read_i32()?;
        if n < 0 {
            bail!(ErrorKind::Corrupt(format!("negative length prefix: {}", n)));
        }
        Ok(n as usize)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_all_primitives() {
        let mut w = Writer::new();
        w.write_bool(true).write_i32(-42).write_string("hello");
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_i32().unwrap(), -42);
        assert_eq!(r.read_string().unwrap(), "hello");
    }

    #[test]
    fn round_trips_seq_and_map() {
        let mut w = Writer::new();
        w.write_string_seq(&["a", "b", "c"]);
        w.write_string_map(&[("k1".into(), "v1".into()), ("k2".into(), "v2".into())]);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_string_seq().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            r.read_string_map().unwrap(),
            vec![("k1".to_string(), "v1".to_string()), ("k2".to_string(), "v2".to_string())]
        );
    }

    #[test]
    fn reading_past_the_end_raises() {
        let mut w = Writer::new();
        w.write_i32(1);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(r.read_i32().is_ok());
        assert!(r.read_i32().is_err());
    }

    #[test]
    fn empty_seq_and_map_round_trip() {
        let mut w = Writer::new();
        let empty: Vec<String> = vec![];
        w.write_string_seq(&empty);
        w.write_string_map(&[]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(r.read_string_seq().unwrap().is_empty());
        assert!(r.read_string_map().unwrap().is_empty());
    }
}
