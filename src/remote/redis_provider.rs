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

//! Remote cache backed by Redis: each object is a plain `GET`/`SET` key,
//! with no expiry set here (the server's own `maxmemory`/eviction policy
//! governs retention, same as the reference tool leaves to the operator).

use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use redis::Commands;

use crate::cache_entry::CacheEntry;
use crate::errors::*;
use crate::hasher::Hash;

use super::{entry_object_key, file_object_key, RemoteCache};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedisCache {
    conn: Mutex<redis::Connection>,
}

impl RedisCache {
    /// Returns `None` if the server can't be reached within
    /// `CONNECT_TIMEOUT` -- connection failure downgrades to "no remote",
    /// never a fatal startup error.
    pub fn connect(url: &str) -> Option<Self> {
        let client = redis::Client::open(url).ok()?;
        let conn = client.get_connection_with_timeout(CONNECT_TIMEOUT).ok()?;
        Some(RedisCache { conn: Mutex::new(conn) })
    }
}

impl RemoteCache for RedisCache {
    fn is_connected(&self) -> bool {
        true
    }

    fn lookup(&self, hash: &Hash) -> Result<Option<CacheEntry>> {
        let mut conn = self.conn.lock().unwrap();
        let bytes: Option<Vec<u8>> = conn
            .get(entry_object_key(hash))
            .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))?;
        match bytes {
            Some(b) => Ok(Some(CacheEntry::deserialize(&b)?)),
            None => {
                debug!("redis remote: no entry for {}", hash);
                Ok(None)
            }
        }
    }

    fn add_entry(&self, hash: &Hash, entry: &CacheEntry) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let _: () = conn
            .set(entry_object_key(hash), entry.serialize())
            .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))?;
        Ok(())
    }

    fn get_file(&self, hash: &Hash, file_id: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.lock().unwrap();
        conn.get(file_object_key(hash, file_id))
            .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))
    }

    fn put_file(&self, hash: &Hash, file_id: &str, data: &[u8]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let _: () = conn
            .set(file_object_key(hash, file_id), data)
            .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))?;
        Ok(())
    }
}
