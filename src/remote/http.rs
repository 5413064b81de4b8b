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

//! Remote cache backed by a plain HTTP(S) object store: `GET` to read,
//! `PUT` to write, `404` means absent. No authentication -- intended to sit
//! behind a reverse proxy or a purpose-built cache server.

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::StatusCode;

use crate::cache_entry::CacheEntry;
use crate::errors::*;
use crate::hasher::Hash;

use super::{entry_object_key, file_object_key, RemoteCache};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpCache {
    base_url: String,
    client: Client,
}

impl HttpCache {
    pub fn connect(url: &str) -> Self {
        let base_url = url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        HttpCache { base_url, client }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .get(self.object_url(key))
            .send()
            .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))?;
        match resp.status() {
            StatusCode::OK => Ok(Some(
                resp.bytes()
                    .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))?
                    .to_vec(),
            )),
            StatusCode::NOT_FOUND => Ok(None),
            other => bail!(ErrorKind::RemoteProvider(format!("GET {} returned {}", key, other))),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let resp = self
            .client
            .put(self.object_url(key))
            .body(data.to_vec())
            .send()
            .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))?;
        if resp.status() == StatusCode::OK || resp.status() == StatusCode::CREATED {
            Ok(())
        } else {
            bail!(ErrorKind::RemoteProvider(format!("PUT {} returned {}", key, resp.status())))
        }
    }
}

impl RemoteCache for HttpCache {
    fn is_connected(&self) -> bool {
        !self.base_url.is_empty()
    }

    fn lookup(&self, hash: &Hash) -> Result<Option<CacheEntry>> {
        match self.get(&entry_object_key(hash))? {
            Some(bytes) => Ok(Some(CacheEntry::deserialize(&bytes)?)),
            None => {
                debug!("http remote: no entry for {}", hash);
                Ok(None)
            }
        }
    }

    fn add_entry(&self, hash: &Hash, entry: &CacheEntry) -> Result<()> {
        self.put(&entry_object_key(hash), &entry.serialize())
    }

    fn get_file(&self, hash: &Hash, file_id: &str) -> Result<Option<Vec<u8>>> {
        self.get(&file_object_key(hash, file_id))
    }

    fn put_file(&self, hash: &Hash, file_id: &str, data: &[u8]) -> Result<()> {
        self.put(&file_object_key(hash, file_id), data)
    }
}
