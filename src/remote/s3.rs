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

//! Remote cache backed by an S3-compatible bucket, signed with the classic
//! AWS v2 (HMAC-SHA1) scheme -- sufficient for the self-hosted,
//! S3-protocol-compatible stores this is aimed at (`spec.md` §4.I), and a
//! much smaller dependency footprint than pulling in a full SDK.
//!
//! Canonical string to sign (per the v2 spec):
//! ```text
//! METHOD\n\nCONTENT-TYPE\nDATE\n/bucket/key
//! ```

use base64::Engine as _;
use hmac::{Hmac, Mac};
use log::debug;
use sha1::Sha1;

use crate::cache_entry::CacheEntry;
use crate::config;
use crate::errors::*;
use crate::hasher::Hash;

use super::{entry_object_key, file_object_key, RemoteCache};

type HmacSha1 = Hmac<Sha1>;

/// `s3://bucket.host[:port]/prefix` -- `host` defaults to `s3.amazonaws.com`
/// when omitted, matching the reference tool's URL grammar.
pub struct S3Cache {
    endpoint: String,
    bucket: String,
    prefix: String,
    access_key: String,
    secret_key: String,
    client: reqwest::blocking::Client,
}

impl S3Cache {
    pub fn connect(url: &str) -> Self {
        let without_scheme = url.trim_start_matches("s3://");
        let (host_part, path_part) = without_scheme.split_once('/').unwrap_or((without_scheme, ""));
        let (bucket, endpoint) = match host_part.split_once('.') {
            Some((bucket, host)) => (bucket.to_string(), host.to_string()),
            None => (host_part.to_string(), "s3.amazonaws.com".to_string()),
        };
        let cfg = config::current();
        S3Cache {
            endpoint,
            bucket,
            prefix: path_part.trim_matches('/').to_string(),
            access_key: cfg.s3_access.clone(),
            secret_key: cfg.s3_secret.clone(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn object_path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            format!("/{}/{}", self.bucket, key)
        } else {
            format!("/{}/{}/{}", self.bucket, self.prefix, key)
        }
    }

    fn url_for(&self, path: &str) -> String {
        // `path` is `/bucket/key...`; strip the leading `/bucket` since the
        // bucket is already folded into the virtual-hosted-style host name.
        format!("https://{}.{}{}", self.bucket, self.endpoint, &path[self.bucket.len() + 1..])
    }

    fn rfc2616_date() -> String {
        chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    fn sign(&self, method: &str, content_type: &str, date: &str, path: &str) -> String {
        let to_sign = format!("{}\n\n{}\n{}\n{}", method, content_type, date, path);
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes()).expect("HMAC accepts any key length");
        mac.update(to_sign.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    fn authorization(&self, method: &str, content_type: &str, date: &str, path: &str) -> String {
        format!("AWS {}:{}", self.access_key, self.sign(method, content_type, date, path))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key);
        let date = Self::rfc2616_date();
        let auth = self.authorization("GET", "", &date, &path);
        let resp = self
            .client
            .get(self.url_for(&path))
            .header("Date", &date)
            .header("Authorization", auth)
            .send()
            .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))?;
        match resp.status() {
            reqwest::StatusCode::OK => Ok(Some(
                resp.bytes()
                    .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))?
                    .to_vec(),
            )),
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            other => bail!(ErrorKind::RemoteProvider(format!("S3 GET {} returned {}", key, other))),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(key);
        let date = Self::rfc2616_date();
        let content_type = "application/octet-stream";
        let auth = self.authorization("PUT", content_type, &date, &path);
        let resp = self
            .client
            .put(self.url_for(&path))
            .header("Date", &date)
            .header("Content-Type", content_type)
            .header("Authorization", auth)
            .body(data.to_vec())
            .send()
            .map_err(|e| Error::from(ErrorKind::RemoteProvider(e.to_string())))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            bail!(ErrorKind::RemoteProvider(format!("S3 PUT {} returned {}", key, resp.status())))
        }
    }
}

impl RemoteCache for S3Cache {
    fn is_connected(&self) -> bool {
        !self.bucket.is_empty()
    }

    fn lookup(&self, hash: &Hash) -> Result<Option<CacheEntry>> {
        match self.get(&entry_object_key(hash))? {
            Some(bytes) => Ok(Some(CacheEntry::deserialize(&bytes)?)),
            None => {
                debug!("s3 remote: no entry for {}", hash);
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn url_parsing_splits_bucket_and_host() {
        let cache = S3Cache {
            endpoint: "s3.amazonaws.com".to_string(),
            bucket: "my-bucket".to_string(),
            prefix: "builds".to_string(),
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
            client: reqwest::blocking::Client::new(),
        };
        assert_eq!(cache.object_path("buildcache_abc_.entry"), "/my-bucket/builds/buildcache_abc_.entry");
    }

    #[test]
    fn signature_is_stable_for_identical_inputs() {
        let cache = S3Cache {
            endpoint: "s3.amazonaws.com".to_string(),
            bucket: "b".to_string(),
            prefix: String::new(),
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
            client: reqwest::blocking::Client::new(),
        };
        let a = cache.sign("GET", "", "Mon, 01 Jan 2024 00:00:00 GMT", "/b/key");
        let b = cache.sign("GET", "", "Mon, 01 Jan 2024 00:00:00 GMT", "/b/key");
        assert_eq!(a, b);
    }
}
