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

//! Remote cache tier (component I): a single connection string
//! (`BUILDCACHE_REMOTE` / `Config::remote`) selects one of three backends by
//! URL scheme. Every backend stores entries under two kinds of object key:
//!
//! - `buildcache_<hash>_.entry`       the serialized `CacheEntry`
//! - `buildcache_<hash>_<file_id>`    one artifact, always compressed
//!
//! Remote-stored entries are always written with `CompressionMode::All`
//! regardless of the local `compress` setting -- the wire cost dominates for
//! anything crossing a network (`spec.md` §4.I).

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "redis")]
pub mod redis_provider;
#[cfg(feature = "s3")]
pub mod s3;

use log::warn;

use crate::cache_entry::CacheEntry;
use crate::errors::*;
use crate::hasher::Hash;

/// Uniform interface implemented by every backend. A failed `connect` or a
/// backend compiled out by feature flags simply yields no provider --
/// callers treat an absent remote as cache-miss-only, never fatal.
pub trait RemoteCache: Send {
    fn is_connected(&self) -> bool;
    fn lookup(&self, hash: &Hash) -> Result<Option<CacheEntry>>;
    fn add_entry(&self, hash: &Hash, entry: &CacheEntry) -> Result<()>;
    fn get_file(&self, hash: &Hash, file_id: &str) -> Result<Option<Vec<u8>>>;
    fn put_file(&self, hash: &Hash, file_id: &str, data: &[u8]) -> Result<()>;
}

pub fn entry_object_key(hash: &Hash) -> String {
    format!("buildcache_{}_.entry", hash)
}

pub fn file_object_key(hash: &Hash, file_id: &str) -> String {
    format!("buildcache_{}_{}", hash, file_id)
}

/// Build the provider named by `url`'s scheme, or `None` for an empty URL or
/// a scheme whose backend was compiled out.
pub fn connect(url: &str) -> Option<Box<dyn RemoteCache>> {
    if url.is_empty() {
        return None;
    }
    let scheme_end = url.find("://")?;
    let scheme = &url[..scheme_end];
    match scheme {
        #[cfg(feature = "http")]
        "http" | "https" => Some(Box::new(http::HttpCache::connect(url)) as Box<dyn RemoteCache>),
        #[cfg(feature = "redis")]
        "redis" => redis_provider::RedisCache::connect(url)
            .map(|c| Box::new(c) as Box<dyn RemoteCache>),
        #[cfg(feature = "s3")]
        "s3" => Some(Box::new(s3::S3Cache::connect(url)) as Box<dyn RemoteCache>),
        other => {
            warn!("unrecognized or unsupported remote cache scheme: {:?}", other);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entry_and_file_keys_are_namespaced() {
        let h = crate::hasher::hash_bytes(b"x");
        assert!(entry_object_key(&h).starts_with("buildcache_"));
        assert!(entry_object_key(&h).ends_with("_.entry"));
        assert_eq!(file_object_key(&h, "object"), format!("buildcache_{}_object", h));
    }

    #[test]
    fn connect_rejects_empty_url() {
        assert!(connect("").is_none());
    }

    #[test]
    fn connect_rejects_unknown_scheme() {
        assert!(connect("ftp://example.com/cache").is_none());
    }
}
