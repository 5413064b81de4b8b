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

//! Ambient error handling for the whole crate.
//!
//! The cache core classifies failures into three kinds (see the crate-level
//! docs): recoverable-to-miss, recoverable-to-bypass, and
//! fatal-to-invocation. None of those are distinct `ErrorKind` variants here
//! -- the classification is a property of *where* an `Err` is caught, not of
//! what it contains. Call sites in `local_cache`, `remote`, and `engine` are
//! expected to catch and downgrade; this module only defines the vocabulary.

use log::{debug, error};

error_chain! {
    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
        Utf8(::std::string::FromUtf8Error);
    }

    errors {
        /// A cache-entry or manifest blob failed to decode.
        Corrupt(what: String) {
            description("corrupt cache data")
            display("corrupt cache data: {}", what)
        }

        /// A version tag was newer than this build understands.
        UnsupportedVersion(found: i32, max_supported: i32) {
            description("unsupported format version")
            display("unsupported format version {} (this build supports up to {})", found, max_supported)
        }

        /// The compressed-blob header named an unknown codec tag.
        UnknownCodec(tag: u32) {
            description("unknown compression codec tag")
            display("unknown compression codec tag: {:#010x}", tag)
        }

        /// A compressed blob declared an uncompressed length that can't be trusted.
        InvalidUncompressedSize {
            description("invalid uncompressed data size")
            display("Invalid uncompressed data size.")
        }

        /// A file lock could not be acquired within its budget.
        LockTimeout(path: String) {
            description("timed out acquiring lock")
            display("timed out acquiring lock on {}", path)
        }

        /// The wrapper declined to handle this invocation (fatal-to-invocation, §7).
        WrapperDeclined(why: String) {
            description("wrapper declined invocation")
            display("wrapper declined invocation: {}", why)
        }

        /// A remote-cache provider reported a transport-level failure.
        RemoteProvider(what: String) {
            description("remote cache provider error")
            display("remote cache provider error: {}", what)
        }

        /// The local store's on-disk layout is inconsistent for a given path.
        InvalidStoreLayout(what: String) {
            description("invalid local store layout")
            display("invalid local store layout: {}", what)
        }
    }
}

/// Log a `Result`'s error (if any) at `debug!` level and convert it into a
/// miss. Used at lookup-time call sites per the recoverable-to-miss class in
/// §7: a failure while reading/validating cached data is never surfaced to
/// the user, it is simply treated as if nothing were cached.
pub fn log_miss<T>(context: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("{}: treating as miss: {}", context, e);
            None
        }
    }
}

/// Log a `Result`'s error (if any) at `error!` level and swallow it. Used at
/// add-time and remote-write call sites per the recoverable-to-bypass class
/// in §7: the invocation's own result must still be delivered to the user.
pub fn log_bypass<T>(context: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            error!("{}: {}", context, e);
            None
        }
    }
}
