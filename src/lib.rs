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

//! buildcache: a compiler-invocation cache.
//!
//! A thin wrapper binary stands in for a compiler (or another
//! deterministic build tool). It fingerprints an invocation from its
//! arguments, environment, and preprocessed source, looks that
//! fingerprint up in a local and/or remote cache, and on a hit replays
//! the cached stdout/stderr/exit-code/output-files instead of running the
//! real tool.

#[macro_use]
extern crate error_chain;

pub mod cache_entry;
pub mod cache_stats;
pub mod cli;
pub mod compiler;
pub mod compression;
pub mod config;
pub mod data_store;
pub mod engine;
pub mod errors;
pub mod fs_util;
pub mod hasher;
pub mod local_cache;
pub mod lock;
pub mod logging;
pub mod remote;
pub mod serializer;
pub mod subprocess;
