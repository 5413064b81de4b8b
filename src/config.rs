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

//! Typed configuration: environment + JSON file, process-wide singleton
//! (component M). Initialization order is: built-in defaults, then
//! `<dir>/config.json` (unknown keys ignored), then environment overlay.
//! Every knob in `spec.md` §4.M is reachable through both channels.

use std::path::PathBuf;

use lazy_static::lazy_static;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::compression::Format as CompressFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    Default,
    Strict,
}

impl std::fmt::Display for Accuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Accuracy::Default => write!(f, "default"),
            Accuracy::Strict => write!(f, "strict"),
        }
    }
}

/// Partial, JSON-facing view of the configuration: every field optional so
/// that unknown/missing keys are simply ignored (serde's default `Option`
/// behavior) rather than causing a deserialization failure.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FileConfig {
    dir: Option<String>,
    max_cache_size: Option<u64>,
    max_local_entry_size: Option<u64>,
    max_remote_entry_size: Option<u64>,
    hard_links: Option<bool>,
    compress: Option<bool>,
    compress_format: Option<String>,
    compress_level: Option<i32>,
    remote: Option<String>,
    remote_locks: Option<bool>,
    read_only: Option<bool>,
    read_only_remote: Option<bool>,
    accuracy: Option<String>,
    impersonate: Option<String>,
    prefix: Option<String>,
    terminate_on_miss: Option<bool>,
    lua_paths: Option<Vec<String>>,
    hash_extra_files: Option<Vec<String>>,
    disable: Option<bool>,
    cache_link_commands: Option<bool>,
    s3_access: Option<String>,
    s3_secret: Option<String>,
    perf: Option<bool>,
    debug: Option<String>,
    log_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dir: PathBuf,
    pub max_cache_size: u64,
    pub max_local_entry_size: u64,
    pub max_remote_entry_size: u64,
    pub hard_links: bool,
    pub compress: bool,
    pub compress_format: CompressFormat,
    pub compress_level: Option<i32>,
    pub remote: String,
    pub remote_locks: bool,
    pub read_only: bool,
    pub read_only_remote: bool,
    pub accuracy: Accuracy,
    pub impersonate: String,
    pub prefix: String,
    pub terminate_on_miss: bool,
    pub lua_paths: Vec<String>,
    pub hash_extra_files: Vec<String>,
    pub disable: bool,
    pub cache_link_commands: bool,
    pub s3_access: String,
    pub s3_secret: String,
    pub perf: bool,
    pub debug: String,
    pub log_file: String,
}

const PATH_DELIMITER: char = if cfg!(windows) { ';' } else { ':' };

impl Config {
    fn defaults() -> Self {
        let dir = directories::ProjectDirs::from("", "", "buildcache")
            .map(|d| d.cache_dir().to_path_buf())
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".buildcache")
            });
        Config {
            dir,
            max_cache_size: 5 * 1024 * 1024 * 1024,
            max_local_entry_size: 0,
            max_remote_entry_size: 0,
            hard_links: false,
            compress: true,
            compress_format: CompressFormat::Lz4,
            compress_level: None,
            remote: String::new(),
            remote_locks: false,
            read_only: false,
            read_only_remote: false,
            accuracy: Accuracy::Default,
            impersonate: String::new(),
            prefix: String::new(),
            terminate_on_miss: false,
            lua_paths: Vec::new(),
            hash_extra_files: Vec::new(),
            disable: false,
            cache_link_commands: false,
            s3_access: String::new(),
            s3_secret: String::new(),
            perf: false,
            debug: String::new(),
            log_file: String::new(),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    fn apply_file(&mut self) {
        let path = self.config_file();
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return,
        };
        let file_config: FileConfig = match serde_json::from_str(&contents) {
            Ok(c) => c,
            Err(e) => {
                warn!("failed to parse {:?}: {}", path, e);
                return;
            }
        };

        if let Some(v) = file_config.dir {
            self.dir = PathBuf::from(v);
        }
        if let Some(v) = file_config.max_cache_size {
            self.max_cache_size = v;
        }
        if let Some(v) = file_config.max_local_entry_size {
            self.max_local_entry_size = v;
        }
        if let Some(v) = file_config.max_remote_entry_size {
            self.max_remote_entry_size = v;
        }
        if let Some(v) = file_config.hard_links {
            self.hard_links = v;
        }
        if let Some(v) = file_config.compress {
            self.compress = v;
        }
        if let Some(v) = file_config.compress_format.and_then(|s| CompressFormat::from_name(&s)) {
            self.compress_format = v;
        }
        if let Some(v) = file_config.compress_level {
            self.compress_level = Some(v);
        }
        if let Some(v) = file_config.remote {
            self.remote = v;
        }
        if let Some(v) = file_config.remote_locks {
            self.remote_locks = v;
        }
        if let Some(v) = file_config.read_only {
            self.read_only = v;
        }
        if let Some(v) = file_config.read_only_remote {
            self.read_only_remote = v;
        }
        if let Some(v) = file_config.accuracy {
            if v.eq_ignore_ascii_case("strict") {
                self.accuracy = Accuracy::Strict;
            } else {
                self.accuracy = Accuracy::Default;
            }
        }
        if let Some(v) = file_config.impersonate {
            self.impersonate = v;
        }
        if let Some(v) = file_config.prefix {
            self.prefix = v;
        }
        if let Some(v) = file_config.terminate_on_miss {
            self.terminate_on_miss = v;
        }
        if let Some(v) = file_config.lua_paths {
            self.lua_paths = v;
        }
        if let Some(v) = file_config.hash_extra_files {
            self.hash_extra_files = v;
        }
        if let Some(v) = file_config.disable {
            self.disable = v;
        }
        if let Some(v) = file_config.cache_link_commands {
            self.cache_link_commands = v;
        }
        if let Some(v) = file_config.s3_access {
            self.s3_access = v;
        }
        if let Some(v) = file_config.s3_secret {
            self.s3_secret = v;
        }
        if let Some(v) = file_config.perf {
            self.perf = v;
        }
        if let Some(v) = file_config.debug {
            self.debug = v;
        }
        if let Some(v) = file_config.log_file {
            self.log_file = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("BUILDCACHE_DIR") {
            self.dir = PathBuf::from(v);
        }
        if let Some(v) = env_u64("BUILDCACHE_MAX_CACHE_SIZE") {
            self.max_cache_size = v;
        }
        if let Some(v) = env_u64("BUILDCACHE_MAX_LOCAL_ENTRY_SIZE") {
            self.max_local_entry_size = v;
        }
        if let Some(v) = env_u64("BUILDCACHE_MAX_REMOTE_ENTRY_SIZE") {
            self.max_remote_entry_size = v;
        }
        if let Some(v) = env_bool("BUILDCACHE_HARD_LINKS") {
            self.hard_links = v;
        }
        if let Some(v) = env_bool("BUILDCACHE_COMPRESS") {
            self.compress = v;
        }
        if let Ok(v) = std::env::var("BUILDCACHE_COMPRESS_FORMAT") {
            if let Some(fmt) = CompressFormat::from_name(&v) {
                self.compress_format = fmt;
            }
        }
        if let Some(v) = env_i32("BUILDCACHE_COMPRESS_LEVEL") {
            self.compress_level = Some(v);
        }
        if let Ok(v) = std::env::var("BUILDCACHE_REMOTE") {
            self.remote = v;
        }
        if let Some(v) = env_bool("BUILDCACHE_REMOTE_LOCKS") {
            self.remote_locks = v;
        }
        if let Some(v) = env_bool("BUILDCACHE_READ_ONLY") {
            self.read_only = v;
        }
        if let Some(v) = env_bool("BUILDCACHE_READ_ONLY_REMOTE") {
            self.read_only_remote = v;
        }
        if let Ok(v) = std::env::var("BUILDCACHE_ACCURACY") {
            self.accuracy = if v.eq_ignore_ascii_case("strict") {
                Accuracy::Strict
            } else {
                Accuracy::Default
            };
        }
        if let Ok(v) = std::env::var("BUILDCACHE_IMPERSONATE") {
            self.impersonate = v;
        }
        if let Ok(v) = std::env::var("BUILDCACHE_PREFIX") {
            self.prefix = v;
        }
        if let Some(v) = env_bool("BUILDCACHE_TERMINATE_ON_MISS") {
            self.terminate_on_miss = v;
        }
        if let Ok(v) = std::env::var("BUILDCACHE_LUA_PATH") {
            self.lua_paths = v.split(PATH_DELIMITER).map(|s| s.to_string()).collect();
        }
        if let Ok(v) = std::env::var("BUILDCACHE_HASH_EXTRA_FILES") {
            self.hash_extra_files = v.split(PATH_DELIMITER).map(|s| s.to_string()).collect();
        }
        if let Some(v) = env_bool("BUILDCACHE_DISABLE") {
            self.disable = v;
        }
        if let Some(v) = env_bool("BUILDCACHE_CACHE_LINK_COMMANDS") {
            self.cache_link_commands = v;
        }
        if let Ok(v) = std::env::var("BUILDCACHE_S3_ACCESS") {
            self.s3_access = v;
        }
        if let Ok(v) = std::env::var("BUILDCACHE_S3_SECRET") {
            self.s3_secret = v;
        }
        if let Some(v) = env_bool("BUILDCACHE_PERF") {
            self.perf = v;
        }
        if let Ok(v) = std::env::var("BUILDCACHE_DEBUG") {
            self.debug = v;
        }
        if let Ok(v) = std::env::var("BUILDCACHE_LOG_FILE") {
            self.log_file = v;
        }
    }

    fn build() -> Self {
        let mut config = Config::defaults();
        config.apply_file();
        config.apply_env();
        config
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let v = v.trim();
        !(v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false"))
    })
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_i32(name: &str) -> Option<i32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

lazy_static! {
    static ref CONFIG: Config = Config::build();
}

/// Process-wide, lazily-built, effectively immutable after first access.
/// Testable units should prefer taking `&Config` explicitly; this global is
/// a convenience for the wrapper/CLI layer (`spec.md` §9).
pub fn current() -> &'static Config {
    &CONFIG
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::defaults();
        assert_eq!(c.max_cache_size, 5 * 1024 * 1024 * 1024);
        assert!(c.compress);
        assert_eq!(c.accuracy, Accuracy::Default);
    }

    #[test]
    fn env_bool_treats_zero_and_false_as_off() {
        std::env::set_var("BUILDCACHE_TEST_FLAG_OFF", "0");
        assert_eq!(env_bool("BUILDCACHE_TEST_FLAG_OFF"), Some(false));
        std::env::set_var("BUILDCACHE_TEST_FLAG_OFF", "false");
        assert_eq!(env_bool("BUILDCACHE_TEST_FLAG_OFF"), Some(false));
        std::env::set_var("BUILDCACHE_TEST_FLAG_OFF", "1");
        assert_eq!(env_bool("BUILDCACHE_TEST_FLAG_OFF"), Some(true));
        std::env::remove_var("BUILDCACHE_TEST_FLAG_OFF");
    }

    #[test]
    fn file_config_ignores_unknown_keys() {
        let json = r#"{"dir": "/tmp/bc", "some_future_key": 123}"#;
        let parsed: FileConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.dir, Some("/tmp/bc".to_string()));
    }
}
