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

//! User-supplied `.lua` wrappers (`spec.md` §4.K step 4): dispatch scans
//! `config.lua_paths` for `.lua` files before trying any built-in, so a
//! deployment can teach buildcache about a compiler it doesn't ship
//! support for without a rebuild.
//!
//! Embedding a Lua runtime is out of scope here; [`ScriptWrapper`] exists
//! so dispatch's control flow is complete, but it always declines, which
//! falls through to the built-in wrapper list exactly as if no `.lua`
//! file had matched.

use std::path::{Path, PathBuf};

use crate::cache_entry::ExpectedFile;
use crate::config::Config;
use crate::errors::*;

use super::{Capabilities, Wrapper};

/// All `.lua` files found directly under any of `config.lua_paths`, in
/// configured order.
pub fn lua_wrappers(config: &'static Config) -> impl Iterator<Item = PathBuf> {
    config.lua_paths.clone().into_iter().flat_map(|dir| {
        std::fs::read_dir(&dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("lua"))
            .collect::<Vec<_>>()
    })
}

pub struct ScriptWrapper {
    path: PathBuf,
}

impl ScriptWrapper {
    pub fn new(path: PathBuf) -> Self {
        ScriptWrapper { path }
    }
}

impl Wrapper for ScriptWrapper {
    fn can_handle_command(&self, _resolved_program: &Path, _argv: &[String]) -> bool {
        false
    }

    fn resolve_args(&mut self, _argv: &[String]) -> Result<()> {
        bail!(ErrorKind::WrapperDeclined(format!("no lua runtime to run {:?}", self.path)))
    }

    fn get_capabilities(&self) -> Capabilities {
        Capabilities::new(&[])
    }

    fn preprocess_source(&self) -> Result<Vec<u8>> {
        bail!(ErrorKind::WrapperDeclined("lua wrappers are not supported".into()))
    }

    fn get_relevant_arguments(&self) -> Vec<String> {
        Vec::new()
    }

    fn get_relevant_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn get_program_id(&self) -> Result<Vec<u8>> {
        bail!(ErrorKind::WrapperDeclined("lua wrappers are not supported".into()))
    }

    fn get_build_files(&self) -> Vec<ExpectedFile> {
        Vec::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn script_wrapper_never_claims_a_command() {
        let wrapper = ScriptWrapper::new(PathBuf::from("does-not-exist.lua"));
        assert!(!wrapper.can_handle_command(Path::new("gcc"), &["gcc".to_string()]));
    }

    #[test]
    fn lua_wrappers_ignores_missing_directories() {
        let config: &'static Config = Box::leak(Box::new(Config {
            dir: PathBuf::new(),
            max_cache_size: 0,
            max_local_entry_size: 0,
            max_remote_entry_size: 0,
            hard_links: false,
            compress: false,
            compress_format: crate::compression::Format::Lz4,
            compress_level: None,
            remote: String::new(),
            remote_locks: false,
            read_only: false,
            read_only_remote: false,
            accuracy: crate::config::Accuracy::Default,
            impersonate: String::new(),
            prefix: String::new(),
            terminate_on_miss: false,
            lua_paths: vec!["/does/not/exist".to_string()],
            hash_extra_files: Vec::new(),
            disable: false,
            cache_link_commands: false,
            s3_access: String::new(),
            s3_secret: String::new(),
            perf: false,
            debug: String::new(),
            log_file: String::new(),
        }));
        let found: Vec<_> = lua_wrappers(config).collect();
        assert!(found.is_empty());
    }
}
