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

//! Green Hills Software compilers (`spec.md` §4.L): `ccarm`/`cxarm`,
//! `ccthumb`/`cxthumb`, `ccintarm`/`cxintarm`. Inherits the GCC-family
//! argument grammar, but identifies the toolchain by content hash rather
//! than a `--version` banner (GHS compilers don't print one consistently
//! across releases) plus an optional INTEGRITY OS header when present.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::cache_entry::ExpectedFile;
use crate::errors::*;
use crate::hasher;

use super::gcc::GccWrapper;
use super::{Capabilities, Wrapper};

pub struct GhsWrapper {
    inner: GccWrapper,
    os_dir: Option<PathBuf>,
}

impl GhsWrapper {
    pub fn new() -> Self {
        GhsWrapper { inner: GccWrapper::new(), os_dir: None }
    }

    fn matches_basename(basename: &str) -> bool {
        let re = Regex::new(r"(?i)^(ccarm|cxarm|ccthumb|cxthumb|ccintarm|cxintarm)(\.exe)?$").unwrap();
        re.is_match(basename)
    }
}

impl Wrapper for GhsWrapper {
    fn can_handle_command(&self, resolved_program: &Path, _argv: &[String]) -> bool {
        resolved_program
            .file_stem()
            .and_then(|s| s.to_str())
            .map(Self::matches_basename)
            .unwrap_or(false)
    }

    fn resolve_args(&mut self, argv: &[String]) -> Result<()> {
        for arg in &argv[1..] {
            if let Some(dir) = arg.strip_prefix("-os_dir=") {
                self.os_dir = Some(PathBuf::from(dir));
            }
        }
        let filtered: Vec<String> = std::iter::once(argv[0].clone())
            .chain(argv[1..].iter().filter(|a| !a.starts_with("-os_dir=")).cloned())
            .collect();
        self.inner.resolve_args(&filtered)
    }

    fn get_capabilities(&self) -> Capabilities {
        self.inner.get_capabilities()
    }

    fn preprocess_source(&self) -> Result<Vec<u8>> {
        self.inner.preprocess_source()
    }

    fn get_relevant_arguments(&self) -> Vec<String> {
        self.inner.get_relevant_arguments()
    }

    fn get_relevant_env_vars(&self) -> Vec<(String, String)> {
        self.inner.get_relevant_env_vars()
    }

    fn get_program_id(&self) -> Result<Vec<u8>> {
        let program_path = self.inner.program_path();
        let content_hash = hasher::hash_file(&program_path)
            .map_err(|e| Error::from(format!("could not hash {:?}: {}", program_path, e)))?;
        let mut id = b"buildcache-ghs-v1\x00".to_vec();
        id.extend_from_slice(content_hash.to_hex().as_bytes());

        if let Some(os_dir) = &self.os_dir {
            let header = os_dir.join("INTEGRITY-include").join("INTEGRITY_version.h");
            if let Ok(contents) = std::fs::read(&header) {
                id.extend_from_slice(&contents);
            }
        }
        Ok(id)
    }

    fn get_build_files(&self) -> Vec<ExpectedFile> {
        self.inner.get_build_files()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_ghs_basenames() {
        for name in ["ccarm", "cxarm", "ccthumb", "cxthumb", "ccintarm", "cxintarm"] {
            assert!(GhsWrapper::matches_basename(name), "{}", name);
        }
    }

    #[test]
    fn strips_os_dir_before_delegating() {
        let mut wrapper = GhsWrapper::new();
        let argv = vec![
            "ccarm".to_string(),
            "-os_dir=/opt/ghs/os".to_string(),
            "-c".to_string(),
            "a.c".to_string(),
            "-o".to_string(),
            "a.o".to_string(),
        ];
        wrapper.resolve_args(&argv).unwrap();
        assert_eq!(wrapper.os_dir, Some(PathBuf::from("/opt/ghs/os")));
    }
}
