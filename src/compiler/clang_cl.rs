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

//! `clang-cl` accepts the same cl.exe-style flag grammar as MSVC
//! (`spec.md` §4.L); this is a thin re-parameterization of [`super::msvc`].

use std::path::Path;

use crate::cache_entry::ExpectedFile;
use crate::errors::*;

use super::msvc::MsvcWrapper;
use super::{Capabilities, Wrapper};

fn is_clang_cl(basename: &str) -> bool {
    basename.eq_ignore_ascii_case("clang-cl")
}

pub struct ClangClWrapper {
    inner: MsvcWrapper,
}

impl ClangClWrapper {
    pub fn new() -> Self {
        ClangClWrapper { inner: MsvcWrapper::with_matcher(is_clang_cl, "buildcache-clang-cl-v1") }
    }
}

impl Wrapper for ClangClWrapper {
    fn can_handle_command(&self, resolved_program: &Path, argv: &[String]) -> bool {
        self.inner.can_handle_command(resolved_program, argv)
    }

    fn resolve_args(&mut self, argv: &[String]) -> Result<()> {
        self.inner.resolve_args(argv)
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
        self.inner.get_program_id()
    }

    fn get_build_files(&self) -> Vec<ExpectedFile> {
        self.inner.get_build_files()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_clang_cl_basename_only() {
        assert!(is_clang_cl("clang-cl"));
        assert!(!is_clang_cl("cl"));
    }
}
