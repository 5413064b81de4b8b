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

//! Clang Static Analyzer's `ccc-analyzer`/`c++-analyzer` wrapper
//! (`spec.md` §4.L). Inherits the GCC-family grammar for its underlying
//! compile step, but additionally picks up the `CCC_ANALYZER_*` env vars
//! that steer whether and where an HTML report gets written, and renames
//! any report the analyzer produces so repeated cached misses don't
//! collide on the same filename.

use std::path::Path;

use crate::cache_entry::ExpectedFile;
use crate::errors::*;

use super::gcc::GccWrapper;
use super::{Capabilities, Wrapper};

const MAX_NUM_REPORTS: u32 = 100;

pub struct AnalyzerWrapper {
    inner: GccWrapper,
    report_dir: Option<std::path::PathBuf>,
}

impl AnalyzerWrapper {
    pub fn new() -> Self {
        AnalyzerWrapper { inner: GccWrapper::new(), report_dir: None }
    }

    fn matches_basename(basename: &str) -> bool {
        basename.eq_ignore_ascii_case("ccc-analyzer") || basename.eq_ignore_ascii_case("c++-analyzer")
    }

    /// Rename the report the analyzer just wrote (if any) to
    /// `report-<unique>.html`, bounded by [`MAX_NUM_REPORTS`], so that a
    /// subsequent cached miss for a different invocation doesn't overwrite
    /// it.
    fn claim_report(&self) {
        let dir = match &self.report_dir {
            Some(d) => d,
            None => return,
        };
        let generated = dir.join("report.html");
        if !generated.exists() {
            return;
        }
        for i in 0..MAX_NUM_REPORTS {
            let candidate = dir.join(format!("report-{}.html", i));
            if !candidate.exists() {
                let _ = std::fs::rename(&generated, &candidate);
                return;
            }
        }
    }
}

impl Wrapper for AnalyzerWrapper {
    fn can_handle_command(&self, resolved_program: &Path, _argv: &[String]) -> bool {
        resolved_program
            .file_stem()
            .and_then(|s| s.to_str())
            .map(Self::matches_basename)
            .unwrap_or(false)
    }

    fn resolve_args(&mut self, argv: &[String]) -> Result<()> {
        if let Ok(html_dir) = std::env::var("CCC_ANALYZER_HTML") {
            self.report_dir = Some(std::path::PathBuf::from(html_dir));
        }
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
        std::env::vars().filter(|(k, _)| k.starts_with("CCC_ANALYZER_")).collect()
    }

    fn get_program_id(&self) -> Result<Vec<u8>> {
        self.inner.get_program_id()
    }

    fn get_build_files(&self) -> Vec<ExpectedFile> {
        self.inner.get_build_files()
    }

    fn run_for_miss(
        &self,
        program: &Path,
        argv: &[String],
        config: &crate::config::Config,
    ) -> Result<crate::subprocess::Invocation> {
        let invocation = {
            // Default dispatch, reused verbatim: the analyzer binary itself
            // honors `config.prefix` the same way every other wrapper does.
            let (prog, mut args) = if config.prefix.is_empty() {
                (program.to_path_buf(), Vec::new())
            } else {
                let mut parts = config.prefix.split_whitespace();
                let prefix_prog = parts.next().unwrap_or_default();
                let rest: Vec<String> = parts.map(|s| s.to_string()).collect();
                (std::path::PathBuf::from(prefix_prog), [rest, vec![program.display().to_string()]].concat())
            };
            args.extend(argv[1..].iter().cloned());
            crate::subprocess::run(&prog, &args, None, &std::collections::HashMap::new())?
        };
        self.claim_report();
        Ok(invocation)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_ccc_analyzer_basenames() {
        assert!(AnalyzerWrapper::matches_basename("ccc-analyzer"));
        assert!(AnalyzerWrapper::matches_basename("c++-analyzer"));
        assert!(!AnalyzerWrapper::matches_basename("gcc"));
    }
}
