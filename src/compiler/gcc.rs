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

//! GCC/Clang family wrapper (`spec.md` §4.L): matches basenames containing
//! `gcc`, `g++`, `clang`, `clang++`, or `clang-N`.

use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;

use crate::cache_entry::ExpectedFile;
use crate::errors::*;
use crate::fs_util::TempFile;

use super::{filter_args, Capabilities, Wrapper, CAP_HARD_LINKS};

pub struct GccWrapper {
    program: PathBuf,
    args: Vec<String>,
    output_path: Option<PathBuf>,
    coverage: bool,
    debug: bool,
}

impl GccWrapper {
    pub fn new() -> Self {
        GccWrapper {
            program: PathBuf::new(),
            args: Vec::new(),
            output_path: None,
            coverage: false,
            debug: false,
        }
    }

    fn matches_basename(basename: &str) -> bool {
        let re = Regex::new(r"(?i)^(gcc|g\+\+|clang|clang\+\+|clang-\d+)(\.exe)?$").unwrap();
        re.is_match(basename)
    }

    /// The resolved compiler binary, as set by [`Wrapper::resolve_args`].
    /// Exposed for wrappers that reuse this one's argument grammar but need
    /// a different `get_program_id` (e.g. [`super::ghs`]).
    pub(crate) fn program_path(&self) -> PathBuf {
        self.program.clone()
    }
}

impl Wrapper for GccWrapper {
    fn can_handle_command(&self, resolved_program: &Path, _argv: &[String]) -> bool {
        resolved_program
            .file_stem()
            .and_then(|s| s.to_str())
            .map(Self::matches_basename)
            .unwrap_or(false)
    }

    fn resolve_args(&mut self, argv: &[String]) -> Result<()> {
        self.program = PathBuf::from(&argv[0]);
        self.args = argv[1..].to_vec();

        let mut output = None;
        let mut i = 0;
        while i < self.args.len() {
            let arg = &self.args[i];
            if arg == "-o" {
                output = self.args.get(i + 1).map(PathBuf::from);
                i += 1;
            } else if let Some(rest) = arg.strip_prefix("-o") {
                if !rest.is_empty() {
                    output = Some(PathBuf::from(rest));
                }
            } else if arg == "-g" || arg.starts_with("-g") {
                self.debug = true;
            } else if arg == "--coverage" || arg == "-ftest-coverage" || arg == "-fprofile-arcs" {
                self.coverage = true;
            }
            i += 1;
        }

        self.output_path = match output {
            Some(p) => Some(p),
            None => bail!(ErrorKind::WrapperDeclined("no -o output path given".into())),
        };
        Ok(())
    }

    fn get_capabilities(&self) -> Capabilities {
        Capabilities::new(&[CAP_HARD_LINKS])
    }

    fn preprocess_source(&self) -> Result<Vec<u8>> {
        let config = crate::config::current();
        let strict = config.accuracy == crate::config::Accuracy::Strict;
        let keep_line_info = (self.debug && strict) || (self.coverage && !strict);

        let without_compile_flag: Vec<String> = self.args.iter().filter(|a| a.as_str() != "-c").cloned().collect();
        let filtered = filter_args(&without_compile_flag, &[], &["-o"]);
        let dir = self.output_path.as_ref().and_then(|p| p.parent()).unwrap_or_else(|| Path::new("."));
        let tmp = TempFile::new(dir, "i")?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-E");
        if !keep_line_info {
            cmd.arg("-P");
        }
        cmd.args(&filtered);
        cmd.arg("-o").arg(tmp.path());

        let status = cmd.status().chain_err(|| format!("failed to run preprocessor {:?}", self.program))?;
        if !status.success() {
            bail!(ErrorKind::WrapperDeclined(format!("preprocessor exited with {:?}", status.code())));
        }
        let bytes = std::fs::read(tmp.path())?;
        Ok(bytes)
    }

    fn get_relevant_arguments(&self) -> Vec<String> {
        filter_args(
            &self.args,
            &["-I", "-D", "-M", "--sysroot="],
            &["-I", "-MF", "-MT", "-MQ", "-o"],
        )
        .into_iter()
        .filter(|a| !looks_like_source_file(a))
        .collect()
    }

    fn get_relevant_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn get_program_id(&self) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .chain_err(|| format!("failed to run {:?} --version", self.program))?;
        let mut id = b"buildcache-gcc-v1\x00".to_vec();
        id.extend_from_slice(&output.stdout);
        Ok(id)
    }

    fn get_build_files(&self) -> Vec<ExpectedFile> {
        let mut files = Vec::new();
        if let Some(output) = &self.output_path {
            files.push(ExpectedFile { file_id: "object".into(), path: output.clone(), required: true });
            if self.coverage {
                let gcno = output.with_extension("gcno");
                files.push(ExpectedFile { file_id: "coverage".into(), path: gcno, required: false });
            }
        }
        files
    }
}

fn looks_like_source_file(arg: &str) -> bool {
    if arg.starts_with('-') {
        return false;
    }
    matches!(
        Path::new(arg).extension().and_then(|e| e.to_str()),
        Some("c") | Some("cc") | Some("cpp") | Some("cxx") | Some("m") | Some("mm")
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_common_gcc_clang_basenames() {
        for name in ["gcc", "g++", "clang", "clang++", "clang-17", "GCC"] {
            assert!(GccWrapper::matches_basename(name), "{}", name);
        }
    }

    #[test]
    fn does_not_match_unrelated_basenames() {
        for name in ["cl", "ld", "python3"] {
            assert!(!GccWrapper::matches_basename(name), "{}", name);
        }
    }

    #[test]
    fn resolve_args_requires_output_path() {
        let mut wrapper = GccWrapper::new();
        let argv = vec!["gcc".to_string(), "-c".to_string(), "hello.c".to_string()];
        assert!(wrapper.resolve_args(&argv).is_err());
    }

    #[test]
    fn resolve_args_finds_dash_o_output() {
        let mut wrapper = GccWrapper::new();
        let argv = vec!["gcc".to_string(), "-c".to_string(), "hello.c".to_string(), "-o".to_string(), "hello.o".to_string()];
        wrapper.resolve_args(&argv).unwrap();
        assert_eq!(wrapper.output_path, Some(PathBuf::from("hello.o")));
        let files = wrapper.get_build_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, "object");
    }

    #[test]
    fn relevant_arguments_drop_include_and_define_flags() {
        let mut wrapper = GccWrapper::new();
        let argv = vec![
            "gcc".to_string(),
            "-Iinclude".to_string(),
            "-DFOO=1".to_string(),
            "hello.c".to_string(),
            "-o".to_string(),
            "hello.o".to_string(),
        ];
        wrapper.resolve_args(&argv).unwrap();
        let relevant = wrapper.get_relevant_arguments();
        assert!(!relevant.iter().any(|a| a.starts_with("-I") || a.starts_with("-D")));
        assert!(!relevant.contains(&"hello.c".to_string()));
    }
}
