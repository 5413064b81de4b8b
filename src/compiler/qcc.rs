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

//! QNX `qcc`/`q++` wrapper (`spec.md` §4.L). Shares the GCC-family argument
//! grammar but never advertises [`super::CAP_HARD_LINKS`]: QNX's `qcc` is a
//! driver around per-target sub-compilers and hard-linking its outputs has
//! been observed to confuse its own dependency tracking.

use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;

use crate::cache_entry::ExpectedFile;
use crate::errors::*;
use crate::fs_util::TempFile;

use super::{filter_args, Capabilities, Wrapper};

pub struct QccWrapper {
    program: PathBuf,
    args: Vec<String>,
    output_path: Option<PathBuf>,
}

impl QccWrapper {
    pub fn new() -> Self {
        QccWrapper { program: PathBuf::new(), args: Vec::new(), output_path: None }
    }

    fn matches_basename(basename: &str) -> bool {
        let re = Regex::new(r"(?i)^(qcc|q\+\+)(\.exe)?$").unwrap();
        re.is_match(basename)
    }
}

impl Wrapper for QccWrapper {
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
        Capabilities::new(&[])
    }

    fn preprocess_source(&self) -> Result<Vec<u8>> {
        let without_compile_flag: Vec<String> = self.args.iter().filter(|a| a.as_str() != "-c").cloned().collect();
        let filtered = filter_args(&without_compile_flag, &[], &["-o"]);
        let dir = self.output_path.as_ref().and_then(|p| p.parent()).unwrap_or_else(|| Path::new("."));
        let tmp = TempFile::new(dir, "i")?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-E").args(&filtered).arg("-o").arg(tmp.path());
        let status = cmd.status().chain_err(|| format!("failed to run preprocessor {:?}", self.program))?;
        if !status.success() {
            bail!(ErrorKind::WrapperDeclined(format!("preprocessor exited with {:?}", status.code())));
        }
        Ok(std::fs::read(tmp.path())?)
    }

    fn get_relevant_arguments(&self) -> Vec<String> {
        filter_args(&self.args, &["-I", "-D"], &["-I", "-o"])
            .into_iter()
            .filter(|a| !looks_like_source_file(a))
            .collect()
    }

    fn get_relevant_env_vars(&self) -> Vec<(String, String)> {
        ["QNX_HOST", "QNX_TARGET", "QCC_CONF_PATH"]
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
            .collect()
    }

    fn get_program_id(&self) -> Result<Vec<u8>> {
        // qcc has no `--version`; `-V` lists available targets and their
        // toolchain versions, on stderr, including a per-target line that
        // would otherwise perturb the fingerprint on every QNX install.
        let output = Command::new(&self.program)
            .arg("-V")
            .output()
            .chain_err(|| format!("failed to run {:?} -V", self.program))?;
        let mut id = b"buildcache-qcc-v1\x00".to_vec();
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            if line.contains("cc: targets available in") {
                continue;
            }
            id.extend_from_slice(line.as_bytes());
            id.push(b'\n');
        }
        Ok(id)
    }

    fn get_build_files(&self) -> Vec<ExpectedFile> {
        match &self.output_path {
            Some(output) => vec![ExpectedFile { file_id: "object".into(), path: output.clone(), required: true }],
            None => Vec::new(),
        }
    }
}

fn looks_like_source_file(arg: &str) -> bool {
    if arg.starts_with('-') {
        return false;
    }
    matches!(Path::new(arg).extension().and_then(|e| e.to_str()), Some("c") | Some("cc") | Some("cpp") | Some("cxx"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_qcc_basenames() {
        assert!(QccWrapper::matches_basename("qcc"));
        assert!(QccWrapper::matches_basename("q++"));
        assert!(!QccWrapper::matches_basename("gcc"));
    }

    #[test]
    fn has_no_hard_links_capability() {
        let wrapper = QccWrapper::new();
        assert!(!wrapper.get_capabilities().has(super::super::CAP_HARD_LINKS));
    }

    #[test]
    fn resolve_args_finds_output_path() {
        let mut wrapper = QccWrapper::new();
        let argv = vec!["qcc".to_string(), "-c".to_string(), "a.c".to_string(), "-o".to_string(), "a.o".to_string()];
        wrapper.resolve_args(&argv).unwrap();
        assert_eq!(wrapper.output_path, Some(PathBuf::from("a.o")));
    }
}
