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

//! MSVC (`cl.exe`) wrapper (`spec.md` §4.L). Shared by [`super::clang_cl`],
//! which accepts the same flag grammar.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::cache_entry::ExpectedFile;
use crate::errors::*;
use crate::fs_util::TempFile;

use super::{Capabilities, Wrapper, CAP_HARD_LINKS};

pub struct MsvcWrapper {
    program: PathBuf,
    args: Vec<String>,
    output_path: Option<PathBuf>,
    basename_matcher: fn(&str) -> bool,
    program_id_tag: &'static str,
}

fn is_cl(basename: &str) -> bool {
    basename.eq_ignore_ascii_case("cl")
}

impl MsvcWrapper {
    pub fn new() -> Self {
        MsvcWrapper {
            program: PathBuf::new(),
            args: Vec::new(),
            output_path: None,
            basename_matcher: is_cl,
            program_id_tag: "buildcache-msvc-v1",
        }
    }

    pub(crate) fn with_matcher(matcher: fn(&str) -> bool, tag: &'static str) -> Self {
        MsvcWrapper {
            program: PathBuf::new(),
            args: Vec::new(),
            output_path: None,
            basename_matcher: matcher,
            program_id_tag: tag,
        }
    }
}

impl Wrapper for MsvcWrapper {
    fn can_handle_command(&self, resolved_program: &Path, _argv: &[String]) -> bool {
        resolved_program
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| (self.basename_matcher)(s))
            .unwrap_or(false)
    }

    fn resolve_args(&mut self, argv: &[String]) -> Result<()> {
        self.program = PathBuf::from(&argv[0]);
        self.args = argv[1..].to_vec();

        for arg in &self.args {
            if arg.starts_with('@') {
                bail!(ErrorKind::WrapperDeclined("response files are not supported".into()));
            }
            if arg.eq_ignore_ascii_case("/Zi") || arg.eq_ignore_ascii_case("/ZI") {
                bail!(ErrorKind::WrapperDeclined(format!("unsupported debug-info flag {:?}", arg)));
            }
        }

        let mut output = None;
        for arg in &self.args {
            if let Some(rest) = strip_ci_prefix(arg, "/Fo") {
                if !rest.is_empty() {
                    output = Some(PathBuf::from(rest));
                }
            }
        }

        self.output_path = match output {
            Some(p) => Some(p),
            None => bail!(ErrorKind::WrapperDeclined("no /Fo output path given".into())),
        };
        Ok(())
    }

    fn get_capabilities(&self) -> Capabilities {
        Capabilities::new(&[CAP_HARD_LINKS])
    }

    fn preprocess_source(&self) -> Result<Vec<u8>> {
        let filtered: Vec<String> = self
            .args
            .iter()
            .filter(|a| {
                !a.eq_ignore_ascii_case("/c")
                    && strip_ci_prefix(a, "/Fo").is_none()
                    && !a.eq_ignore_ascii_case("/C")
                    && !a.eq_ignore_ascii_case("/E")
            })
            .cloned()
            .collect();

        let dir = self.output_path.as_ref().and_then(|p| p.parent()).unwrap_or_else(|| Path::new("."));
        let tmp = TempFile::new(dir, "i")?;

        let output = Command::new(&self.program)
            .arg("/EP")
            .args(&filtered)
            .output()
            .chain_err(|| format!("failed to run preprocessor {:?}", self.program))?;
        if !output.status.success() {
            bail!(ErrorKind::WrapperDeclined(format!("preprocessor exited with {:?}", output.status.code())));
        }
        std::fs::write(tmp.path(), &output.stdout)?;
        Ok(output.stdout)
    }

    fn get_relevant_arguments(&self) -> Vec<String> {
        self.args
            .iter()
            .filter(|a| {
                let is_bare_f = a.as_str() == "/F";
                let drop_f = a.starts_with("/F") && !is_bare_f;
                !drop_f && !a.starts_with("/I") && !a.starts_with("/D") && !looks_like_source_file(a)
            })
            .cloned()
            .collect()
    }

    fn get_relevant_env_vars(&self) -> Vec<(String, String)> {
        ["CL", "_CL_"]
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
            .collect()
    }

    fn get_program_id(&self) -> Result<Vec<u8>> {
        // `cl.exe` run with no arguments prints its version banner on
        // stderr and exits non-zero; that's expected here.
        let output = Command::new(&self.program)
            .output()
            .chain_err(|| format!("failed to run {:?}", self.program))?;
        let mut id = self.program_id_tag.as_bytes().to_vec();
        id.push(0);
        id.extend_from_slice(&output.stderr);
        Ok(id)
    }

    fn get_build_files(&self) -> Vec<ExpectedFile> {
        match &self.output_path {
            Some(output) => vec![ExpectedFile { file_id: "object".into(), path: output.clone(), required: true }],
            None => Vec::new(),
        }
    }
}

fn strip_ci_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn looks_like_source_file(arg: &str) -> bool {
    if arg.starts_with('/') || arg.starts_with('-') {
        return false;
    }
    matches!(Path::new(arg).extension().and_then(|e| e.to_str()), Some("c") | Some("cc") | Some("cpp") | Some("cxx"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_zi_debug_flag() {
        let mut wrapper = MsvcWrapper::new();
        let argv = vec![
            "cl".to_string(),
            "/Zi".to_string(),
            "/c".to_string(),
            "foo.c".to_string(),
            "/Fofoo.obj".to_string(),
        ];
        assert!(wrapper.resolve_args(&argv).is_err());
    }

    #[test]
    fn rejects_response_files() {
        let mut wrapper = MsvcWrapper::new();
        let argv = vec!["cl".to_string(), "@args.rsp".to_string()];
        assert!(wrapper.resolve_args(&argv).is_err());
    }

    #[test]
    fn accepts_plain_compile() {
        let mut wrapper = MsvcWrapper::new();
        let argv = vec!["cl".to_string(), "/c".to_string(), "foo.c".to_string(), "/Fofoo.obj".to_string()];
        wrapper.resolve_args(&argv).unwrap();
        assert_eq!(wrapper.output_path, Some(PathBuf::from("foo.obj")));
    }
}
