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

//! Texas Instruments code generation tools (`spec.md` §4.L): `cl6x`
//! (C6000), `armcl` (ARM), `clpru` (ARP32). All three share a
//! `--flag=value` grammar, response files, and a linker mode that's
//! cacheable only when explicitly enabled.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::cache_entry::ExpectedFile;
use crate::errors::*;
use crate::fs_util::TempFile;
use crate::hasher::Hasher;

use super::{Capabilities, Wrapper, CAP_HARD_LINKS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    C6x,
    Arm,
    Arp32,
}

impl Family {
    fn basename(self) -> &'static str {
        match self {
            Family::C6x => "cl6x",
            Family::Arm => "armcl",
            Family::Arp32 => "clpru",
        }
    }

    fn program_id_tag(self) -> &'static str {
        match self {
            Family::C6x => "buildcache-ti-c6x-v1",
            Family::Arm => "buildcache-ti-arm-v1",
            Family::Arp32 => "buildcache-ti-arp32-v1",
        }
    }
}

pub struct TiWrapper {
    family: Family,
    program: PathBuf,
    args: Vec<String>,
    expanded_args: Vec<String>,
    output_path: Option<PathBuf>,
    dependency_path: Option<PathBuf>,
    map_path: Option<PathBuf>,
    run_linker: bool,
    compile_only: bool,
}

impl TiWrapper {
    pub fn new(family: Family) -> Self {
        TiWrapper {
            family,
            program: PathBuf::new(),
            args: Vec::new(),
            expanded_args: Vec::new(),
            output_path: None,
            dependency_path: None,
            map_path: None,
            run_linker: false,
            compile_only: false,
        }
    }

    /// Expand `--cmd_file=path` and `-@path` response files one level deep
    /// (no nested response files: `spec.md` §4.L).
    fn expand_response_files(args: &[String]) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for arg in args {
            let response_path = arg
                .strip_prefix("--cmd_file=")
                .or_else(|| arg.strip_prefix("-@"))
                .map(PathBuf::from);
            match response_path {
                Some(path) => {
                    let contents = std::fs::read_to_string(&path)
                        .chain_err(|| format!("failed to read response file {:?}", path))?;
                    out.extend(contents.split_whitespace().map(|s| s.to_string()));
                }
                None => out.push(arg.clone()),
            }
        }
        Ok(out)
    }
}

impl Wrapper for TiWrapper {
    fn can_handle_command(&self, resolved_program: &Path, _argv: &[String]) -> bool {
        resolved_program
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case(self.family.basename()))
            .unwrap_or(false)
    }

    fn resolve_args(&mut self, argv: &[String]) -> Result<()> {
        self.program = PathBuf::from(&argv[0]);
        self.args = argv[1..].to_vec();
        self.expanded_args = Self::expand_response_files(&self.args)?;

        for arg in &self.expanded_args {
            if arg == "--compile_only" || arg == "-c" {
                self.compile_only = true;
            } else if arg == "--run_linker" || arg == "-z" {
                self.run_linker = true;
            } else if let Some(path) = arg.strip_prefix("--output_file=") {
                self.output_path = Some(PathBuf::from(path));
            } else if let Some(path) = arg.strip_prefix("--preproc_dependency=").or_else(|| arg.strip_prefix("-ppd=")) {
                self.dependency_path = Some(PathBuf::from(path));
            } else if let Some(path) = arg.strip_prefix("--map_file=") {
                self.map_path = Some(PathBuf::from(path));
            }
        }

        if self.run_linker && !crate::config::current().cache_link_commands {
            bail!(ErrorKind::WrapperDeclined("link commands are not cached".into()));
        }

        if self.output_path.is_none() {
            bail!(ErrorKind::WrapperDeclined("no --output_file= given".into()));
        }
        Ok(())
    }

    fn get_capabilities(&self) -> Capabilities {
        Capabilities::new(&[CAP_HARD_LINKS])
    }

    fn preprocess_source(&self) -> Result<Vec<u8>> {
        if self.run_linker {
            // Linking has no preprocessor step; the fingerprint is carried
            // entirely by `get_relevant_arguments`'s per-file hashing below.
            return Ok(Vec::new());
        }

        let filtered: Vec<String> = self
            .expanded_args
            .iter()
            .filter(|a| !a.starts_with("--output_file=") && *a != "--compile_only" && *a != "-c")
            .cloned()
            .collect();

        let dir = self.output_path.as_ref().and_then(|p| p.parent()).unwrap_or_else(|| Path::new("."));
        let tmp = TempFile::new(dir, "i")?;

        let status = Command::new(&self.program)
            .arg("--preproc_only")
            .args(&filtered)
            .arg(format!("--output_file={}", tmp.path().display()))
            .status()
            .chain_err(|| format!("failed to run preprocessor {:?}", self.program))?;
        if !status.success() {
            bail!(ErrorKind::WrapperDeclined(format!("preprocessor exited with {:?}", status.code())));
        }
        Ok(std::fs::read(tmp.path())?)
    }

    fn get_relevant_arguments(&self) -> Vec<String> {
        if !self.run_linker {
            return self
                .expanded_args
                .iter()
                .filter(|a| !a.starts_with("--output_file=") && !looks_like_source_file(a))
                .cloned()
                .collect();
        }

        // Link mode: every regular-file, non-flag argument contributes its
        // content to the fingerprint (`.cmd` files line-by-line, `-l"name"`
        // resolved and hashed as file content), since the linker's output
        // depends on file contents that an argument-only fingerprint would
        // miss entirely.
        let mut contributions = Vec::new();
        for arg in &self.expanded_args {
            if arg.starts_with("--output_file=") || arg.starts_with("--map_file=") {
                continue;
            }
            if let Some(lib) = arg.strip_prefix("-l\"").and_then(|s| s.strip_suffix('"')) {
                if let Ok(contents) = std::fs::read(lib) {
                    let mut h = Hasher::new();
                    h.update(&contents);
                    contributions.push(h.finalize().to_hex());
                }
                continue;
            }
            let path = Path::new(arg);
            if !arg.starts_with('-') && path.is_file() {
                if path.extension().and_then(|e| e.to_str()) == Some("cmd") {
                    if let Ok(text) = std::fs::read_to_string(path) {
                        contributions.extend(text.lines().map(|l| l.trim().to_string()));
                    }
                    continue;
                }
                if let Ok(contents) = std::fs::read(path) {
                    let mut h = Hasher::new();
                    h.update(&contents);
                    contributions.push(h.finalize().to_hex());
                    continue;
                }
            }
            contributions.push(arg.clone());
        }
        contributions
    }

    fn get_relevant_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn get_program_id(&self) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .arg("--compiler_revision")
            .output()
            .chain_err(|| format!("failed to run {:?} --compiler_revision", self.program))?;
        let mut id = self.family.program_id_tag().as_bytes().to_vec();
        id.push(0);
        id.extend_from_slice(&output.stdout);
        Ok(id)
    }

    fn get_build_files(&self) -> Vec<ExpectedFile> {
        let mut files = Vec::new();
        if let Some(output) = &self.output_path {
            let file_id = if self.run_linker { "linktarget" } else { "object" };
            files.push(ExpectedFile { file_id: file_id.into(), path: output.clone(), required: true });
        }
        if let Some(dep) = &self.dependency_path {
            files.push(ExpectedFile { file_id: "dep".into(), path: dep.clone(), required: false });
        }
        if let Some(map) = &self.map_path {
            files.push(ExpectedFile { file_id: "map".into(), path: map.clone(), required: false });
        }
        files
    }
}

fn looks_like_source_file(arg: &str) -> bool {
    if arg.starts_with('-') {
        return false;
    }
    matches!(Path::new(arg).extension().and_then(|e| e.to_str()), Some("c") | Some("cc") | Some("cpp") | Some("asm"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_own_family_basename_only() {
        let wrapper = TiWrapper::new(Family::C6x);
        assert_eq!(wrapper.family.basename(), "cl6x");
        let wrapper = TiWrapper::new(Family::Arm);
        assert_eq!(wrapper.family.basename(), "armcl");
        let wrapper = TiWrapper::new(Family::Arp32);
        assert_eq!(wrapper.family.basename(), "clpru");
    }

    #[test]
    fn resolve_args_requires_output_file() {
        let mut wrapper = TiWrapper::new(Family::C6x);
        let argv = vec!["cl6x".to_string(), "--compile_only".to_string(), "a.c".to_string()];
        assert!(wrapper.resolve_args(&argv).is_err());
    }

    #[test]
    fn resolve_args_picks_up_output_and_dep_and_map() {
        let mut wrapper = TiWrapper::new(Family::C6x);
        let argv = vec![
            "cl6x".to_string(),
            "--compile_only".to_string(),
            "a.c".to_string(),
            "--output_file=a.obj".to_string(),
            "--preproc_dependency=a.d".to_string(),
        ];
        wrapper.resolve_args(&argv).unwrap();
        let files = wrapper.get_build_files();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.file_id == "object"));
        assert!(files.iter().any(|f| f.file_id == "dep"));
    }
}
