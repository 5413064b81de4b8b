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

//! Wrapper contract and dispatch (component K), plus the built-in concrete
//! wrappers (component L).
//!
//! A wrapper is a value, resolved once per invocation, that knows how to
//! turn one compiler command line into a fingerprint and a set of expected
//! output files. Dispatch tries a `.lua`-script wrapper first (here, only
//! the match-and-decline hook point -- see [`script`]), then the built-ins
//! in a fixed order, then falls through to running the command uncached.

pub mod analyzer;
pub mod clang_cl;
pub mod gcc;
pub mod ghs;
pub mod msvc;
pub mod qcc;
pub mod script;
pub mod ti;

use std::collections::HashSet;
use std::path::PathBuf;

use log::{debug, info};

use crate::cache_entry::{CacheEntry, CompressionMode, ExpectedFile};
use crate::config::Config;
use crate::engine::{Engine, Lookup};
use crate::errors::*;
use crate::fs_util;
use crate::hasher::Hasher;
use crate::subprocess;

/// What a wrapper can do beyond the baseline miss/hit cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    flags: HashSet<&'static str>,
}

impl Capabilities {
    pub fn new(flags: &[&'static str]) -> Self {
        Capabilities { flags: flags.iter().copied().collect() }
    }

    pub fn has(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

pub const CAP_HARD_LINKS: &str = "hard_links";

/// The capability set every built-in and script wrapper is polymorphic
/// over (`spec.md` §4.K).
pub trait Wrapper {
    /// Does this wrapper recognize `argv[0]`'s resolved basename?
    fn can_handle_command(&self, resolved_program: &std::path::Path, argv: &[String]) -> bool;

    /// Expand response files etc.; may fail fatally if the invocation can't
    /// be reproduced under caching (`spec.md` §7, fatal-to-invocation).
    fn resolve_args(&mut self, argv: &[String]) -> Result<()>;

    fn get_capabilities(&self) -> Capabilities;

    /// Bytes representing the preprocessed source (or another
    /// deterministic stand-in for it).
    fn preprocess_source(&self) -> Result<Vec<u8>>;

    fn get_relevant_arguments(&self) -> Vec<String>;

    fn get_relevant_env_vars(&self) -> Vec<(String, String)>;

    fn get_program_id(&self) -> Result<Vec<u8>>;

    fn get_build_files(&self) -> Vec<ExpectedFile>;

    /// Run the real tool for a cache miss. The default dispatches through
    /// `config.prefix` + the resolved program + the original argv.
    fn run_for_miss(&self, program: &std::path::Path, argv: &[String], config: &Config) -> Result<subprocess::Invocation> {
        let (prog, mut args) = if config.prefix.is_empty() {
            (program.to_path_buf(), Vec::new())
        } else {
            let mut parts = config.prefix.split_whitespace();
            let prefix_prog = parts.next().unwrap_or_default();
            let rest: Vec<String> = parts.map(|s| s.to_string()).collect();
            (PathBuf::from(prefix_prog), [rest, vec![program.display().to_string()]].concat())
        };
        args.extend(argv[1..].iter().cloned());
        subprocess::run(&prog, &args, None, &std::collections::HashMap::new())
    }
}

/// Run the 6-step dispatch algorithm over `argv` (`argv[0]` is the command
/// as invoked, unresolved). Returns the process exit code.
pub fn dispatch(mut argv: Vec<String>, config: &'static Config) -> i32 {
    if let Ok(impersonate) = std::env::var("BUILDCACHE_IMPERSONATE") {
        if !impersonate.is_empty() {
            argv[0] = impersonate;
        }
    }

    let self_basename = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "buildcache".to_string());

    let argv0_basename = std::path::Path::new(&argv[0])
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if argv0_basename.eq_ignore_ascii_case(&self_basename) {
        crate::cli::print_help();
        return 0;
    }

    let resolved = match fs_util::find_executable(std::ffi::OsStr::new(&argv[0]), &self_basename) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("buildcache: {}", e);
            return 1;
        }
    };

    if config.disable {
        info!("cache disabled, running {:?} directly", resolved);
        return run_uncached(&resolved, &argv);
    }

    for path in script::lua_wrappers(config) {
        let mut wrapper = script::ScriptWrapper::new(path);
        if wrapper.can_handle_command(&resolved, &argv) {
            return handle_with(&mut wrapper, &resolved, argv, config);
        }
    }

    macro_rules! try_builtin {
        ($ctor:expr) => {{
            let mut wrapper = $ctor;
            if wrapper.can_handle_command(&resolved, &argv) {
                return handle_with(&mut wrapper, &resolved, argv, config);
            }
        }};
    }

    try_builtin!(gcc::GccWrapper::new());
    try_builtin!(ghs::GhsWrapper::new());
    try_builtin!(msvc::MsvcWrapper::new());
    try_builtin!(clang_cl::ClangClWrapper::new());
    try_builtin!(ti::TiWrapper::new(ti::Family::C6x));
    try_builtin!(ti::TiWrapper::new(ti::Family::Arm));
    try_builtin!(ti::TiWrapper::new(ti::Family::Arp32));
    try_builtin!(analyzer::AnalyzerWrapper::new());
    try_builtin!(qcc::QccWrapper::new());

    debug!("no wrapper matched {:?}, running uncached", resolved);
    run_uncached(&resolved, &argv)
}

fn run_uncached(program: &std::path::Path, argv: &[String]) -> i32 {
    match subprocess::run(program, &argv[1..], None, &std::collections::HashMap::new()) {
        Ok(invocation) => invocation.return_code,
        Err(e) => {
            eprintln!("buildcache: failed to run {:?}: {}", program, e);
            1
        }
    }
}

/// `handle_command`: the wrapper-agnostic orchestration body of §4.K.
fn handle_with(wrapper: &mut dyn Wrapper, program: &std::path::Path, argv: Vec<String>, config: &'static Config) -> i32 {
    if let Err(e) = wrapper.resolve_args(&argv) {
        debug!("wrapper declined {:?}: {}", program, e);
        return run_uncached(program, &argv);
    }

    let capabilities = wrapper.get_capabilities();
    let compression_mode = if config.compress { CompressionMode::All } else { CompressionMode::None };
    let allow_hard_links = capabilities.has(CAP_HARD_LINKS) && config.hard_links && compression_mode == CompressionMode::None;

    let hash = match compute_fingerprint(wrapper, config) {
        Ok(h) => h,
        Err(e) => {
            debug!("failed to compute fingerprint, running uncached: {}", e);
            return run_uncached(program, &argv);
        }
    };

    let expected_files = wrapper.get_build_files();
    let engine = Engine::new(config);

    if let Lookup::Hit = engine.lookup(&hash, &expected_files, allow_hard_links) {
        info!("cache hit for {:?}", program);
        return 0;
    }

    if config.terminate_on_miss {
        return 1;
    }

    let invocation = match wrapper.run_for_miss(program, &argv, config) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("buildcache: failed to launch {:?}: {}", program, e);
            return 1;
        }
    };

    if invocation.return_code != 0 || expected_files.iter().any(|f| f.required && !f.path.exists()) {
        return invocation.return_code;
    }

    let entry = match CacheEntry::new(
        expected_files.iter().map(|f| f.file_id.clone()).collect(),
        compression_mode,
        invocation.std_out,
        invocation.std_err,
        invocation.return_code,
    ) {
        Ok(e) => e,
        Err(e) => {
            debug!("could not build cache entry: {}", e);
            return invocation.return_code;
        }
    };

    engine.add(&hash, &entry, &expected_files, allow_hard_links);
    invocation.return_code
}

fn compute_fingerprint(wrapper: &dyn Wrapper, config: &Config) -> Result<crate::hasher::Hash> {
    let mut hasher = Hasher::new();
    hasher.update(&wrapper.get_program_id()?);
    hasher.inject_separator();
    hasher.update_seq(&wrapper.get_relevant_arguments());
    hasher.inject_separator();
    let env_vars: std::collections::BTreeMap<String, String> = wrapper.get_relevant_env_vars().into_iter().collect();
    hasher.update_map(&env_vars);
    hasher.inject_separator();
    hasher.update(&wrapper.preprocess_source()?);
    hasher.inject_separator();
    for path in &config.hash_extra_files {
        hasher.update_from_file_deterministic(std::path::Path::new(path))?;
    }
    Ok(hasher.finalize())
}

/// Shared plumbing used by several GCC-family wrappers: filter out flags
/// (and, for some flags, their following argument) that don't affect the
/// compiled output's identity.
pub(crate) fn filter_args(args: &[String], drop_prefixes: &[&str], drop_with_value: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if drop_with_value.iter().any(|p| arg == p) {
            skip_next = true;
            continue;
        }
        if drop_prefixes.iter().any(|p| arg.starts_with(p)) {
            continue;
        }
        out.push(arg.clone());
    }
    out
}
