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

//! External CLI interface (`spec.md` §6).
//!
//! `buildcache` wears two hats from the same binary: invoked as
//! `buildcache <options>` it manages the cache itself (clear, stats,
//! config); invoked as `buildcache <compiler> <compiler-args>` (or via a
//! symlink named after a compiler) it wraps that compiler. Only the
//! first argument's shape tells them apart, so this module peeks at it
//! before handing off to [`clap`].

use clap::Parser;
use number_prefix::NumberPrefix;

use crate::cache_stats::Stats;
use crate::compiler;
use crate::config;
use crate::local_cache::LocalCache;

#[derive(Parser)]
#[command(name = "buildcache", about = "A compiler-invocation cache.")]
struct Options {
    /// Clear the local cache.
    #[arg(short = 'C', long = "clear")]
    clear: bool,

    /// Show cache statistics.
    #[arg(short = 's', long = "show-stats")]
    show_stats: bool,

    /// Show the effective configuration.
    #[arg(short = 'c', long = "show-config")]
    show_config: bool,

    /// Zero the cache statistics counters.
    #[arg(short = 'z', long = "zero-stats")]
    zero_stats: bool,

    /// Open the configuration file in $VISUAL/$EDITOR.
    #[arg(short = 'e', long = "edit-config")]
    edit_config: bool,
}

const OWN_FLAGS: &[&str] = &[
    "-C", "--clear", "-s", "--show-stats", "-c", "--show-config", "-z", "--zero-stats", "-e", "--edit-config",
    "-h", "--help", "-V", "--version",
];

/// Entry point shared by `main`: `argv[0]` is the path this binary was
/// invoked as (only meaningful when it's a compiler symlink).
pub fn run(argv: Vec<String>) -> i32 {
    if argv.len() < 2 {
        print_help();
        return 0;
    }

    if OWN_FLAGS.contains(&argv[1].as_str()) {
        return run_own_command(&argv);
    }

    compiler::dispatch(argv[1..].to_vec(), config::current())
}

fn run_own_command(argv: &[String]) -> i32 {
    if argv.get(1).map(|a| a == "-V" || a == "--version").unwrap_or(false) {
        print_version();
        return 0;
    }

    let options = match Options::try_parse_from(argv) {
        Ok(o) => o,
        Err(e) => {
            // `--help`/`--version` round-trip through here too, as a
            // "successful" error carrying an exit code of 0.
            let code = e.exit_code();
            let _ = e.print();
            return code;
        }
    };

    let config = config::current();
    let cache = LocalCache::new(config.dir.clone(), config.remote_locks);

    if options.clear {
        cache.clear();
        println!("Cache cleared.");
    }
    if options.zero_stats {
        cache.zero_stats();
        println!("Statistics zeroed.");
    }
    if options.show_stats {
        print_stats(&cache.show_stats(), cache.total_size());
    }
    if options.show_config {
        print_config(config);
    }
    if options.edit_config {
        if let Err(e) = edit_config(config) {
            eprintln!("buildcache: {}", e);
            return 1;
        }
    }
    0
}

fn print_stats(stats: &Stats, total_size: u64) {
    println!("buildcache statistics:");
    println!("  Cache hits (local)  : {}", stats.local_hits);
    println!("  Cache misses (local): {}", stats.local_misses);
    println!("  Cache hits (remote) : {}", stats.remote_hits);
    println!("  Cache misses (remote): {}", stats.remote_misses);
    println!("  Hit rate            : {:.1}%", stats.hit_rate());
    println!("  Cache size          : {}", human_bytes(total_size));
}

fn human_bytes(bytes: u64) -> String {
    match NumberPrefix::binary(bytes as f64) {
        NumberPrefix::Standalone(b) => format!("{} bytes", b),
        NumberPrefix::Prefixed(prefix, n) => format!("{:.1} {}B", n, prefix),
    }
}

fn print_config(config: &config::Config) {
    println!("buildcache configuration:");
    println!("  dir                 : {}", config.dir.display());
    println!("  max_cache_size      : {}", human_bytes(config.max_cache_size));
    println!("  max_local_entry_size: {}", human_bytes(config.max_local_entry_size));
    println!("  max_remote_entry_size: {}", human_bytes(config.max_remote_entry_size));
    println!("  hard_links          : {}", config.hard_links);
    println!("  compress            : {}", config.compress);
    println!("  compress_format     : {:?}", config.compress_format);
    println!("  remote              : {}", config.remote);
    println!("  remote_locks        : {}", config.remote_locks);
    println!("  read_only           : {}", config.read_only);
    println!("  read_only_remote    : {}", config.read_only_remote);
    println!("  accuracy            : {}", config.accuracy);
    println!("  impersonate         : {}", config.impersonate);
    println!("  prefix              : {}", config.prefix);
    println!("  terminate_on_miss   : {}", config.terminate_on_miss);
    println!("  lua_paths           : {}", config.lua_paths.join(", "));
    println!("  hash_extra_files    : {}", config.hash_extra_files.join(", "));
    println!("  disable             : {}", config.disable);
    println!("  cache_link_commands : {}", config.cache_link_commands);
    println!("  config file         : {}", config.config_file().display());
}

fn edit_config(config: &config::Config) -> std::io::Result<()> {
    let path = config.config_file();
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, "{}\n")?;
    }

    let editor = std::env::var("VISUAL").or_else(|_| std::env::var("EDITOR")).unwrap_or_else(|_| "vi".to_string());
    let status = std::process::Command::new(editor).arg(&path).status()?;
    if !status.success() {
        return Err(std::io::Error::new(std::io::ErrorKind::Other, format!("editor exited with {:?}", status.code())));
    }
    Ok(())
}

pub fn print_help() {
    use clap::CommandFactory;
    println!("{}", Options::command().render_help());
}

/// `-V`/`--version`: lists the supported cache back ends and the crates
/// providing them, not just this binary's own version.
fn print_version() {
    println!("buildcache {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Supported back ends:");
    println!("  local - Local file system based cache (level 1)");
    println!("  Redis - Remote in-memory cache (level 2)");
    println!("  HTTP  - Remote webdav-style cache (level 2)");
    println!("  S3    - Remote object storage based cache (level 2)");
    println!();
    println!("Third party components:");
    println!("  clap 4");
    println!("  error-chain 0.12");
    println!("  lz4 1.24");
    println!("  zstd 0.13");
    println!("  twox-hash 1.6");
    println!("  redis 0.25");
    println!("  reqwest 0.12");
    println!("  serde_json 1.0");
}
