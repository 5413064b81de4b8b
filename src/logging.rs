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

//! Logging setup. `config.debug` holds a `log`-style filter string (e.g.
//! `"debug"`, `"info"`, or empty to disable); `config.log_file` optionally
//! redirects output to a file instead of stderr, which matters here since
//! stderr is also where a cached miss's mirrored compiler output goes.

use std::fs::OpenOptions;

use env_logger::Target;

pub fn init() {
    let config = crate::config::current();

    let mut builder = env_logger::Builder::new();
    if config.debug.is_empty() {
        builder.filter_level(log::LevelFilter::Off);
    } else {
        builder.parse_filters(&config.debug);
    }

    if !config.log_file.is_empty() {
        match OpenOptions::new().create(true).append(true).open(&config.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("buildcache: could not open log file {:?}: {}", config.log_file, e);
            }
        }
    }

    // `try_init()` rather than `init()`: a second call (e.g. from a test
    // harness) failing to install a second logger is not worth surfacing.
    let _ = builder.try_init();
}
