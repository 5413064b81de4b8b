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

//! End-to-end scenarios driving the real `buildcache` binary against a
//! stand-in compiler (a shell script, so these only run on unix).

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use assert_cmd::Command;

/// Write an executable shell script at `path`.
fn write_script(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

/// A fake `gcc`: `--version` prints a fixed banner; `-E` mode writes a fixed
/// preprocessed stand-in to its `-o` target; otherwise it's a "real" compile
/// that appends to a run-count log (so the test can tell whether the second
/// invocation actually re-ran it) and writes a fixed object file.
const FAKE_GCC: &str = r#"#!/bin/sh
echo "$@" >> "$FAKE_GCC_LOG"

if [ "$1" = "--version" ]; then
  echo "fakegcc version 1.0"
  exit 0
fi

is_preprocess=0
out=""
prev_was_o=0
for arg in "$@"; do
  if [ "$prev_was_o" = "1" ]; then
    out="$arg"
    prev_was_o=0
    continue
  fi
  case "$arg" in
    -E) is_preprocess=1 ;;
    -o) prev_was_o=1 ;;
  esac
done

if [ "$is_preprocess" = "1" ]; then
  printf 'PREPROCESSED\n' > "$out"
  exit 0
fi

echo run >> "$FAKE_GCC_RUN_COUNT"
printf 'OBJECT-CONTENT\n' > "$out"
exit 0
"#;

/// A fake `cl`: records every invocation, and if given an `/Fo<path>` flag
/// writes a fixed object file. Used for the `/Zi` rejection scenario, where
/// buildcache must fall back to running this directly.
const FAKE_CL: &str = r#"#!/bin/sh
echo "$@" >> "$FAKE_CL_LOG"
out=""
for arg in "$@"; do
  case "$arg" in
    /Fo*) out="${arg#/Fo}" ;;
  esac
done
if [ -n "$out" ]; then
  printf 'OBJECT-CONTENT\n' > "$out"
fi
exit 0
"#;

#[test]
fn s1_repeat_invocation_is_served_from_cache() {
    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();

    let gcc_path = work_dir.path().join("gcc");
    write_script(&gcc_path, FAKE_GCC);

    let log_path = work_dir.path().join("invocations.log");
    let run_count_path = work_dir.path().join("run_count.log");
    fs::write(&log_path, "").unwrap();
    fs::write(&run_count_path, "").unwrap();

    let source = work_dir.path().join("a.c");
    fs::write(&source, "int main(void) { return 0; }\n").unwrap();
    let object = work_dir.path().join("a.o");

    let run = || {
        let mut cmd = Command::cargo_bin("buildcache").unwrap();
        cmd.current_dir(work_dir.path())
            .env("BUILDCACHE_DIR", cache_dir.path())
            .env("FAKE_GCC_LOG", &log_path)
            .env("FAKE_GCC_RUN_COUNT", &run_count_path)
            .arg(&gcc_path)
            .arg("-c")
            .arg("a.c")
            .arg("-o")
            .arg("a.o");
        cmd.assert().success();
    };

    run();
    assert_eq!(fs::read_to_string(&object).unwrap(), "OBJECT-CONTENT\n");
    let runs_after_first = fs::read_to_string(&run_count_path).unwrap().lines().count();
    assert_eq!(runs_after_first, 1, "first invocation must be a real compile");

    fs::remove_file(&object).unwrap();
    run();
    assert_eq!(fs::read_to_string(&object).unwrap(), "OBJECT-CONTENT\n");
    let runs_after_second = fs::read_to_string(&run_count_path).unwrap().lines().count();
    assert_eq!(runs_after_second, 1, "second invocation must be served from cache, not re-run");
}

#[test]
fn s6_msvc_zi_flag_falls_back_to_uncached_run() {
    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();

    let cl_path = work_dir.path().join("cl");
    write_script(&cl_path, FAKE_CL);

    let log_path = work_dir.path().join("invocations.log");
    fs::write(&log_path, "").unwrap();

    let source = work_dir.path().join("a.c");
    fs::write(&source, "int main(void) { return 0; }\n").unwrap();
    let object = work_dir.path().join("a.obj");

    let mut cmd = Command::cargo_bin("buildcache").unwrap();
    cmd.current_dir(work_dir.path())
        .env("BUILDCACHE_DIR", cache_dir.path())
        .env("FAKE_CL_LOG", &log_path)
        .arg(&cl_path)
        .arg("/Zi")
        .arg("/c")
        .arg("a.c")
        .arg("/Foa.obj");
    cmd.assert().success();

    assert_eq!(fs::read_to_string(&object).unwrap(), "OBJECT-CONTENT\n");
    let invocations = fs::read_to_string(&log_path).unwrap();
    assert!(invocations.contains("/Zi"), "the real tool must still have been run directly");
}
