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

//! Run a child process, capturing its stdout and stderr separately and
//! losslessly while still mirroring them to this process's own streams
//! (component N). On a cache hit we need the exact bytes the compiler would
//! have printed; on a miss we still want the developer watching the build to
//! see them as they happen.
//!
//! Both streams are drained on dedicated threads so a child that fills one
//! pipe's kernel buffer while nothing reads the other can't deadlock us --
//! the historical limitation being resolved here is stdout/stderr getting
//! merged onto one pipe (`spec.md` §9).

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::errors::*;

pub struct Invocation {
    pub std_out: Vec<u8>,
    pub std_err: Vec<u8>,
    pub return_code: i32,
}

/// Spawn `program` with `args` in `cwd` (inheriting this process's
/// environment plus `extra_env`), mirror its output live, and collect it.
pub fn run(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    extra_env: &HashMap<String, String>,
) -> Result<Invocation> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    cmd.stdin(Stdio::inherit());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .chain_err(|| format!("failed to launch {:?}", program))?;

    let mut child_stdout = child.stdout.take().expect("stdout was piped");
    let mut child_stderr = child.stderr.take().expect("stderr was piped");

    let stdout_thread = std::thread::spawn(move || drain_and_mirror(&mut child_stdout, &mut io::stdout()));
    let stderr_thread = std::thread::spawn(move || drain_and_mirror(&mut child_stderr, &mut io::stderr()));

    let std_out = stdout_thread.join().map_err(|_| Error::from("stdout reader thread panicked"))?;
    let std_err = stderr_thread.join().map_err(|_| Error::from("stderr reader thread panicked"))?;

    let status = child.wait().chain_err(|| format!("failed to wait on {:?}", program))?;
    let return_code = status.code().unwrap_or_else(|| exit_code_from_signal(&status));

    Ok(Invocation { std_out, std_err, return_code })
}

/// Copy every byte from `source` into an in-memory buffer while also
/// writing it straight through to `mirror`, so the parent's console sees
/// output incrementally rather than only after the child exits.
fn drain_and_mirror(source: &mut impl Read, mirror: &mut impl Write) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                captured.extend_from_slice(&chunk[..n]);
                let _ = mirror.write_all(&chunk[..n]);
            }
            Err(_) => break,
        }
    }
    let _ = mirror.flush();
    captured
}

#[cfg(unix)]
fn exit_code_from_signal(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    // Shells report a signal death as 128+signal; mirror that convention
    // since `return_code` feeds straight back into our own process exit.
    status.signal().map(|sig| 128 + sig).unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code_from_signal(_status: &std::process::ExitStatus) -> i32 {
    1
}

#[cfg(test)]
mod test {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_stderr_separately() {
        let invocation = run(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo out; echo err 1>&2; exit 7".to_string()],
            None,
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(invocation.std_out, b"out\n");
        assert_eq!(invocation.std_err, b"err\n");
        assert_eq!(invocation.return_code, 7);
    }

    #[cfg(unix)]
    #[test]
    fn extra_env_is_visible_to_the_child() {
        let mut env = HashMap::new();
        env.insert("BUILDCACHE_TEST_VAR".to_string(), "hello".to_string());
        let invocation = run(
            Path::new("/bin/sh"),
            &["-c".to_string(), "printf %s \"$BUILDCACHE_TEST_VAR\"".to_string()],
            None,
            &env,
        )
        .unwrap();
        assert_eq!(invocation.std_out, b"hello");
    }
}
