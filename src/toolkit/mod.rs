// Copyright 2025 Roberto Antunes
//
// Licensed under the Functional Source License, Version 1.1 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://github.com/RobAntunes/lingodb/blob/main/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Timeout-bounded invocation of the external toolkit: `foma`,
//! `flookup`, `tgrep2`, and the n-gram estimator.
//!
//! Every external process runs under an enforced wall-clock limit. On
//! expiry the child is killed and the caller receives a result marked
//! `timed_out`; status-recording callers translate that into their
//! "… timed out." message rather than propagating an error.

use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::{OldbError, Result};

/// Captured outcome of one external process run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Collected stdout.
    pub stdout: String,
    /// Collected stderr.
    pub stderr: String,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Whether the process was killed on timeout.
    pub timed_out: bool,
}

impl RunOutput {
    /// The last few lines of stderr, for status messages.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(5);
        lines[start..].join("\n")
    }
}

/// Run `cmd`, optionally feeding `stdin_data`, killing the child after
/// `timeout`.
///
/// stdout/stderr are drained from helper threads to avoid pipe deadlock
/// on chatty tools; the child is polled with `try_wait` until the
/// deadline, then killed.
pub fn run_with_timeout(
    mut cmd: Command,
    stdin_data: Option<&str>,
    timeout: Duration,
) -> Result<RunOutput> {
    cmd.stdin(if stdin_data.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");
    // Drain before feeding stdin: a child that fills its output pipe
    // while we are still writing would otherwise deadlock.
    let out_handle = thread::spawn(move || drain(stdout));
    let err_handle = thread::spawn(move || drain(stderr));
    feed_stdin(&mut child, stdin_data)?;

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break Some(status),
            None if Instant::now() >= deadline => {
                warn!(timeout_secs = timeout.as_secs(), "external process timed out");
                timed_out = true;
                let _ = child.kill();
                break child.wait().ok();
            }
            None => thread::sleep(Duration::from_millis(20)),
        }
    };

    let stdout = out_handle.join().map_err(join_panic)?;
    let stderr = err_handle.join().map_err(join_panic)?;
    let success = !timed_out && status.map(|s| s.success()).unwrap_or(false);
    debug!(success, timed_out, "external process finished");
    Ok(RunOutput { stdout, stderr, success, timed_out })
}

fn feed_stdin(child: &mut Child, stdin_data: Option<&str>) -> Result<()> {
    if let Some(data) = stdin_data {
        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(data.as_bytes())?;
        // Dropping stdin closes the pipe so the child sees EOF.
    }
    Ok(())
}

fn drain(mut reader: impl std::io::Read) -> String {
    let mut buf = String::new();
    let _ = reader.read_to_string(&mut buf);
    buf
}

fn join_panic(_: Box<dyn std::any::Any + Send>) -> OldbError {
    OldbError::Io(std::io::Error::other("subprocess helper thread panicked"))
}

/// Whether `tool` resolves on the PATH.
pub fn installed(tool: &str) -> bool {
    let path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path).any(|dir| {
        let candidate = dir.join(tool);
        candidate.is_file()
    })
}

/// Whether both `foma` and `flookup` are installed.
pub fn foma_installed() -> bool {
    installed("foma") && installed("flookup")
}

/// Whether `tgrep2` is installed.
pub fn tgrep2_installed() -> bool {
    installed("tgrep2")
}

/// Apply a compiled FST to `inputs` via `flookup [-i] -x -b <binary>`.
///
/// `invert` selects apply-down (the `-i` flag); the default direction is
/// apply-up. Inputs are fed one per line; with `-x` flookup prints one
/// output per line with a blank line terminating each input's group,
/// which is zipped back onto the inputs positionally. The no-result
/// marker `+?` yields an empty group.
pub fn flookup(
    binary: &Path,
    inputs: &[String],
    invert: bool,
    timeout: Duration,
) -> Result<Vec<Vec<String>>> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }
    let mut cmd = Command::new("flookup");
    if invert {
        cmd.arg("-i");
    }
    cmd.arg("-x");
    cmd.arg("-b");
    cmd.arg(binary);
    let stdin = inputs.join("\n") + "\n";
    let output = run_with_timeout(cmd, Some(&stdin), timeout)?;
    if output.timed_out {
        return Err(OldbError::Timeout { tool: "flookup", seconds: timeout.as_secs() });
    }
    if !output.success {
        return Err(OldbError::ToolFailure {
            tool: "flookup",
            stderr: output.stderr_tail(),
        });
    }
    Ok(parse_flookup_output(&output.stdout, inputs.len()))
}

/// Split `flookup -x` output into per-input groups.
fn parse_flookup_output(stdout: &str, n_inputs: usize) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::with_capacity(n_inputs);
    let mut current: Vec<String> = Vec::new();
    for line in stdout.lines() {
        if line.trim().is_empty() {
            groups.push(std::mem::take(&mut current));
        } else if line != "+?" && line != "???" {
            current.push(line.to_string());
        }
    }
    if !current.is_empty() || groups.len() < n_inputs {
        groups.push(current);
    }
    groups.resize(n_inputs, Vec::new());
    groups
}
