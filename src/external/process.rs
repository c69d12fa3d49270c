use std::{
    env,
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::tasks::CancelFlag;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL_LINES: usize = 5;

/// Runs external commands with an optional deadline, killing them on timeout or interrupt.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    cancel: CancelFlag,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>, cancel: CancelFlag) -> Self {
        Self { timeout, cancel }
    }

    #[must_use]
    pub fn without_timeout(&self) -> Self {
        Self {
            timeout: None,
            cancel: self.cancel.clone(),
        }
    }

    /// Runs `command` to completion and returns its trimmed stdout.
    ///
    /// `label` names the command in errors and logs; arguments are left out so
    /// credentials passed on the command line never reach the output.
    pub fn run(&self, command: &mut Command, label: &str) -> Result<String> {
        debug!(command = label, "spawning");
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn `{label}`"))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait(&mut child, label)?;
        let stdout = collect(stdout);
        let stderr = collect(stderr);

        if !status.success() {
            return Err(anyhow!(
                "`{label}` exited with status {}: {}",
                describe_status(&status),
                tail(&stderr, STDERR_TAIL_LINES)
            ));
        }
        Ok(stdout.trim().to_string())
    }

    /// Polls `child` until it exits, the deadline passes, or the run is interrupted.
    pub fn wait(&self, child: &mut Child, label: &str) -> Result<ExitStatus> {
        let start = Instant::now();
        loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed polling `{label}`"))?
            {
                return Ok(status);
            }

            if self.cancel.is_cancelled() {
                stop(child);
                return Err(anyhow!("`{label}` cancelled by interrupt"));
            }

            if let Some(limit) = self.timeout {
                if start.elapsed() > limit {
                    stop(child);
                    return Err(anyhow!("`{label}` exceeded {:?} timeout", limit));
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Finds `program` the way a shell would: as a path if it has separators, else on `PATH`.
pub fn locate(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

fn tail(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = kept.len().saturating_sub(lines);
    let joined = kept[start..].join(" | ");
    if joined.is_empty() {
        "no error output".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_last_non_empty_lines() {
        let text = "one\n\ntwo\nthree\n  \nfour\n";
        assert_eq!(tail(text, 2), "three | four");
        assert_eq!(tail("", 3), "no error output");
    }

    #[test]
    fn locate_rejects_missing_paths() {
        assert!(locate("/definitely/missing/binary").is_none());
        assert!(locate("definitely-not-a-real-program-name").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn locate_finds_shell() {
        assert!(locate("sh").is_some());
        assert!(locate("/bin/sh").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn run_returns_stdout() {
        let runner = ProcessRunner::default();
        let out = runner
            .run(Command::new("sh").args(["-c", "echo hello"]), "sh echo")
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_reports_status_and_stderr() {
        let runner = ProcessRunner::default();
        let error = runner
            .run(
                Command::new("sh").args(["-c", "echo broken >&2; exit 3"]),
                "sh fail",
            )
            .unwrap_err();
        let message = error.to_string();
        assert!(message.contains("status 3"), "{message}");
        assert!(message.contains("broken"), "{message}");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_long_running_command() {
        let runner = ProcessRunner::new(Some(Duration::from_millis(100)), CancelFlag::new());
        let started = Instant::now();
        let error = runner
            .run(Command::new("sleep").arg("5"), "sleep")
            .unwrap_err();
        assert!(error.to_string().contains("timeout"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn interrupt_kills_running_command() {
        let cancel = CancelFlag::new();
        let runner = ProcessRunner::new(None, cancel.clone());
        let trigger = cancel.clone();
        let killer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        let error = runner
            .run(Command::new("sleep").arg("5"), "sleep")
            .unwrap_err();
        killer.join().unwrap();
        assert!(error.to_string().contains("cancelled"));
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let runner = ProcessRunner::default();
        let error = runner
            .run(&mut Command::new("/definitely/missing/binary"), "missing")
            .unwrap_err();
        assert!(error.to_string().contains("failed to spawn"));
    }
}
