//! External command execution for producers and verification checks.

use crate::util::{command_label, run_command_with_timeout, tail_chars};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;
const OUTPUT_TAIL_MAX_CHARS: usize = 4_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, cwd: impl AsRef<Path>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            env: Vec::new(),
        }
    }

    pub fn args<S: AsRef<str>>(mut self, args: &[S]) -> Self {
        self.args = args.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }

    pub fn with_env<'a>(mut self, env: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        self.env
            .extend(env.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn label(&self) -> String {
        command_label(&self.program, &self.args)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub name: String,
    pub command: String,
    pub duration_ms: u64,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    /// Set when the command could not be started at all.
    pub note: Option<String>,
}

impl CommandOutcome {
    /// The process ran to completion (whatever its exit code).
    pub fn completed(&self) -> bool {
        self.note.is_none() && !self.timed_out
    }

    pub fn combined_output(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }

    pub fn output_tail(&self) -> String {
        tail_chars(self.combined_output().trim_end(), OUTPUT_TAIL_MAX_CHARS)
    }

    /// One-line description of a failure, for logs and history records.
    pub fn failure_summary(&self) -> String {
        if let Some(note) = &self.note {
            return format!("{} could not run: {}", self.command, note);
        }
        if self.timed_out {
            return format!("{} timed out after {}ms", self.command, self.duration_ms);
        }
        let exit = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let last_line = self
            .combined_output()
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(|l| format!(": {}", crate::util::truncate(l, 200)))
            .unwrap_or_default();
        format!("{} failed (exit {}){}", self.command, exit, last_line)
    }
}

pub fn run_command(spec: &CommandSpec) -> CommandOutcome {
    let mut command = Command::new(&spec.program);
    command.current_dir(&spec.cwd).args(&spec.args);
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let start = Instant::now();
    let label = spec.label();

    match run_command_with_timeout(&mut command, spec.timeout) {
        Ok(result) => CommandOutcome {
            name: spec.name.clone(),
            command: label,
            duration_ms: start.elapsed().as_millis() as u64,
            success: result.success(),
            exit_code: result.status.and_then(|s| s.code()),
            timed_out: result.timed_out,
            stdout: result.stdout,
            stderr: result.stderr,
            note: None,
        },
        Err(error) => CommandOutcome {
            name: spec.name.clone(),
            command: label,
            duration_ms: start.elapsed().as_millis() as u64,
            success: false,
            exit_code: None,
            timed_out: false,
            stdout: String::new(),
            stderr: String::new(),
            note: Some(error),
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn captures_output_and_exit_code() {
        let tmp = TempDir::new().unwrap();
        let spec = CommandSpec::new("echo", tmp.path(), "sh").args(&["-c", "echo out; echo err >&2; exit 3"]);
        let outcome = run_command(&spec);
        assert!(!outcome.success);
        assert!(outcome.completed());
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
        assert_eq!(outcome.failure_summary(), "sh -c echo out; echo err >&2; exit 3 failed (exit 3): err");
    }

    #[test]
    fn missing_program_is_reported_not_panicked() {
        let tmp = TempDir::new().unwrap();
        let outcome = run_command(&CommandSpec::new("nope", tmp.path(), "remedy-no-such-binary"));
        assert!(!outcome.success);
        assert!(!outcome.completed());
        assert!(outcome.failure_summary().contains("could not run"));
    }

    #[test]
    fn slow_commands_time_out() {
        let tmp = TempDir::new().unwrap();
        let mut spec = CommandSpec::new("sleep", tmp.path(), "sleep").args(&["5"]);
        spec.timeout = Duration::from_millis(100);
        let outcome = run_command(&spec);
        assert!(outcome.timed_out);
        assert!(!outcome.success);
    }
}
