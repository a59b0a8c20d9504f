//! Regression verification: did the change keep the project green?

use crate::command::{run_command, CommandOutcome, CommandSpec};
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Pass/fail judgement on the working tree as it is right now.
pub trait Verifier {
    fn verify(&self, repo_root: &Path) -> VerificationOutcome;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    TimedOut,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub name: String,
    pub command: String,
    pub status: CheckStatus,
    pub duration_ms: u64,
    pub output_tail: String,
}

impl CheckResult {
    fn from_outcome(outcome: &CommandOutcome) -> Self {
        let status = if outcome.success {
            CheckStatus::Passed
        } else if outcome.timed_out {
            CheckStatus::TimedOut
        } else if outcome.note.is_some() {
            CheckStatus::Error
        } else {
            CheckStatus::Failed
        };
        Self {
            name: outcome.name.clone(),
            command: outcome.command.clone(),
            status,
            duration_ms: outcome.duration_ms,
            output_tail: outcome.output_tail(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub passed: bool,
    pub summary: String,
    pub checks: Vec<CheckResult>,
}

impl VerificationOutcome {
    pub fn pass(summary: impl Into<String>) -> Self {
        Self {
            passed: true,
            summary: summary.into(),
            checks: Vec::new(),
        }
    }

    pub fn fail(summary: impl Into<String>) -> Self {
        Self {
            passed: false,
            summary: summary.into(),
            checks: Vec::new(),
        }
    }
}

/// Detected project type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Rust,
    Node,
    Python,
    Go,
    Unknown,
}

impl ProjectType {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectType::Rust => "Rust",
            ProjectType::Node => "Node.js",
            ProjectType::Python => "Python",
            ProjectType::Go => "Go",
            ProjectType::Unknown => "Unknown",
        }
    }
}

pub fn detect_project_type(repo_root: &Path) -> ProjectType {
    if repo_root.join("Cargo.toml").exists() {
        ProjectType::Rust
    } else if repo_root.join("package.json").exists() {
        ProjectType::Node
    } else if repo_root.join("pyproject.toml").exists()
        || repo_root.join("setup.py").exists()
        || repo_root.join("requirements.txt").exists()
    {
        ProjectType::Python
    } else if repo_root.join("go.mod").exists() {
        ProjectType::Go
    } else {
        ProjectType::Unknown
    }
}

const ESLINT_CONFIGS: &[&str] = &[
    "eslint.config.js",
    "eslint.config.mjs",
    "eslint.config.cjs",
    "eslint.config.ts",
    ".eslintrc",
    ".eslintrc.js",
    ".eslintrc.cjs",
    ".eslintrc.json",
    ".eslintrc.yml",
    ".eslintrc.yaml",
];

/// Default regression checks for a project type: type check, static
/// analysis, then tests, cheapest first.
fn default_checks(repo_root: &Path, project_type: ProjectType) -> Vec<CommandSpec> {
    match project_type {
        ProjectType::Rust => vec![
            CommandSpec::new("typecheck", repo_root, "cargo").args(&["check", "--all-targets"]),
            CommandSpec::new("lint", repo_root, "cargo").args(&["clippy", "--all-targets"]),
            CommandSpec::new("test", repo_root, "cargo").args(&["test"]),
        ],
        ProjectType::Node => {
            let package = fs::read_to_string(repo_root.join("package.json")).unwrap_or_default();
            let mut checks = Vec::new();
            if repo_root.join("tsconfig.json").exists() {
                checks.push(CommandSpec::new("typecheck", repo_root, "npx").args(&["tsc", "--noEmit"]));
            }
            let has_eslint = package.contains("\"eslint\"")
                || ESLINT_CONFIGS.iter().any(|name| repo_root.join(name).exists());
            if has_eslint {
                checks.push(CommandSpec::new("lint", repo_root, "npx").args(&["eslint", "."]));
            }
            if package.contains("\"test\"") {
                checks.push(CommandSpec::new("test", repo_root, "npm").args(&["test"]));
            }
            checks
        }
        ProjectType::Python => vec![
            CommandSpec::new("typecheck", repo_root, "mypy").args(&["."]),
            CommandSpec::new("lint", repo_root, "ruff").args(&["check", "."]),
            CommandSpec::new("test", repo_root, "pytest").args(&["-q"]),
        ],
        ProjectType::Go => vec![
            CommandSpec::new("vet", repo_root, "go").args(&["vet", "./..."]),
            CommandSpec::new("test", repo_root, "go").args(&["test", "./..."]),
        ],
        ProjectType::Unknown => Vec::new(),
    }
}

/// Ordered list of commands; every one must exit zero.
#[derive(Debug, Clone)]
pub struct CommandSuite {
    checks: Vec<CommandSpec>,
}

impl CommandSuite {
    pub fn new(checks: Vec<CommandSpec>) -> Self {
        Self { checks }
    }

    /// Checks inferred from the project's manifest files.
    pub fn detect(repo_root: &Path) -> Self {
        let project_type = detect_project_type(repo_root);
        debug!(project = project_type.name(), "detected project type");
        Self::new(default_checks(repo_root, project_type))
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl Verifier for CommandSuite {
    /// Stops at the first failing check.
    fn verify(&self, _repo_root: &Path) -> VerificationOutcome {
        if self.checks.is_empty() {
            return VerificationOutcome::fail("no verification checks configured");
        }

        let mut results = Vec::with_capacity(self.checks.len());
        for spec in &self.checks {
            let outcome = run_command(spec);
            let result = CheckResult::from_outcome(&outcome);
            info!(
                check = %result.name,
                status = ?result.status,
                duration_ms = result.duration_ms,
                "verification check"
            );
            results.push(result);
            if !outcome.success {
                return VerificationOutcome {
                    passed: false,
                    summary: truncate(&outcome.failure_summary(), 500),
                    checks: results,
                };
            }
        }

        VerificationOutcome {
            passed: true,
            summary: format!("{} checks passed", results.len()),
            checks: results,
        }
    }

    fn describe(&self) -> String {
        if self.checks.is_empty() {
            return "(none)".to_string();
        }
        self.checks
            .iter()
            .map(CommandSpec::label)
            .collect::<Vec<_>>()
            .join(" && ")
    }
}
