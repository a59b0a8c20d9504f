//! Collection: run the diagnostic producers and normalize what they print.

use crate::command::{run_command, CommandSpec};
use crate::defect::{Defect, ProducerKind};
use crate::normalize::Normalizer;
use crate::util::truncate;
use crate::verify::{detect_project_type, ProjectType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, warn};

/// A configured diagnostic producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub name: String,
    pub kind: ProducerKind,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    #[serde(default = "default_producer_timeout")]
    pub timeout_secs: u64,
    /// Extra environment, e.g. `CI = "true"` to keep watchers off.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_producer_timeout() -> u64 {
    600
}

impl ProducerConfig {
    pub fn new(name: &str, kind: ProducerKind, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout_secs: default_producer_timeout(),
            env: BTreeMap::new(),
        }
    }

    fn to_spec(&self, repo_root: &Path) -> Option<CommandSpec> {
        let (program, args) = self.command.split_first()?;
        Some(
            CommandSpec::new(&self.name, repo_root, program)
                .args(args)
                .timeout_secs(self.timeout_secs)
                .with_env(&self.env),
        )
    }
}

/// Producers inferred from the project's manifest files.
pub fn default_producers(repo_root: &Path) -> Vec<ProducerConfig> {
    use ProducerKind::*;
    match detect_project_type(repo_root) {
        ProjectType::Rust => vec![
            ProducerConfig::new("cargo check", TypeCheck, &["cargo", "check", "--all-targets", "--message-format=short"]),
            ProducerConfig::new("clippy", StaticAnalysis, &["cargo", "clippy", "--all-targets", "--message-format=short"]),
            ProducerConfig::new("cargo test", TestFailure, &["cargo", "test", "--no-fail-fast"]),
        ],
        ProjectType::Node => vec![
            ProducerConfig::new("tsc", TypeCheck, &["npx", "tsc", "--noEmit", "--pretty", "false"]),
            ProducerConfig::new("eslint", StaticAnalysis, &["npx", "eslint", ".", "-f", "unix"]),
            ProducerConfig::new("npm test", TestFailure, &["npm", "test"]),
        ],
        ProjectType::Python => vec![
            ProducerConfig::new("mypy", TypeCheck, &["mypy", "."]),
            ProducerConfig::new("ruff", StaticAnalysis, &["ruff", "check", "--output-format=concise", "."]),
            ProducerConfig::new("pytest", TestFailure, &["pytest", "-q", "-rf"]),
        ],
        ProjectType::Go => vec![
            ProducerConfig::new("go vet", StaticAnalysis, &["go", "vet", "./..."]),
            ProducerConfig::new("go test", TestFailure, &["go", "test", "./..."]),
        ],
        ProjectType::Unknown => Vec::new(),
    }
}

/// Raw output of one producer run, or of a saved output file.
#[derive(Debug, Clone)]
pub struct ProducerOutput {
    pub name: String,
    pub kind: ProducerKind,
    pub text: String,
    /// `Some(true)` exit 0, `Some(false)` non-zero exit, `None` unknown (saved output).
    pub exit_ok: Option<bool>,
    /// Set when the producer did not run to completion.
    pub failure: Option<String>,
}

impl ProducerOutput {
    pub fn from_saved(name: &str, kind: ProducerKind, text: String) -> Self {
        Self {
            name: name.to_string(),
            kind,
            text,
            exit_ok: None,
            failure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRun {
    pub name: String,
    pub kind: ProducerKind,
    pub defects: usize,
    /// The run can vouch for the absence of defects of its kind.
    pub clean: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    pub defects: Vec<Defect>,
    /// Kinds whose producers all ran cleanly; only these may resolve defects by absence.
    pub scope: BTreeSet<ProducerKind>,
    pub runs: Vec<ProducerRun>,
    pub warnings: Vec<String>,
}

pub fn run_producers(repo_root: &Path, producers: &[ProducerConfig]) -> Vec<ProducerOutput> {
    producers
        .iter()
        .map(|producer| {
            let Some(spec) = producer.to_spec(repo_root) else {
                return ProducerOutput {
                    name: producer.name.clone(),
                    kind: producer.kind,
                    text: String::new(),
                    exit_ok: None,
                    failure: Some("empty command".to_string()),
                };
            };
            info!(producer = %producer.name, command = %spec.label(), "running producer");
            let outcome = run_command(&spec);
            ProducerOutput {
                name: producer.name.clone(),
                kind: producer.kind,
                text: outcome.combined_output(),
                exit_ok: outcome.completed().then_some(outcome.success),
                failure: (!outcome.completed()).then(|| outcome.failure_summary()),
            }
        })
        .collect()
}

/// Normalize producer outputs and work out which kinds are in scope.
///
/// Absolute paths under `repo_root` are made repo-relative, so every producer
/// names a file the same way.
pub fn collect_from_outputs(
    normalizer: &Normalizer,
    repo_root: &Path,
    outputs: Vec<ProducerOutput>,
    now: DateTime<Utc>,
) -> CollectionReport {
    let mut report = CollectionReport::default();
    let mut dirty: BTreeSet<ProducerKind> = BTreeSet::new();

    for output in outputs {
        if let Some(failure) = &output.failure {
            let warning = format!("{} did not finish: {}", output.name, failure);
            warn!(producer = %output.name, reason = %failure, "producer failed, excluded from resolution");
            report.warnings.push(warning);
            dirty.insert(output.kind);
            report.runs.push(ProducerRun {
                name: output.name,
                kind: output.kind,
                defects: 0,
                clean: false,
            });
            continue;
        }

        let defects: Vec<Defect> = normalizer
            .normalize_at(output.kind, &output.text, now)
            .into_iter()
            .map(|defect| defect.relative_to(repo_root))
            .collect();
        let silent = output.text.trim().is_empty();
        let clean = match output.exit_ok {
            Some(true) => true,
            Some(false) | None => !defects.is_empty() || (output.exit_ok.is_none() && silent),
        };

        if !clean {
            let warning = format!(
                "{} produced no parseable diagnostics: {}",
                output.name,
                truncate(output.text.trim(), 200)
            );
            warn!(producer = %output.name, "unparseable producer output, excluded from resolution");
            report.warnings.push(warning);
            dirty.insert(output.kind);
        } else {
            report.scope.insert(output.kind);
        }

        info!(producer = %output.name, defects = defects.len(), "producer normalized");
        report.runs.push(ProducerRun {
            name: output.name,
            kind: output.kind,
            defects: defects.len(),
            clean,
        });
        report.defects.extend(defects);
    }

    report.scope.retain(|kind| !dirty.contains(kind));
    report
}
