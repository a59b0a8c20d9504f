//! Diagnostic normalizer
//!
//! Turns free-text tool output into [`Defect`] records. Each producer kind
//! owns an ordered table of rows; the first row whose pattern matches a line
//! decides what that line means:
//!
//! - a *diagnostic* row starts a new defect (flushing the pending one),
//! - a *file* row sets the file for following rows that carry no path
//!   (ESLint's "stylish" format prints the path once per block),
//! - a *terminator* row flushes and is otherwise ignored (summary lines).
//!
//! Any other non-empty line continues the pending defect's message.
//! Supporting a new output format means appending a row, never a new branch.

use crate::defect::{Defect, ProducerKind, Severity};
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::PathBuf;

/// A diagnostic before it becomes a [`Defect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDiagnostic {
    pub file: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub severity: Severity,
    pub rule: Option<String>,
    pub message: String,
}

/// What a recognized line means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognized {
    Diagnostic(RawDiagnostic),
    FileContext(String),
}

pub type Extractor = fn(&Captures<'_>) -> Option<Recognized>;

#[derive(Clone, Copy)]
pub enum RowAction {
    Extract(Extractor),
    Terminate,
}

struct RowSpec {
    name: &'static str,
    pattern: &'static str,
    action: RowAction,
}

struct Row {
    name: &'static str,
    pattern: Regex,
    action: RowAction,
}

enum LineMatch {
    Diagnostic(RawDiagnostic),
    FileContext(String),
    Terminator,
}

const TYPE_CHECK_ROWS: &[RowSpec] = &[
    RowSpec {
        name: "tsc",
        pattern: r"^(?P<file>[^\s(][^(]*)\((?P<line>\d+),(?P<col>\d+)\):\s*(?P<sev>error|warning)\s+(?P<code>TS\d+):\s*(?P<msg>.*)$",
        action: RowAction::Extract(extract_location),
    },
    RowSpec {
        name: "tsc-pretty",
        pattern: r"^(?P<file>[^\s:]+):(?P<line>\d+):(?P<col>\d+)\s+-\s+(?P<sev>error|warning)\s+(?P<code>TS\d+):\s*(?P<msg>.*)$",
        action: RowAction::Extract(extract_location),
    },
    RowSpec {
        name: "mypy",
        pattern: r"^(?P<file>[^\s:]+):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<sev>error|warning|note):\s*(?P<msg>.*?)(?:\s+\[(?P<code>[\w-]+)\])?$",
        action: RowAction::Extract(extract_location),
    },
    RowSpec {
        name: "rustc-short",
        pattern: r"^(?P<file>[^\s:]+):(?P<line>\d+):(?P<col>\d+):\s+(?P<sev>error|warning)(?:\[(?P<code>[^\]]+)\])?:\s+(?P<msg>.+)$",
        action: RowAction::Extract(extract_location),
    },
    RowSpec {
        name: "summary",
        pattern: r"^(Found \d+ errors?|Success: no issues found|(error|warning)(\[\w+\])?: |\s*(Compiling|Checking|Finished|Blocking)\s)",
        action: RowAction::Terminate,
    },
];

const STATIC_ANALYSIS_ROWS: &[RowSpec] = &[
    RowSpec {
        name: "eslint-unix",
        pattern: r"^(?P<file>[^\s:]+):(?P<line>\d+):(?P<col>\d+):\s*(?P<msg>.*?)\s*\[(?P<sev>Error|Warning)/(?P<code>[^\]]+)\]$",
        action: RowAction::Extract(extract_location),
    },
    RowSpec {
        name: "generic",
        pattern: r"^(?P<file>[^\s:]+):(?P<line>\d+):(?P<col>\d+):?\s+(?P<sev>(?i:critical|fatal|error|warning|info|note|hint))\s+(?P<code>[\w./@-]+)\s+(?P<msg>.+)$",
        action: RowAction::Extract(extract_location),
    },
    RowSpec {
        name: "compiler",
        pattern: r"^(?P<file>[^\s:]+):(?P<line>\d+):(?P<col>\d+):\s+(?P<sev>fatal error|error|warning|note)(?:\[(?P<code>[^\]]+)\])?:\s+(?P<msg>.+)$",
        action: RowAction::Extract(extract_location),
    },
    RowSpec {
        name: "ruff",
        pattern: r"^(?P<file>[^\s:]+):(?P<line>\d+):(?P<col>\d+):\s+(?P<code>[A-Z]+\d+)\s+(?P<msg>.+)$",
        action: RowAction::Extract(extract_coded),
    },
    RowSpec {
        name: "go-vet",
        pattern: r"^(?P<file>[^\s:]+\.go):(?P<line>\d+):(?P<col>\d+):\s+(?P<msg>.+)$",
        action: RowAction::Extract(extract_location),
    },
    RowSpec {
        name: "stylish-row",
        pattern: r"^\s+(?P<line>\d+):(?P<col>\d+)\s+(?P<sev>error|warning)\s+(?P<msg>.+?)\s{2,}(?P<code>\S+)$",
        action: RowAction::Extract(extract_location),
    },
    RowSpec {
        name: "stylish-file",
        pattern: r"^(?P<file>[^\s:]+\.[A-Za-z0-9]+)$",
        action: RowAction::Extract(extract_file_context),
    },
    RowSpec {
        name: "summary",
        pattern: r"^([✖x]\s+\d+\s+problems?|Found \d+ errors?|All checks passed|#\s+\S+$|(error|warning)(\[\w+\])?: |\s*(Compiling|Checking|Finished|Blocking)\s)",
        action: RowAction::Terminate,
    },
];

const TEST_FAILURE_ROWS: &[RowSpec] = &[
    RowSpec {
        name: "pytest",
        pattern: r"^FAILED\s+(?P<file>[^\s:]+)::(?P<test>\S+)(?:\s+-\s+(?P<msg>.*))?$",
        action: RowAction::Extract(extract_test_failure),
    },
    RowSpec {
        name: "cargo",
        pattern: r"^test\s+(?P<test>\S+)\s+\.\.\.\s+FAILED$",
        action: RowAction::Extract(extract_test_failure),
    },
    RowSpec {
        name: "go",
        pattern: r"^\s*--- FAIL:\s+(?P<test>\S+)",
        action: RowAction::Extract(extract_test_failure),
    },
    RowSpec {
        name: "jest",
        pattern: r"^\s*●\s+(?P<test>.+?)\s*$",
        action: RowAction::Extract(extract_test_failure),
    },
    RowSpec {
        name: "progress",
        pattern: r"^(running \d+ tests?$|test\s+\S+\s+\.\.\.\s+(ok|ignored)|failures:$|test result:|=+.*=+$|FAIL$|ok\s+\S+|FAIL\s+\S+\s+[\d.]+s$|Tests?:\s+\d+)",
        action: RowAction::Terminate,
    },
];

fn builtin_rows(kind: ProducerKind) -> &'static [RowSpec] {
    match kind {
        ProducerKind::TypeCheck => TYPE_CHECK_ROWS,
        ProducerKind::StaticAnalysis => STATIC_ANALYSIS_ROWS,
        ProducerKind::TestFailure => TEST_FAILURE_ROWS,
    }
}

/// Line-oriented parser over per-producer row tables.
pub struct Normalizer {
    tables: HashMap<ProducerKind, Vec<Row>>,
}

impl Normalizer {
    /// Build the normalizer with the built-in row tables.
    pub fn new() -> Result<Self, regex::Error> {
        let mut normalizer = Self {
            tables: HashMap::new(),
        };
        for kind in ProducerKind::all() {
            for spec in builtin_rows(kind) {
                normalizer.push_row(kind, spec.name, spec.pattern, spec.action)?;
            }
        }
        Ok(normalizer)
    }

    /// Append a row to a producer's table. Rows are tried in insertion order.
    pub fn push_row(
        &mut self,
        kind: ProducerKind,
        name: &'static str,
        pattern: &str,
        action: RowAction,
    ) -> Result<(), regex::Error> {
        let row = Row {
            name,
            pattern: Regex::new(pattern)?,
            action,
        };
        self.tables.entry(kind).or_default().push(row);
        Ok(())
    }

    pub fn row_names(&self, kind: ProducerKind) -> Vec<&'static str> {
        self.tables
            .get(&kind)
            .map(|rows| rows.iter().map(|r| r.name).collect())
            .unwrap_or_default()
    }

    pub fn normalize(&self, kind: ProducerKind, output: &str) -> Vec<Defect> {
        self.normalize_at(kind, output, Utc::now())
    }

    /// Parse `output` into open defects stamped with `now`.
    pub fn normalize_at(&self, kind: ProducerKind, output: &str, now: DateTime<Utc>) -> Vec<Defect> {
        let Some(rows) = self.tables.get(&kind) else {
            return Vec::new();
        };

        let mut defects = Vec::new();
        let mut pending: Option<RawDiagnostic> = None;
        let mut file_context: Option<String> = None;

        for line in output.lines() {
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }

            match recognize(rows, line) {
                Some(LineMatch::Diagnostic(mut diagnostic)) => {
                    flush(&mut pending, &mut defects, kind, now);
                    if diagnostic.file.is_none() && kind != ProducerKind::TestFailure {
                        diagnostic.file = file_context.clone();
                    }
                    pending = Some(diagnostic);
                }
                Some(LineMatch::FileContext(file)) => {
                    flush(&mut pending, &mut defects, kind, now);
                    file_context = Some(file);
                }
                Some(LineMatch::Terminator) => {
                    flush(&mut pending, &mut defects, kind, now);
                }
                None => {
                    if let Some(diagnostic) = pending.as_mut() {
                        let continuation = line.trim();
                        if diagnostic.message.is_empty() {
                            diagnostic.message = continuation.to_string();
                        } else {
                            diagnostic.message.push(' ');
                            diagnostic.message.push_str(continuation);
                        }
                    }
                }
            }
        }

        flush(&mut pending, &mut defects, kind, now);
        defects
    }
}

fn recognize(rows: &[Row], line: &str) -> Option<LineMatch> {
    for row in rows {
        let Some(caps) = row.pattern.captures(line) else {
            continue;
        };
        match row.action {
            RowAction::Terminate => return Some(LineMatch::Terminator),
            RowAction::Extract(extract) => match extract(&caps) {
                Some(Recognized::Diagnostic(d)) => return Some(LineMatch::Diagnostic(d)),
                Some(Recognized::FileContext(f)) => return Some(LineMatch::FileContext(f)),
                None => continue,
            },
        }
    }
    None
}

fn flush(
    pending: &mut Option<RawDiagnostic>,
    defects: &mut Vec<Defect>,
    kind: ProducerKind,
    now: DateTime<Utc>,
) {
    let Some(diagnostic) = pending.take() else {
        return;
    };
    let message = if diagnostic.message.trim().is_empty() {
        diagnostic
            .rule
            .clone()
            .unwrap_or_else(|| "unspecified diagnostic".to_string())
    } else {
        diagnostic.message.trim().to_string()
    };
    let defect = Defect::new(
        kind,
        diagnostic.severity,
        diagnostic.file.map(PathBuf::from),
        diagnostic.line,
        message,
        now,
    )
    .with_column(diagnostic.column)
    .with_rule(diagnostic.rule);
    defects.push(defect);
}

fn group<'a>(caps: &'a Captures<'_>, name: &str) -> Option<&'a str> {
    caps.name(name)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

fn number(caps: &Captures<'_>, name: &str) -> Option<usize> {
    group(caps, name).and_then(|s| s.parse().ok())
}

fn extract_location(caps: &Captures<'_>) -> Option<Recognized> {
    let severity = group(caps, "sev")
        .map(|s| {
            if s.eq_ignore_ascii_case("fatal error") {
                Severity::Critical
            } else {
                Severity::from_label(s)
            }
        })
        .unwrap_or(Severity::Medium);
    Some(Recognized::Diagnostic(RawDiagnostic {
        file: group(caps, "file").map(str::to_string),
        line: number(caps, "line"),
        column: number(caps, "col"),
        severity,
        rule: group(caps, "code").map(str::to_string),
        message: group(caps, "msg").unwrap_or_default().to_string(),
    }))
}

/// Rows that print a code but no severity word (ruff, flake8).
/// Pyflakes (`F`) and syntax (`E9`) codes are real errors; the rest is style.
fn extract_coded(caps: &Captures<'_>) -> Option<Recognized> {
    let code = group(caps, "code")?;
    let severity = if code.starts_with('F') || code.starts_with("E9") {
        Severity::High
    } else {
        Severity::Medium
    };
    Some(Recognized::Diagnostic(RawDiagnostic {
        file: group(caps, "file").map(str::to_string),
        line: number(caps, "line"),
        column: number(caps, "col"),
        severity,
        rule: Some(code.to_string()),
        message: group(caps, "msg").unwrap_or_default().to_string(),
    }))
}

fn extract_file_context(caps: &Captures<'_>) -> Option<Recognized> {
    group(caps, "file").map(|f| Recognized::FileContext(f.to_string()))
}

fn extract_test_failure(caps: &Captures<'_>) -> Option<Recognized> {
    let test = group(caps, "test")?;
    let message = group(caps, "msg")
        .map(str::to_string)
        .unwrap_or_else(|| format!("test {} failed", test));
    Some(Recognized::Diagnostic(RawDiagnostic {
        file: group(caps, "file").map(str::to_string),
        line: None,
        column: None,
        severity: Severity::High,
        rule: Some(test.to_string()),
        message,
    }))
}
