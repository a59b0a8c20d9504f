//! Root-cause analysis: what the strategies get to see about a defect.

use crate::defect::Defect;
use crate::util::{resolve_repo_file, truncate};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

pub const DEFAULT_CONTEXT_RADIUS: usize = 10;

/// Upper bound on the code shown for one defect.
const MAX_WINDOW_CHARS: usize = 24_000;
const MAX_REFERENCES: usize = 20;

/// Inclusive, 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRegion {
    pub start: usize,
    pub end: usize,
}

impl LineRegion {
    /// `radius` lines either side of `line`, clamped to a file of `total` lines.
    /// A line past the end of the file is treated as the last line.
    pub fn around(line: usize, radius: usize, total: usize) -> Self {
        if total == 0 {
            return Self { start: 1, end: 0 };
        }
        let line = line.clamp(1, total);
        Self {
            start: line.saturating_sub(radius).max(1),
            end: line.saturating_add(radius).min(total),
        }
    }

    pub fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What part of the file a candidate replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTarget {
    WholeFile,
    Region(LineRegion),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeWindow {
    pub region: LineRegion,
    pub text: String,
    /// The window covers every line of the file.
    pub whole_file: bool,
}

impl CodeWindow {
    pub fn edit_target(&self) -> EditTarget {
        if self.whole_file {
            EditTarget::WholeFile
        } else {
            EditTarget::Region(self.region)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootCauseContext {
    /// Path relative to the repository root, when it resolved.
    pub file_path: Option<PathBuf>,
    pub window: Option<CodeWindow>,
    /// Import and module lines from the file.
    pub references: Vec<String>,
    pub summary: String,
}

impl RootCauseContext {
    pub fn edit_target(&self) -> Option<EditTarget> {
        self.window.as_ref().map(CodeWindow::edit_target)
    }

    pub fn is_text_only(&self) -> bool {
        self.window.is_none()
    }
}

fn reference_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"^\s*(?:(?:pub\s+)?use\s+\S.*;|(?:pub\s+)?mod\s+\w+\s*;|import\s+\S.*|from\s+\S+\s+import\s+\S.*|#include\s*[<"].+[>"]|.*\brequire\(\s*['"][^'"]+['"]\s*\).*)$"#,
            )
            .ok()
        })
        .as_ref()
}

/// Analyze + RootCause.
///
/// Reads the defect's file when it resolves inside `repo_root`. An anchored
/// defect gets `radius` lines either side of its line; an unanchored one gets
/// the whole file, or as much of its head as fits the size cap. Missing or
/// unreadable files degrade to a text-only context.
pub fn build_context(repo_root: &Path, defect: &Defect, radius: usize) -> RootCauseContext {
    let summary = summarize(defect);

    let Some(candidate) = defect.file_path.as_deref() else {
        return text_only(summary);
    };

    let resolved = match resolve_repo_file(repo_root, candidate) {
        Ok(resolved) => resolved,
        Err(err) => {
            debug!(defect = %defect.id, error = %err, "file not usable, text-only context");
            return text_only(summary);
        }
    };

    let content = match fs::read_to_string(&resolved.absolute) {
        Ok(content) => content,
        Err(err) => {
            debug!(defect = %defect.id, error = %err, "file unreadable, text-only context");
            return text_only(summary);
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let window = match defect.line {
        Some(line) => anchored_window(&lines, line, radius),
        None => head_window(&lines),
    };

    RootCauseContext {
        file_path: Some(resolved.relative),
        window: Some(window),
        references: collect_references(&lines),
        summary,
    }
}

fn text_only(summary: String) -> RootCauseContext {
    RootCauseContext {
        file_path: None,
        window: None,
        references: Vec::new(),
        summary,
    }
}

fn anchored_window(lines: &[&str], line: usize, radius: usize) -> CodeWindow {
    let mut radius = radius;
    loop {
        let region = LineRegion::around(line, radius, lines.len());
        let text = join_region(lines, region);
        if text.chars().count() <= MAX_WINDOW_CHARS || radius == 0 {
            return CodeWindow {
                whole_file: region.start == 1 && region.end == lines.len(),
                region,
                text,
            };
        }
        radius /= 2;
    }
}

fn head_window(lines: &[&str]) -> CodeWindow {
    let mut used = 0usize;
    let mut end = 0usize;
    for line in lines {
        let cost = line.chars().count() + 1;
        if used + cost > MAX_WINDOW_CHARS && end > 0 {
            break;
        }
        used += cost;
        end += 1;
    }
    let region = LineRegion { start: 1, end };
    CodeWindow {
        text: join_region(lines, region),
        whole_file: end == lines.len(),
        region,
    }
}

fn join_region(lines: &[&str], region: LineRegion) -> String {
    if region.is_empty() {
        return String::new();
    }
    lines[region.start - 1..region.end].join("\n")
}

fn collect_references(lines: &[&str]) -> Vec<String> {
    let Some(pattern) = reference_pattern() else {
        return Vec::new();
    };
    let mut references: Vec<String> = Vec::new();
    for line in lines {
        if references.len() >= MAX_REFERENCES {
            break;
        }
        if pattern.is_match(line) {
            let trimmed = line.trim().to_string();
            if !references.contains(&trimmed) {
                references.push(trimmed);
            }
        }
    }
    references
}

fn summarize(defect: &Defect) -> String {
    let mut summary = format!(
        "{} {} defect at {}",
        defect.severity,
        defect.producer_kind,
        defect.location()
    );
    if let Some(column) = defect.column {
        summary.push_str(&format!(", column {}", column));
    }
    if let Some(rule) = &defect.rule {
        summary.push_str(&format!(" [{}]", rule));
    }
    summary.push_str(": ");
    summary.push_str(&truncate(&defect.message, 1_000));
    if defect.attempts > 0 {
        summary.push_str(&format!(
            "\nPrevious fix attempts: {}.",
            defect.attempts
        ));
        if let Some(reason) = &defect.last_failure {
            summary.push_str(&format!(" Last one failed with: {}", truncate(reason, 500)));
        }
    }
    summary
}
