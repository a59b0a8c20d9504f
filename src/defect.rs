//! Defect records and their lifecycle.

use crate::util::{hash_str, slugify};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const ID_SLUG_MAX_CHARS: usize = 120;
const ID_HASH_CHARS: usize = 16;

/// Which kind of tool reported a defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    TypeCheck,
    StaticAnalysis,
    TestFailure,
}

impl ProducerKind {
    pub fn all() -> [ProducerKind; 3] {
        [
            ProducerKind::TypeCheck,
            ProducerKind::StaticAnalysis,
            ProducerKind::TestFailure,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProducerKind::TypeCheck => "type_check",
            ProducerKind::StaticAnalysis => "static_analysis",
            ProducerKind::TestFailure => "test_failure",
        }
    }

    /// Short prefix used in defect ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ProducerKind::TypeCheck => "ts",
            ProducerKind::StaticAnalysis => "lint",
            ProducerKind::TestFailure => "test",
        }
    }

    /// Blast-radius rank: type safety, then style/analysis, then tests.
    pub fn class_rank(&self) -> u32 {
        match self {
            ProducerKind::TypeCheck => 0,
            ProducerKind::StaticAnalysis => 1,
            ProducerKind::TestFailure => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "type_check" | "typecheck" | "types" => Some(ProducerKind::TypeCheck),
            "static_analysis" | "lint" | "analysis" => Some(ProducerKind::StaticAnalysis),
            "test_failure" | "test" | "tests" => Some(ProducerKind::TestFailure),
            _ => None,
        }
    }
}

impl fmt::Display for ProducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn rank(&self) -> u32 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// Map the severity words tools print onto the four levels.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "fatal" | "critical" | "blocker" => Severity::Critical,
            "error" | "high" | "major" => Severity::High,
            "warning" | "warn" | "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectStatus {
    Open,
    Fixed,
    Blocked,
}

impl DefectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectStatus::Open => "open",
            DefectStatus::Fixed => "fixed",
            DefectStatus::Blocked => "blocked",
        }
    }
}

/// How a defect came to be marked fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// A candidate fix passed verification.
    Verified,
    /// The latest collection run no longer reported it.
    Inferred,
}

/// Summary of the winning candidate, kept once a fix is verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixDetails {
    pub strategy: String,
    pub approach: String,
    pub confidence: f64,
    /// Candidates that shared the winning approach label.
    #[serde(default)]
    pub agreement: usize,
    pub fixed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defect {
    pub id: String,
    pub producer_kind: ProducerKind,
    pub severity: Severity,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub column: Option<usize>,
    /// Producer rule or code (`TS2345`, `no-unused-vars`, test name).
    #[serde(default)]
    pub rule: Option<String>,
    pub message: String,
    pub status: DefectStatus,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub fix_details: Option<FixDetails>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// Times the defect came back after being marked fixed.
    #[serde(default)]
    pub regressions: u32,
    #[serde(default)]
    pub last_failure: Option<String>,
}

impl Defect {
    pub fn new(
        producer_kind: ProducerKind,
        severity: Severity,
        file_path: Option<PathBuf>,
        line: Option<usize>,
        message: String,
        now: DateTime<Utc>,
    ) -> Self {
        let mut defect = Self {
            id: String::new(),
            producer_kind,
            severity,
            file_path,
            line,
            column: None,
            rule: None,
            message,
            status: DefectStatus::Open,
            attempts: 0,
            created_at: now,
            updated_at: now,
            fix_details: None,
            resolution: None,
            regressions: 0,
            last_failure: None,
        };
        defect.id = defect.derive_id();
        defect
    }

    pub fn with_column(mut self, column: Option<usize>) -> Self {
        self.column = column;
        self
    }

    /// Attach the producer rule. Unanchored defects use it as identity, so the id is re-derived.
    pub fn with_rule(mut self, rule: Option<String>) -> Self {
        self.rule = rule.filter(|r| !r.trim().is_empty());
        self.id = self.derive_id();
        self
    }

    /// Rewrite an absolute path under `repo_root` as repo-relative and re-derive
    /// the id. Paths outside the root are left alone.
    pub fn relative_to(mut self, repo_root: &Path) -> Self {
        let Some(path) = self.file_path.as_deref().filter(|p| p.is_absolute()) else {
            return self;
        };
        let relative = path
            .strip_prefix(repo_root)
            .ok()
            .map(Path::to_path_buf)
            .or_else(|| {
                let canonical = path.canonicalize().ok()?;
                canonical.strip_prefix(repo_root).ok().map(Path::to_path_buf)
            })
            .filter(|r| !r.as_os_str().is_empty());
        if let Some(relative) = relative {
            self.file_path = Some(relative);
            self.id = self.derive_id();
        }
        self
    }

    fn derive_id(&self) -> String {
        defect_id(
            self.producer_kind,
            self.file_path.as_deref(),
            self.line,
            self.rule.as_deref().unwrap_or(&self.message),
        )
    }

    /// Type key for fix-history aggregation.
    pub fn defect_type(&self) -> &'static str {
        self.producer_kind.as_str()
    }

    /// Category key for fix-history aggregation.
    pub fn category(&self) -> &str {
        self.rule.as_deref().unwrap_or("general")
    }

    pub fn is_open(&self) -> bool {
        self.status == DefectStatus::Open
    }

    pub fn location(&self) -> String {
        match (&self.file_path, self.line) {
            (Some(path), Some(line)) => format!("{}:{}", path.display(), line),
            (Some(path), None) => path.display().to_string(),
            (None, _) => "(no file)".to_string(),
        }
    }
}

/// Deterministic identity from producer + location.
///
/// Anchored defects: `<prefix>-<path slug>-L<line>`. Defects without a line
/// fall back to the rule or message so repeated test failures still merge.
pub fn defect_id(
    kind: ProducerKind,
    file_path: Option<&Path>,
    line: Option<usize>,
    fallback_anchor: &str,
) -> String {
    let anchor = id_segment(fallback_anchor);
    match (file_path, line) {
        (Some(path), Some(line)) => format!(
            "{}-{}-L{}",
            kind.id_prefix(),
            id_segment(&path.to_string_lossy()),
            line
        ),
        (Some(path), None) => format!(
            "{}-{}-{}",
            kind.id_prefix(),
            id_segment(&path.to_string_lossy()),
            anchor
        ),
        (None, _) => format!("{}-{}", kind.id_prefix(), anchor),
    }
}

/// Slug of one id part. Long inputs keep a readable prefix and end with a
/// hash of the whole input, so the id never loses the distinguishing tail.
fn id_segment(input: &str) -> String {
    let slug = slugify(input, usize::MAX);
    if slug.chars().count() <= ID_SLUG_MAX_CHARS {
        return slug;
    }
    let prefix: String = slug
        .chars()
        .take(ID_SLUG_MAX_CHARS - ID_HASH_CHARS - 1)
        .collect();
    format!("{}-{}", prefix, hash_str(input.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_derived_from_producer_and_location() {
        let now = Utc::now();
        let a = Defect::new(
            ProducerKind::TypeCheck,
            Severity::High,
            Some(PathBuf::from("fileA")),
            Some(10),
            "Type 'string' is not assignable".to_string(),
            now,
        );
        assert_eq!(a.id, "ts-fileA-L10");

        let b = Defect::new(
            ProducerKind::TypeCheck,
            Severity::Medium,
            Some(PathBuf::from("fileA")),
            Some(10),
            "a different message".to_string(),
            now,
        );
        assert_eq!(a.id, b.id);

        let lint = Defect::new(
            ProducerKind::StaticAnalysis,
            Severity::High,
            Some(PathBuf::from("fileA")),
            Some(10),
            "x".to_string(),
            now,
        );
        assert_ne!(a.id, lint.id);
    }

    #[test]
    fn unanchored_defects_use_rule_as_identity() {
        let now = Utc::now();
        let defect = Defect::new(
            ProducerKind::TestFailure,
            Severity::High,
            None,
            None,
            "assertion failed".to_string(),
            now,
        )
        .with_rule(Some("store::tests::merge_is_idempotent".to_string()));
        assert_eq!(defect.id, "test-store__tests__merge_is_idempotent");
        assert_eq!(defect.category(), "store::tests::merge_is_idempotent");
    }

    #[test]
    fn long_paths_differing_only_at_the_end_keep_distinct_ids() {
        let prefix = format!(
            "/home/dev/work/acme/monorepo/{}/shared/inputs",
            "packages/web/src/components/forms/payment/checkout/steps/billing/".repeat(2)
        );
        let card = Defect::new(
            ProducerKind::StaticAnalysis,
            Severity::Medium,
            Some(PathBuf::from(format!("{}/CardNumberInput.tsx", prefix))),
            Some(12),
            "unused".to_string(),
            Utc::now(),
        );
        let expiry = Defect::new(
            ProducerKind::StaticAnalysis,
            Severity::Medium,
            Some(PathBuf::from(format!("{}/ExpiryDateInput.tsx", prefix))),
            Some(12),
            "unused".to_string(),
            Utc::now(),
        );
        assert_ne!(card.id, expiry.id);
        assert!(card.id.starts_with("lint-_home_dev_work_acme_monorepo_"));
        assert!(card.id.ends_with("-L12"));
        assert!(card.id.len() <= "lint-".len() + ID_SLUG_MAX_CHARS + "-L12".len());

        let test_failure = |name: &str| {
            Defect::new(ProducerKind::TestFailure, Severity::High, None, None, "failed".to_string(), Utc::now())
                .with_rule(Some(format!("{}{}", "suite::nested::".repeat(12), name)))
        };
        assert_ne!(test_failure("first").id, test_failure("second").id);
    }

    #[test]
    fn absolute_paths_under_the_root_become_relative() {
        let root = Path::new("/work/repo");
        let defect = Defect::new(
            ProducerKind::StaticAnalysis,
            Severity::Low,
            Some(PathBuf::from("/work/repo/src/a.js")),
            Some(3),
            "unused".to_string(),
            Utc::now(),
        )
        .relative_to(root);
        assert_eq!(defect.file_path, Some(PathBuf::from("src/a.js")));
        assert_eq!(defect.id, "lint-src_a_js-L3");

        let outside = Defect::new(
            ProducerKind::StaticAnalysis,
            Severity::Low,
            Some(PathBuf::from("/elsewhere/a.js")),
            Some(3),
            "unused".to_string(),
            Utc::now(),
        )
        .relative_to(root);
        assert_eq!(outside.file_path, Some(PathBuf::from("/elsewhere/a.js")));
    }

    #[test]
    fn severity_orders_and_ranks() {
        assert!(Severity::Critical < Severity::High);
        assert!(Severity::Medium < Severity::Low);
        assert_eq!(Severity::High.rank(), 1);
        assert_eq!(Severity::from_label("Error"), Severity::High);
        assert_eq!(Severity::from_label("warning"), Severity::Medium);
        assert_eq!(Severity::from_label("note"), Severity::Low);
        assert_eq!(Severity::from_label("fatal"), Severity::Critical);
    }

    #[test]
    fn producer_kind_parses_aliases() {
        assert_eq!(ProducerKind::parse("type-check"), Some(ProducerKind::TypeCheck));
        assert_eq!(ProducerKind::parse("lint"), Some(ProducerKind::StaticAnalysis));
        assert_eq!(ProducerKind::parse("tests"), Some(ProducerKind::TestFailure));
        assert_eq!(ProducerKind::parse("bogus"), None);
    }

    #[test]
    fn defect_serializes_camel_case() {
        let defect = Defect::new(
            ProducerKind::StaticAnalysis,
            Severity::Low,
            Some(PathBuf::from("src/a.js")),
            Some(3),
            "unused".to_string(),
            Utc::now(),
        );
        let json = serde_json::to_value(&defect).unwrap();
        assert_eq!(json["producerKind"], "static_analysis");
        assert_eq!(json["filePath"], "src/a.js");
        assert_eq!(json["status"], "open");
        assert!(json.get("updatedAt").is_some());
    }
}
