//! Pulling code and an approach label out of a model response.

use regex::Regex;
use std::sync::OnceLock;

pub const FENCED_CONFIDENCE: f64 = 0.85;
pub const HEURISTIC_MIN_CONFIDENCE: f64 = 0.60;
pub const HEURISTIC_MAX_CONFIDENCE: f64 = 0.75;
/// Confidence of a response that held no code.
pub const NO_CODE_CONFIDENCE: f64 = 0.2;

const MAX_APPROACH_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    Fenced,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCode {
    pub code: String,
    pub source: ExtractionSource,
    pub confidence: f64,
}

fn fence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)```").ok())
        .as_ref()
}

fn approach_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?mi)^[\s*_#>-]*approach[\s*_]*:[\s*_]*(.+?)[\s*_]*$").ok())
        .as_ref()
}

/// Code from a response: the largest fenced block, or failing that the
/// longest run of code-like lines.
pub fn extract_code(response: &str) -> Option<ExtractedCode> {
    extract_fenced(response).or_else(|| extract_heuristic(response))
}

fn extract_fenced(response: &str) -> Option<ExtractedCode> {
    let pattern = fence_pattern()?;
    let largest = pattern
        .captures_iter(response)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|body| !body.trim().is_empty())
        .max_by_key(|body| body.len())?;
    Some(ExtractedCode {
        code: largest.trim_end_matches(['\n', '\r']).to_string(),
        source: ExtractionSource::Fenced,
        confidence: FENCED_CONFIDENCE,
    })
}

fn extract_heuristic(response: &str) -> Option<ExtractedCode> {
    let approach = approach_pattern();
    let lines: Vec<&str> = response
        .lines()
        .filter(|line| !approach.is_some_and(|re| re.is_match(line)))
        .collect();

    let non_empty = lines.iter().filter(|l| !l.trim().is_empty()).count();
    if non_empty == 0 {
        return None;
    }

    // Longest run of code-like lines; blank lines inside a run are kept.
    let mut best: Option<(usize, usize, usize)> = None;
    let mut run_start: Option<usize> = None;
    let mut run_code = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if looks_like_code(line) {
            run_start.get_or_insert(i);
            run_code += 1;
            let start = run_start.unwrap_or(i);
            if best.map(|(_, _, n)| run_code > n).unwrap_or(true) {
                best = Some((start, i, run_code));
            }
        } else if !line.trim().is_empty() {
            run_start = None;
            run_code = 0;
        }
    }

    let (start, end, code_lines) = best?;
    let share = code_lines as f64 / non_empty as f64;
    let confidence = HEURISTIC_MIN_CONFIDENCE
        + (HEURISTIC_MAX_CONFIDENCE - HEURISTIC_MIN_CONFIDENCE) * share.clamp(0.0, 1.0);
    Some(ExtractedCode {
        code: lines[start..=end].join("\n"),
        source: ExtractionSource::Heuristic,
        confidence,
    })
}

fn looks_like_code(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    const KEYWORDS: &[&str] = &[
        "fn ", "pub ", "let ", "const ", "var ", "def ", "class ", "import ", "from ", "return",
        "if ", "if(", "for ", "while ", "use ", "export ", "function ", "async ", "#include",
        "struct ", "impl ", "type ", "interface ", "}", "{", "//", "#[",
    ];
    if KEYWORDS.iter().any(|k| trimmed.starts_with(k)) {
        return true;
    }
    let indented = line.starts_with("    ") || line.starts_with('\t');
    let ends_like_code = trimmed.ends_with([';', '{', '}', ')', ',', ':', ']']);
    let ends_like_prose = trimmed.ends_with('.') && trimmed.contains(' ');
    (ends_like_code && !ends_like_prose) || (indented && !ends_like_prose)
}

/// The `APPROACH:` label, normalized to lowercase.
pub fn extract_approach(response: &str) -> Option<String> {
    let caps = approach_pattern()?.captures(response)?;
    let label = caps.get(1)?.as_str().trim().trim_matches('"').trim();
    if label.is_empty() {
        return None;
    }
    Some(label.to_lowercase().chars().take(MAX_APPROACH_CHARS).collect())
}
