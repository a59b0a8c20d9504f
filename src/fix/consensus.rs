use super::extract::{extract_approach, extract_code, ExtractedCode, NO_CODE_CONFIDENCE};
use super::strategy::FixStrategy;
use crate::reasoning::ReasoningError;
use serde::{Deserialize, Serialize};

/// How the winner is chosen among usable candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusPolicy {
    /// Highest confidence wins; ties go to the earlier strategy.
    #[default]
    HighestConfidence,
    /// Most common approach label wins, then its most confident member.
    MajorityApproach,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixCandidate {
    pub strategy: FixStrategy,
    pub approach: String,
    pub raw_text: String,
    pub extracted: Option<ExtractedCode>,
    pub confidence: f64,
    pub error: Option<String>,
}

impl FixCandidate {
    pub fn from_response(strategy: FixStrategy, response: Result<String, ReasoningError>) -> Self {
        match response {
            Ok(raw_text) => {
                let extracted = extract_code(&raw_text);
                let confidence = extracted
                    .as_ref()
                    .map(|e| e.confidence)
                    .unwrap_or(NO_CODE_CONFIDENCE);
                Self {
                    strategy,
                    approach: extract_approach(&raw_text)
                        .unwrap_or_else(|| strategy.default_approach().to_string()),
                    raw_text,
                    extracted,
                    confidence,
                    error: None,
                }
            }
            Err(err) => Self {
                strategy,
                approach: strategy.default_approach().to_string(),
                raw_text: String::new(),
                extracted: None,
                confidence: 0.0,
                error: Some(err.to_string()),
            },
        }
    }

    pub fn is_usable(&self) -> bool {
        self.error.is_none() && self.extracted.is_some()
    }

    /// Why the candidate can't be used, if it can't.
    pub fn rejection(&self) -> Option<String> {
        if let Some(err) = &self.error {
            return Some(format!("{}: {}", self.strategy, err));
        }
        if self.extracted.is_none() {
            return Some(format!("{}: no code in response", self.strategy));
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Consensus {
    Selected {
        candidate: FixCandidate,
        /// Usable candidates sharing the winner's approach label.
        agreement: usize,
    },
    NoConsensus {
        reasons: Vec<String>,
    },
}

pub fn select_consensus(candidates: Vec<FixCandidate>, policy: ConsensusPolicy) -> Consensus {
    let reasons: Vec<String> = candidates.iter().filter_map(|c| c.rejection()).collect();
    let usable: Vec<FixCandidate> = candidates.into_iter().filter(|c| c.is_usable()).collect();
    if usable.is_empty() {
        return Consensus::NoConsensus { reasons };
    }

    let winner = match policy {
        ConsensusPolicy::HighestConfidence => most_confident(&usable, |_| true),
        ConsensusPolicy::MajorityApproach => {
            let label = majority_label(&usable);
            most_confident(&usable, |c| c.approach == label)
        }
    };

    match winner {
        Some(index) => {
            let candidate = usable[index].clone();
            let agreement = usable
                .iter()
                .filter(|c| c.approach == candidate.approach)
                .count();
            Consensus::Selected {
                candidate,
                agreement,
            }
        }
        None => Consensus::NoConsensus { reasons },
    }
}

/// Candidates arrive in strategy order, so the first maximum is the earlier strategy.
fn most_confident(usable: &[FixCandidate], accept: impl Fn(&FixCandidate) -> bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, candidate) in usable.iter().enumerate() {
        if !accept(candidate) {
            continue;
        }
        if best.map(|(_, c)| candidate.confidence > c).unwrap_or(true) {
            best = Some((index, candidate.confidence));
        }
    }
    best.map(|(i, _)| i)
}

fn majority_label(usable: &[FixCandidate]) -> String {
    let mut labels: Vec<(&str, usize)> = Vec::new();
    for candidate in usable {
        match labels.iter_mut().find(|(l, _)| *l == candidate.approach) {
            Some((_, count)) => *count += 1,
            None => labels.push((candidate.approach.as_str(), 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (label, count) in labels {
        if best.map(|(_, n)| count > n).unwrap_or(true) {
            best = Some((label, count));
        }
    }
    best.map(|(l, _)| l.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fenced(approach: &str, code: &str) -> Result<String, ReasoningError> {
        Ok(format!("APPROACH: {}\n```rust\n{}\n```", approach, code))
    }

    #[test]
    fn highest_confidence_wins_and_ties_go_to_earlier_strategy() {
        let candidates = vec![
            FixCandidate::from_response(FixStrategy::Conservative, Ok("let x = 1;".to_string())),
            FixCandidate::from_response(FixStrategy::Creative, fenced("add guard", "a();")),
            FixCandidate::from_response(FixStrategy::Specialized, fenced("narrow type", "b();")),
        ];
        match select_consensus(candidates, ConsensusPolicy::HighestConfidence) {
            Consensus::Selected {
                candidate,
                agreement,
            } => {
                assert_eq!(candidate.strategy, FixStrategy::Creative);
                assert_eq!(candidate.approach, "add guard");
                assert_eq!(agreement, 1);
            }
            other => panic!("expected a selection, got {:?}", other),
        }
    }

    #[test]
    fn majority_policy_prefers_the_shared_approach() {
        let candidates = vec![
            FixCandidate::from_response(FixStrategy::Conservative, fenced("rewrite loop", "a();")),
            FixCandidate::from_response(FixStrategy::Creative, Ok("APPROACH: add guard\nif x {\n    y();\n}".to_string())),
            FixCandidate::from_response(FixStrategy::Specialized, Ok("APPROACH: add guard\nif x {\n}".to_string())),
        ];
        match select_consensus(candidates, ConsensusPolicy::MajorityApproach) {
            Consensus::Selected {
                candidate,
                agreement,
            } => {
                assert_eq!(candidate.approach, "add guard");
                assert_eq!(candidate.strategy, FixStrategy::Creative);
                assert_eq!(agreement, 2);
            }
            other => panic!("expected a selection, got {:?}", other),
        }
    }

    #[test]
    fn no_usable_candidates_means_no_consensus() {
        let candidates = vec![
            FixCandidate::from_response(
                FixStrategy::Conservative,
                Err(ReasoningError::Timeout(30)),
            ),
            FixCandidate::from_response(
                FixStrategy::Creative,
                Ok("I am not sure how to fix this.".to_string()),
            ),
        ];
        assert_eq!(candidates[0].confidence, 0.0);
        assert_eq!(candidates[1].confidence, NO_CODE_CONFIDENCE);

        match select_consensus(candidates, ConsensusPolicy::HighestConfidence) {
            Consensus::NoConsensus { reasons } => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].contains("timed out"));
                assert!(reasons[1].contains("no code"));
            }
            other => panic!("expected no consensus, got {:?}", other),
        }
    }

    #[test]
    fn policy_defaults_to_highest_confidence() {
        assert_eq!(ConsensusPolicy::default(), ConsensusPolicy::HighestConfidence);
    }
}
