use super::prompts;
use crate::defect::ProducerKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One way of asking for a fix. Each strategy yields one candidate per defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    Conservative,
    Creative,
    /// Guidance tailored to the producer that reported the defect.
    Specialized,
}

impl FixStrategy {
    pub fn defaults() -> Vec<FixStrategy> {
        vec![
            FixStrategy::Conservative,
            FixStrategy::Creative,
            FixStrategy::Specialized,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FixStrategy::Conservative => "conservative",
            FixStrategy::Creative => "creative",
            FixStrategy::Specialized => "specialized",
        }
    }

    /// Label used when the response carries no `APPROACH:` line.
    pub fn default_approach(&self) -> &'static str {
        match self {
            FixStrategy::Conservative => "minimal edit",
            FixStrategy::Creative => "restructure",
            FixStrategy::Specialized => "targeted fix",
        }
    }

    pub fn system_prompt(&self, kind: ProducerKind) -> String {
        let guidance = match (self, kind) {
            (FixStrategy::Conservative, _) => prompts::CONSERVATIVE_GUIDANCE,
            (FixStrategy::Creative, _) => prompts::CREATIVE_GUIDANCE,
            (FixStrategy::Specialized, ProducerKind::TypeCheck) => prompts::TYPE_CHECK_GUIDANCE,
            (FixStrategy::Specialized, ProducerKind::StaticAnalysis) => {
                prompts::STATIC_ANALYSIS_GUIDANCE
            }
            (FixStrategy::Specialized, ProducerKind::TestFailure) => prompts::TEST_FAILURE_GUIDANCE,
        };
        prompts::system_prompt(guidance)
    }
}

impl fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialized_prompt_follows_producer_kind() {
        let lint = FixStrategy::Specialized.system_prompt(ProducerKind::StaticAnalysis);
        assert!(lint.contains("specialized (static analysis)"));
        let tests = FixStrategy::Specialized.system_prompt(ProducerKind::TestFailure);
        assert!(tests.contains("specialized (test failure)"));
        let conservative = FixStrategy::Conservative.system_prompt(ProducerKind::TestFailure);
        assert!(conservative.contains("STRATEGY: conservative"));
    }
}
