//! Fix generation
//!
//! For one defect: build the root-cause context, ask every strategy for a
//! candidate concurrently, then pick a winner by consensus.

pub mod consensus;
pub mod context;
pub mod extract;
pub mod prompts;
pub mod strategy;

pub use consensus::{select_consensus, Consensus, ConsensusPolicy, FixCandidate};
pub use context::{build_context, EditTarget, LineRegion, RootCauseContext, DEFAULT_CONTEXT_RADIUS};
pub use strategy::FixStrategy;

use crate::defect::Defect;
use crate::reasoning::{ReasoningBackend, ReasoningError};
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Everything the apply step needs about one generation round.
#[derive(Debug, Clone)]
pub struct FixProposal {
    pub context: RootCauseContext,
    pub consensus: Consensus,
}

pub struct FixGenerator {
    backend: Arc<dyn ReasoningBackend>,
    strategies: Vec<FixStrategy>,
    context_radius: usize,
    call_timeout: Duration,
    max_tokens: u32,
    policy: ConsensusPolicy,
}

impl FixGenerator {
    pub fn new(backend: Arc<dyn ReasoningBackend>) -> Self {
        Self {
            backend,
            strategies: FixStrategy::defaults(),
            context_radius: DEFAULT_CONTEXT_RADIUS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_tokens: DEFAULT_MAX_TOKENS,
            policy: ConsensusPolicy::default(),
        }
    }

    /// An empty list keeps the defaults.
    pub fn with_strategies(mut self, strategies: Vec<FixStrategy>) -> Self {
        if !strategies.is_empty() {
            self.strategies = strategies;
        }
        self
    }

    pub fn with_context_radius(mut self, radius: usize) -> Self {
        self.context_radius = radius;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    pub fn with_policy(mut self, policy: ConsensusPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn propose(&self, repo_root: &Path, defect: &Defect) -> FixProposal {
        let context = build_context(repo_root, defect, self.context_radius);
        let candidates = self.generate_candidates(defect, &context).await;
        for candidate in &candidates {
            debug!(
                defect = %defect.id,
                strategy = %candidate.strategy,
                approach = %candidate.approach,
                confidence = candidate.confidence,
                usable = candidate.is_usable(),
                "candidate"
            );
        }
        FixProposal {
            consensus: select_consensus(candidates, self.policy),
            context,
        }
    }

    /// One request per strategy, all in flight at once. Results keep strategy order.
    pub async fn generate_candidates(
        &self,
        defect: &Defect,
        context: &RootCauseContext,
    ) -> Vec<FixCandidate> {
        let user = prompts::user_prompt(context);
        let requests = self.strategies.iter().map(|strategy| {
            let system = strategy.system_prompt(defect.producer_kind);
            let user = user.as_str();
            async move {
                let response = match tokio::time::timeout(
                    self.call_timeout,
                    self.backend.generate(&system, user, self.max_tokens),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ReasoningError::Timeout(self.call_timeout.as_secs())),
                };
                FixCandidate::from_response(*strategy, response)
            }
        });
        join_all(requests).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defect::{ProducerKind, Severity};
    use crate::reasoning::fake::ScriptedBackend;
    use chrono::Utc;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn defect() -> Defect {
        Defect::new(
            ProducerKind::TypeCheck,
            Severity::High,
            Some(PathBuf::from("src/app.ts")),
            Some(2),
            "Type 'string' is not assignable to type 'number'.".to_string(),
            Utc::now(),
        )
    }

    fn repo() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(
            tmp.path().join("src/app.ts"),
            "const a = 1;\nconst b: number = \"2\";\nconst c = 3;\n",
        )
        .unwrap();
        tmp
    }

    #[tokio::test]
    async fn every_strategy_is_asked_and_the_best_candidate_wins() {
        let tmp = repo();
        let backend = Arc::new(
            ScriptedBackend::answering("APPROACH: cast\nconst b: number = Number(\"2\");")
                .on(
                    "STRATEGY: specialized",
                    Ok("APPROACH: fix literal\n```ts\nconst b: number = 2;\n```".to_string()),
                ),
        );
        let generator = FixGenerator::new(backend.clone());
        let proposal = generator.propose(tmp.path(), &defect()).await;

        assert_eq!(backend.calls(), 3);
        assert!(!proposal.context.is_text_only());
        match proposal.consensus {
            Consensus::Selected { candidate, .. } => {
                assert_eq!(candidate.strategy, FixStrategy::Specialized);
                assert_eq!(candidate.extracted.unwrap().code, "const b: number = 2;");
            }
            other => panic!("expected selection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn timed_out_calls_become_unusable_candidates() {
        let tmp = repo();
        let backend = Arc::new(
            ScriptedBackend::answering("```ts\nconst b = 2;\n```")
                .with_delay(Duration::from_millis(200)),
        );
        let generator = FixGenerator::new(backend)
            .with_strategies(vec![FixStrategy::Conservative, FixStrategy::Creative])
            .with_call_timeout(Duration::from_millis(10));

        let proposal = generator.propose(tmp.path(), &defect()).await;
        match proposal.consensus {
            Consensus::NoConsensus { reasons } => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons.iter().all(|r| r.contains("timed out")));
            }
            other => panic!("expected no consensus, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unavailable_backend_yields_no_consensus() {
        let tmp = repo();
        let generator = FixGenerator::new(Arc::new(ScriptedBackend::failing(
            ReasoningError::Unavailable("no key".to_string()),
        )));
        let proposal = generator.propose(tmp.path(), &defect()).await;
        assert!(matches!(proposal.consensus, Consensus::NoConsensus { .. }));
    }
}
