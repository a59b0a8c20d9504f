//! The repair loop.
//!
//! `Pipeline` owns both stores. Collection merges producer output into the
//! defect store; `fix_batch` then takes defects one at a time in priority
//! order, asks the generator for a fix, applies it through the transactional
//! engine and records the outcome. Ranking is redone after every defect so
//! fresh history counts immediately.

use crate::apply::{ApplyEngine, ApplyOutcome, Edit};
use crate::collect::{collect_from_outputs, default_producers, run_producers, CollectionReport, ProducerOutput};
use crate::config::Config;
use crate::defect::{Defect, DefectStatus, FixDetails};
use crate::fix::{Consensus, FixCandidate, FixGenerator, RootCauseContext};
use crate::normalize::Normalizer;
use crate::prioritize::Prioritizer;
use crate::report::StatusReport;
use crate::store::{DefectStore, FixAttemptRecord, FixHistory, MergeOutcome, StateDir};
use crate::verify::Verifier;
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::RuntimeFlavor;
use tracing::{info, warn};
use uuid::Uuid;

/// Set from a signal handler; checked between defects.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CollectSummary {
    pub merge: MergeOutcome,
    pub report: CollectionReport,
}

impl CollectSummary {
    pub fn display(&self) -> String {
        let mut out = String::new();
        for run in &self.report.runs {
            out.push_str(&format!(
                "  {} ({}): {} defects{}\n",
                run.name,
                run.kind,
                run.defects,
                if run.clean { "" } else { " [not trusted]" }
            ));
        }
        out.push_str(&format!(
            "Added {}, refreshed {}, reopened {}, resolved {}, unchanged {}\n",
            self.merge.added,
            self.merge.refreshed,
            self.merge.reopened,
            self.merge.resolved,
            self.merge.unchanged
        ));
        for warning in &self.report.warnings {
            out.push_str(&format!("  warning: {}\n", warning));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Fixed,
    Reverted,
    FailedToApply,
    /// No usable candidate; nothing was charged.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectOutcome {
    pub defect_id: String,
    pub location: String,
    pub result: AttemptResult,
    pub detail: String,
    pub blocked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Option<Uuid>,
    pub fixed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub outcomes: Vec<DefectOutcome>,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn blocked_ids(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.blocked)
            .map(|o| o.defect_id.as_str())
    }

    pub fn display(&self) -> String {
        let mut out = format!(
            "Fixed {}, failed {}, blocked {}, skipped {}\n",
            self.fixed, self.failed, self.blocked, self.skipped
        );
        if self.cancelled {
            out.push_str("Run cancelled before the batch finished.\n");
        }
        let blocked: Vec<&DefectOutcome> = self.outcomes.iter().filter(|o| o.blocked).collect();
        if !blocked.is_empty() {
            out.push_str("\nNeeds manual attention:\n");
            for outcome in blocked {
                out.push_str(&format!(
                    "  {} {}: {}\n",
                    outcome.defect_id, outcome.location, outcome.detail
                ));
            }
        }
        out
    }
}

pub struct Pipeline {
    repo_root: PathBuf,
    state: StateDir,
    config: Config,
    normalizer: Normalizer,
    defects: DefectStore,
    history: FixHistory,
    run_id: Uuid,
}

impl Pipeline {
    /// Load state for `repo_root`. Missing state files start empty.
    pub fn open(repo_root: &Path, config: Config) -> Result<Self> {
        let repo_root = repo_root
            .canonicalize()
            .with_context(|| format!("Repository not found: {}", repo_root.display()))?;
        let state = StateDir::new(&repo_root);
        let defects = DefectStore::load(&state.defects_path()).context("Failed to load defect store")?;
        let history = FixHistory::load(&state.history_path()).context("Failed to load fix history")?;
        let normalizer = Normalizer::new().map_err(|e| anyhow!("Invalid diagnostic pattern: {}", e))?;
        Ok(Self {
            repo_root,
            state,
            config,
            normalizer,
            defects,
            history,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn defects(&self) -> &DefectStore {
        &self.defects
    }

    pub fn history(&self) -> &FixHistory {
        &self.history
    }

    pub fn save(&self) -> Result<()> {
        self.state.ensure().context("Failed to prepare state directory")?;
        self.defects.save().context("Failed to save defect store")?;
        self.history.save().context("Failed to save fix history")?;
        Ok(())
    }

    /// Run the configured producers (or the detected defaults) and merge.
    pub fn collect(&mut self) -> Result<CollectSummary> {
        let producers = if self.config.producers.is_empty() {
            default_producers(&self.repo_root)
        } else {
            self.config.producers.clone()
        };
        if producers.is_empty() {
            bail!(
                "No diagnostic producers configured in remedy.toml and none detected for {}",
                self.repo_root.display()
            );
        }
        let outputs = run_producers(&self.repo_root, &producers);
        self.ingest(outputs)
    }

    /// Normalize already-captured producer output and merge it.
    pub fn ingest(&mut self, outputs: Vec<ProducerOutput>) -> Result<CollectSummary> {
        let now = Utc::now();
        let report = collect_from_outputs(&self.normalizer, &self.repo_root, outputs, now);
        let merge = self.defects.merge(report.defects.clone(), &report.scope, now);
        info!(
            added = merge.added,
            reopened = merge.reopened,
            resolved = merge.resolved,
            unchanged = merge.unchanged,
            "collection merged"
        );
        self.save()?;
        Ok(CollectSummary { merge, report })
    }

    /// Attempt up to `batch_size` defects, highest priority first.
    ///
    /// Apply errors that leave the tree unrestored abort the run. Everything
    /// else is recorded and the loop moves on.
    pub async fn fix_batch(
        &mut self,
        generator: &FixGenerator,
        verifier: &dyn Verifier,
        cancel: &CancelFlag,
    ) -> Result<RunSummary> {
        let prioritizer = Prioritizer::new(self.config.batch_size);
        let engine = ApplyEngine::new(self.repo_root.clone(), self.state.backups_dir());
        let mut attempted: HashSet<String> = HashSet::new();
        let mut summary = RunSummary {
            run_id: Some(self.run_id),
            ..RunSummary::default()
        };

        info!(
            run = %self.run_id,
            backend = generator.backend_name(),
            verifier = %verifier.describe(),
            batch = prioritizer.batch_size(),
            "fix run started"
        );

        while attempted.len() < prioritizer.batch_size() {
            if cancel.is_cancelled() {
                warn!("cancel requested, stopping before the next defect");
                summary.cancelled = true;
                break;
            }

            let next = prioritizer
                .rank(
                    self.defects.defects().iter().filter(|d| !attempted.contains(&d.id)),
                    &self.history,
                )
                .into_iter()
                .next();
            let Some(next) = next else {
                break;
            };
            let Some(defect) = self.defects.get(&next.id).cloned() else {
                break;
            };
            attempted.insert(defect.id.clone());
            info!(defect = %defect.id, score = next.score, location = %defect.location(), "attempting defect");

            let proposal = generator.propose(&self.repo_root, &defect).await;
            let outcome = match proposal.consensus {
                Consensus::NoConsensus { reasons } => {
                    let detail = if reasons.is_empty() {
                        "no usable candidate".to_string()
                    } else {
                        reasons.join("; ")
                    };
                    warn!(defect = %defect.id, reason = %detail, "no usable fix, skipped");
                    summary.skipped += 1;
                    DefectOutcome {
                        defect_id: defect.id.clone(),
                        location: defect.location(),
                        result: AttemptResult::Skipped,
                        detail,
                        blocked: false,
                    }
                }
                Consensus::Selected { candidate, agreement } => {
                    let applied = run_blocking(|| {
                        apply_candidate(&engine, &proposal.context, &candidate, verifier)
                    })
                    .with_context(|| format!("Rollback failed while fixing {}", defect.id))?;
                    self.record(&defect, &candidate, agreement, applied, &mut summary)
                }
            };
            summary.outcomes.push(outcome);
            self.save()?;
        }

        info!(
            fixed = summary.fixed,
            failed = summary.failed,
            blocked = summary.blocked,
            skipped = summary.skipped,
            "fix run finished"
        );
        Ok(summary)
    }

    fn record(
        &mut self,
        defect: &Defect,
        candidate: &FixCandidate,
        agreement: usize,
        applied: ApplyOutcome,
        summary: &mut RunSummary,
    ) -> DefectOutcome {
        let now = Utc::now();
        let strategy = candidate.strategy.name();
        match applied.failure_reason() {
            None => {
                self.defects.mark_fixed(
                    &defect.id,
                    FixDetails {
                        strategy: strategy.to_string(),
                        approach: candidate.approach.clone(),
                        confidence: candidate.confidence,
                        agreement,
                        fixed_at: now,
                    },
                    now,
                );
                self.history
                    .append(FixAttemptRecord::new(self.run_id, defect, strategy, None, now));
                summary.fixed += 1;
                info!(defect = %defect.id, strategy, "defect fixed");
                DefectOutcome {
                    defect_id: defect.id.clone(),
                    location: defect.location(),
                    result: AttemptResult::Fixed,
                    detail: format!("{} via {}", candidate.approach, strategy),
                    blocked: false,
                }
            }
            Some(reason) => {
                let status = self
                    .defects
                    .record_failure(&defect.id, reason, self.config.max_attempts, now);
                self.history.append(FixAttemptRecord::new(
                    self.run_id,
                    defect,
                    strategy,
                    Some(reason.to_string()),
                    now,
                ));
                let blocked = status == Some(DefectStatus::Blocked);
                summary.failed += 1;
                if blocked {
                    summary.blocked += 1;
                }
                warn!(defect = %defect.id, reason, blocked, "fix attempt failed");
                DefectOutcome {
                    defect_id: defect.id.clone(),
                    location: defect.location(),
                    result: if matches!(applied, ApplyOutcome::Reverted { .. }) {
                        AttemptResult::Reverted
                    } else {
                        AttemptResult::FailedToApply
                    },
                    detail: reason.to_string(),
                    blocked,
                }
            }
        }
    }

    pub fn unblock(&mut self, id: &str) -> Result<bool> {
        let changed = self.defects.unblock(id, Utc::now());
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    pub fn unblock_all(&mut self) -> Result<usize> {
        let count = self.defects.unblock_all(Utc::now());
        if count > 0 {
            self.save()?;
        }
        Ok(count)
    }

    pub fn report(&self) -> StatusReport {
        StatusReport::build(&self.defects, &self.history, self.config.batch_size)
    }
}

/// Runs file IO and verification commands without stalling the other tasks
/// on a multi-threaded runtime. `block_in_place` panics on a current-thread
/// runtime, so there the work runs inline.
fn run_blocking<T>(work: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

fn apply_candidate(
    engine: &ApplyEngine,
    context: &RootCauseContext,
    candidate: &FixCandidate,
    verifier: &dyn Verifier,
) -> Result<ApplyOutcome, crate::error::ApplyError> {
    let (Some(file), Some(target), Some(extracted)) =
        (context.file_path.as_deref(), context.edit_target(), candidate.extracted.as_ref())
    else {
        return Ok(ApplyOutcome::FailedToApply {
            reason: "no readable target file for this defect".to_string(),
        });
    };
    engine.apply(
        Edit {
            file,
            target,
            code: &extracted.code,
        },
        verifier,
    )
}
