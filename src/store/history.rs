//! Fix attempt history
//!
//! Every attempt, successful or not, appends one record to
//! `.remedy/fix_history.json`. Records are never rewritten. The prioritizer
//! reads per-(type, category) success rates back out of it.

use super::{read_document, to_pretty_json, write_atomic, STATE_VERSION};
use crate::defect::Defect;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Success rate reported when nothing is known yet.
pub const NEUTRAL_SUCCESS_RATE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixAttemptRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub defect_id: String,
    pub defect_type: String,
    pub category: String,
    pub strategy_used: String,
    pub success: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FixAttemptRecord {
    pub fn new(
        run_id: Uuid,
        defect: &Defect,
        strategy_used: &str,
        failure_reason: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            defect_id: defect.id.clone(),
            defect_type: defect.defect_type().to_string(),
            category: defect.category().to_string(),
            strategy_used: strategy_used.to_string(),
            success: failure_reason.is_none(),
            failure_reason,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyStats {
    pub attempts: usize,
    pub successes: usize,
}

impl StrategyStats {
    pub fn rate(&self) -> f64 {
        if self.attempts == 0 {
            NEUTRAL_SUCCESS_RATE
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_attempts: usize,
    pub successes: usize,
    pub failures: usize,
    #[serde(default)]
    pub by_strategy: BTreeMap<String, StrategyStats>,
}

impl HistoryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            NEUTRAL_SUCCESS_RATE
        } else {
            self.successes as f64 / self.total_attempts as f64
        }
    }

    pub fn display(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("Fix attempts: {}\n", self.total_attempts));
        output.push_str(&format!(
            "Succeeded: {} ({:.1}%)\n",
            self.successes,
            self.success_rate() * 100.0
        ));
        output.push_str(&format!("Failed: {}\n", self.failures));

        if !self.by_strategy.is_empty() {
            output.push_str("\nBy strategy:\n");
            for (name, stats) in &self.by_strategy {
                output.push_str(&format!(
                    "  {}: {}/{} ({:.0}%)\n",
                    name,
                    stats.successes,
                    stats.attempts,
                    stats.rate() * 100.0
                ));
            }
        }
        output
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryDocument {
    version: u32,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    records: Vec<FixAttemptRecord>,
    #[serde(default)]
    stats: HistoryStats,
}

/// Lookup of historical fix success, consumed by the prioritizer.
pub trait SuccessRates {
    /// Fraction of past attempts on this (type, category) that verified, in [0, 1].
    fn success_rate(&self, defect_type: &str, category: &str) -> f64;
}

pub struct FixHistory {
    path: PathBuf,
    records: Vec<FixAttemptRecord>,
}

impl FixHistory {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let records = read_document::<HistoryDocument>(path)?
            .map(|doc| doc.records)
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let doc = HistoryDocument {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            records: self.records.clone(),
            stats: self.stats(),
        };
        write_atomic(&self.path, &to_pretty_json(&doc, "fix history")?)
    }

    pub fn append(&mut self, record: FixAttemptRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[FixAttemptRecord] {
        &self.records
    }

    pub fn stats(&self) -> HistoryStats {
        let mut stats = HistoryStats {
            total_attempts: self.records.len(),
            ..HistoryStats::default()
        };
        for record in &self.records {
            let entry = stats
                .by_strategy
                .entry(record.strategy_used.clone())
                .or_default();
            entry.attempts += 1;
            if record.success {
                stats.successes += 1;
                entry.successes += 1;
            } else {
                stats.failures += 1;
            }
        }
        stats
    }
}

impl SuccessRates for FixHistory {
    fn success_rate(&self, defect_type: &str, category: &str) -> f64 {
        let (attempts, successes) = self
            .records
            .iter()
            .filter(|r| r.defect_type == defect_type && r.category == category)
            .fold((0usize, 0usize), |(n, ok), r| (n + 1, ok + usize::from(r.success)));
        if attempts == 0 {
            NEUTRAL_SUCCESS_RATE
        } else {
            successes as f64 / attempts as f64
        }
    }
}
