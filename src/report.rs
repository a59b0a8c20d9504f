//! Status report: store statistics, fix history and what needs a human.

use crate::defect::{ProducerKind, Severity};
use crate::prioritize::Prioritizer;
use crate::store::defects::count_open_by_severity;
use crate::store::{DefectStats, DefectStore, FixHistory, HistoryStats};
use crate::util::truncate;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub location: String,
    pub kind: ProducerKind,
    pub severity: Severity,
    pub score: f64,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedEntry {
    pub id: String,
    pub location: String,
    pub attempts: u32,
    pub last_failure: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub defects: DefectStats,
    /// Open critical and high severity defects.
    pub urgent_open: usize,
    pub history: HistoryStats,
    /// The next batch `fix` would attempt.
    pub queue: Vec<QueueEntry>,
    pub blocked: Vec<BlockedEntry>,
}

impl StatusReport {
    pub fn build(defects: &DefectStore, history: &FixHistory, batch_size: usize) -> Self {
        let queue = Prioritizer::new(batch_size)
            .select(defects.defects(), history)
            .into_iter()
            .filter_map(|ranked| {
                let defect = defects.get(&ranked.id)?;
                Some(QueueEntry {
                    id: defect.id.clone(),
                    location: defect.location(),
                    kind: defect.producer_kind,
                    severity: defect.severity,
                    score: ranked.score,
                    attempts: defect.attempts,
                    message: defect.message.clone(),
                })
            })
            .collect();

        let blocked = defects
            .blocked()
            .map(|defect| BlockedEntry {
                id: defect.id.clone(),
                location: defect.location(),
                attempts: defect.attempts,
                last_failure: defect.last_failure.clone(),
                message: defect.message.clone(),
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            defects: defects.stats(),
            urgent_open: count_open_by_severity(defects.defects(), Severity::Critical)
                + count_open_by_severity(defects.defects(), Severity::High),
            history: history.stats(),
            queue,
            blocked,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let stats = &self.defects;
        out.push_str(&format!(
            "Defects: {} total, {} open, {} fixed, {} blocked\n",
            stats.total, stats.open, stats.fixed, stats.blocked
        ));
        if self.urgent_open > 0 {
            out.push_str(&format!("  {} open at critical or high severity\n", self.urgent_open));
        }
        if !stats.by_severity.is_empty() {
            let parts: Vec<String> = stats
                .by_severity
                .iter()
                .map(|(severity, count)| format!("{} {}", count, severity))
                .collect();
            out.push_str(&format!("  by severity: {}\n", parts.join(", ")));
        }
        if !stats.by_type.is_empty() {
            let parts: Vec<String> = stats
                .by_type
                .iter()
                .map(|(kind, count)| format!("{} {}", count, kind))
                .collect();
            out.push_str(&format!("  by type: {}\n", parts.join(", ")));
        }

        out.push('\n');
        out.push_str(&self.history.display());

        if !self.queue.is_empty() {
            out.push_str("\nNext up:\n");
            for entry in &self.queue {
                out.push_str(&format!(
                    "  {:>8.1}  [{}] {} {}\n",
                    entry.score,
                    entry.severity,
                    entry.location,
                    truncate(&entry.message, 80)
                ));
            }
        }

        if !self.blocked.is_empty() {
            out.push_str("\nBlocked (run `remedy unblock <id>` after a manual look):\n");
            for entry in &self.blocked {
                out.push_str(&format!(
                    "  {}  {} after {} attempts\n",
                    entry.id, entry.location, entry.attempts
                ));
                if let Some(reason) = &entry.last_failure {
                    out.push_str(&format!("      last failure: {}\n", truncate(reason, 120)));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defect::{Defect, FixDetails};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn defect(kind: ProducerKind, severity: Severity, file: &str, line: usize) -> Defect {
        Defect::new(
            kind,
            severity,
            Some(file.into()),
            Some(line),
            format!("problem in {}", file),
            Utc::now(),
        )
    }

    #[test]
    fn report_lists_queue_in_priority_order_and_blocked_defects() {
        let tmp = TempDir::new().unwrap();
        let mut store = DefectStore::load(&tmp.path().join("defects.json")).unwrap();
        let history = FixHistory::load(&tmp.path().join("history.json")).unwrap();

        let low = defect(ProducerKind::TestFailure, Severity::Low, "a.py", 3);
        let high = defect(ProducerKind::TypeCheck, Severity::High, "b.ts", 9);
        let stuck = defect(ProducerKind::StaticAnalysis, Severity::Medium, "c.rs", 1);
        let done = defect(ProducerKind::StaticAnalysis, Severity::Low, "d.rs", 2);
        let stuck_id = stuck.id.clone();
        let done_id = done.id.clone();
        let scope: BTreeSet<ProducerKind> = BTreeSet::new();
        store.merge(vec![low, high, stuck, done], &scope, Utc::now());
        store.record_failure(&stuck_id, "verification failed: 2 tests failed", 1, Utc::now());
        store.mark_fixed(
            &done_id,
            FixDetails {
                strategy: "conservative".to_string(),
                approach: "remove import".to_string(),
                confidence: 0.85,
                agreement: 2,
                fixed_at: Utc::now(),
            },
            Utc::now(),
        );

        let report = StatusReport::build(&store, &history, 10);
        assert_eq!(report.defects.total, 4);
        assert_eq!(report.defects.blocked, 1);
        assert_eq!(report.urgent_open, 1);
        assert_eq!(report.queue.len(), 2);
        assert_eq!(report.queue[0].location, "b.ts:9");
        assert_eq!(report.blocked[0].id, stuck_id);

        let text = report.render();
        assert!(text.contains("4 total, 2 open, 1 fixed, 1 blocked"));
        assert!(text.contains("last failure: verification failed"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["defects"]["open"], 2);
        assert_eq!(json["blocked"][0]["lastFailure"], "verification failed: 2 tests failed");
    }

    #[test]
    fn batch_size_bounds_the_queue() {
        let tmp = TempDir::new().unwrap();
        let mut store = DefectStore::load(&tmp.path().join("defects.json")).unwrap();
        let history = FixHistory::load(&tmp.path().join("history.json")).unwrap();
        let incoming = (1..=5)
            .map(|line| defect(ProducerKind::TypeCheck, Severity::High, "x.ts", line))
            .collect();
        store.merge(incoming, &BTreeSet::new(), Utc::now());
        assert_eq!(StatusReport::build(&store, &history, 2).queue.len(), 2);
    }
}
