//! Defect ordering. Lower score is fixed first.

use crate::defect::Defect;
use crate::store::SuccessRates;

pub const DEFAULT_BATCH_SIZE: usize = 10;

const SEVERITY_WEIGHT: f64 = 1000.0;
const CLASS_WEIGHT: f64 = 100.0;
const ATTEMPT_WEIGHT: f64 = 10.0;
const HISTORY_WEIGHT: f64 = 5.0;

/// `severity*1000 + class*100 + attempts*10 - success_rate*5`
pub fn priority_score(defect: &Defect, success_rate: f64) -> f64 {
    defect.severity.rank() as f64 * SEVERITY_WEIGHT
        + defect.producer_kind.class_rank() as f64 * CLASS_WEIGHT
        + defect.attempts as f64 * ATTEMPT_WEIGHT
        - success_rate.clamp(0.0, 1.0) * HISTORY_WEIGHT
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedDefect {
    pub id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Prioritizer {
    batch_size: usize,
}

impl Default for Prioritizer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl Prioritizer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Score and order every open defect. Ties keep input order.
    pub fn rank<'a, I>(&self, defects: I, history: &dyn SuccessRates) -> Vec<RankedDefect>
    where
        I: IntoIterator<Item = &'a Defect>,
    {
        let mut ranked: Vec<RankedDefect> = defects
            .into_iter()
            .filter(|d| d.is_open())
            .map(|d| RankedDefect {
                id: d.id.clone(),
                score: priority_score(d, history.success_rate(d.defect_type(), d.category())),
            })
            .collect();
        // sort_by is stable
        ranked.sort_by(|a, b| a.score.total_cmp(&b.score));
        ranked
    }

    /// The next batch to attempt.
    pub fn select<'a, I>(&self, defects: I, history: &dyn SuccessRates) -> Vec<RankedDefect>
    where
        I: IntoIterator<Item = &'a Defect>,
    {
        let mut ranked = self.rank(defects, history);
        ranked.truncate(self.batch_size);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defect::{DefectStatus, ProducerKind, Severity};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct Rates(HashMap<(String, String), f64>);

    impl SuccessRates for Rates {
        fn success_rate(&self, defect_type: &str, category: &str) -> f64 {
            self.0
                .get(&(defect_type.to_string(), category.to_string()))
                .copied()
                .unwrap_or(0.5)
        }
    }

    fn no_history() -> Rates {
        Rates(HashMap::new())
    }

    fn defect(kind: ProducerKind, severity: Severity, line: usize) -> Defect {
        Defect::new(
            kind,
            severity,
            Some(PathBuf::from("src/lib.ts")),
            Some(line),
            "problem".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn fresh_high_type_check_without_history_scores_997_5() {
        let d = defect(ProducerKind::TypeCheck, Severity::High, 1);
        let ranked = Prioritizer::default().rank([&d], &no_history());
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].score - 997.5).abs() < 1e-9);
    }

    #[test]
    fn repeated_failures_push_a_defect_back_but_severity_dominates() {
        let mut tried = defect(ProducerKind::TypeCheck, Severity::High, 1);
        tried.attempts = 2;
        let rates = Rates(HashMap::from([(
            ("type_check".to_string(), "general".to_string()),
            0.8,
        )]));
        assert!((priority_score(&tried, 0.8) - 1016.0).abs() < 1e-9);

        let medium = defect(ProducerKind::StaticAnalysis, Severity::Medium, 2);
        let ranked = Prioritizer::default().rank([&medium, &tried], &rates);
        assert_eq!(ranked[0].id, tried.id);
        assert!(ranked[1].score >= 2097.5 - 1e-9);
    }

    #[test]
    fn only_open_defects_are_ranked_and_batch_is_clamped() {
        let a = defect(ProducerKind::TestFailure, Severity::Low, 1);
        let mut b = defect(ProducerKind::TypeCheck, Severity::Critical, 2);
        b.status = DefectStatus::Blocked;
        let mut c = defect(ProducerKind::TypeCheck, Severity::Critical, 3);
        c.status = DefectStatus::Fixed;
        let d = defect(ProducerKind::StaticAnalysis, Severity::Critical, 4);

        let prioritizer = Prioritizer::new(0);
        assert_eq!(prioritizer.batch_size(), 1);
        let batch = prioritizer.select([&a, &b, &c, &d], &no_history());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, d.id);
    }

    #[test]
    fn ordering_is_deterministic_and_stable_on_ties() {
        let defects: Vec<Defect> = (1..=6)
            .map(|line| defect(ProducerKind::StaticAnalysis, Severity::Medium, line))
            .collect();
        let first = Prioritizer::default().rank(&defects, &no_history());
        let second = Prioritizer::default().rank(&defects, &no_history());
        assert_eq!(first, second);
        let ids: Vec<_> = first.iter().map(|r| r.id.clone()).collect();
        let expected: Vec<_> = defects.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, expected);
    }
}
