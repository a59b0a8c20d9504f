use super::{read_document, to_pretty_json, write_atomic, STATE_VERSION};
use crate::defect::{Defect, DefectStatus, FixDetails, ProducerKind, Resolution, Severity};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectStats {
    pub total: usize,
    pub open: usize,
    pub fixed: usize,
    pub blocked: usize,
    #[serde(default)]
    pub by_type: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_severity: BTreeMap<String, usize>,
}

impl DefectStats {
    pub fn compute(defects: &[Defect]) -> Self {
        let mut stats = Self {
            total: defects.len(),
            ..Self::default()
        };
        for defect in defects {
            match defect.status {
                DefectStatus::Open => stats.open += 1,
                DefectStatus::Fixed => stats.fixed += 1,
                DefectStatus::Blocked => stats.blocked += 1,
            }
            *stats
                .by_type
                .entry(defect.defect_type().to_string())
                .or_insert(0) += 1;
            *stats
                .by_severity
                .entry(defect.severity.as_str().to_string())
                .or_insert(0) += 1;
        }
        stats
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefectDocument {
    version: u32,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    defects: Vec<Defect>,
    #[serde(default)]
    stats: DefectStats,
}

/// Counts of what a merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub refreshed: usize,
    pub reopened: usize,
    pub resolved: usize,
    pub unchanged: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.added + self.refreshed + self.reopened + self.resolved > 0
    }
}

/// The persisted defect collection.
pub struct DefectStore {
    path: PathBuf,
    defects: Vec<Defect>,
}

impl DefectStore {
    /// Load from `path`. Absent or corrupt files load as an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let defects = read_document::<DefectDocument>(path)?
            .map(|doc| doc.defects)
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            defects,
        })
    }

    /// Recompute statistics and write the document atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        let doc = DefectDocument {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            defects: self.defects.clone(),
            stats: self.stats(),
        };
        write_atomic(&self.path, &to_pretty_json(&doc, "defect store")?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }

    pub fn stats(&self) -> DefectStats {
        DefectStats::compute(&self.defects)
    }

    pub fn get(&self, id: &str) -> Option<&Defect> {
        self.defects.iter().find(|d| d.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Defect> {
        self.defects.iter_mut().find(|d| d.id == id)
    }

    pub fn blocked(&self) -> impl Iterator<Item = &Defect> {
        self.defects
            .iter()
            .filter(|d| d.status == DefectStatus::Blocked)
    }

    pub fn merge(
        &mut self,
        incoming: Vec<Defect>,
        scope: &BTreeSet<ProducerKind>,
        now: DateTime<Utc>,
    ) -> MergeOutcome {
        merge(&mut self.defects, incoming, scope, now)
    }

    /// Record a verified fix.
    pub fn mark_fixed(&mut self, id: &str, details: FixDetails, now: DateTime<Utc>) -> bool {
        let Some(defect) = self.get_mut(id) else {
            return false;
        };
        defect.status = DefectStatus::Fixed;
        defect.resolution = Some(Resolution::Verified);
        defect.fix_details = Some(details);
        defect.last_failure = None;
        defect.updated_at = now;
        true
    }

    /// Charge one failed attempt; the defect becomes blocked once
    /// `attempts` reaches `max_attempts`.
    pub fn record_failure(
        &mut self,
        id: &str,
        reason: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Option<DefectStatus> {
        let defect = self.get_mut(id)?;
        defect.attempts = defect.attempts.saturating_add(1);
        defect.last_failure = Some(reason.to_string());
        defect.updated_at = now;
        if defect.attempts >= max_attempts.max(1) {
            defect.status = DefectStatus::Blocked;
            info!(defect = %id, attempts = defect.attempts, "defect blocked, needs manual attention");
        }
        Some(defect.status)
    }

    /// Return a blocked defect to the queue with a fresh attempt budget.
    pub fn unblock(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.get_mut(id) {
            Some(defect) if defect.status == DefectStatus::Blocked => {
                reset_blocked(defect, now);
                true
            }
            _ => false,
        }
    }

    pub fn unblock_all(&mut self, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        for defect in &mut self.defects {
            if defect.status == DefectStatus::Blocked {
                reset_blocked(defect, now);
                count += 1;
            }
        }
        count
    }
}

fn reset_blocked(defect: &mut Defect, now: DateTime<Utc>) {
    defect.status = DefectStatus::Open;
    defect.attempts = 0;
    defect.updated_at = now;
}

/// Fold a fresh collection into the existing records.
///
/// Open defects of an in-scope producer that the collection no longer
/// reports are inferred fixed. Producers outside `scope` did not run cleanly,
/// so their silence proves nothing.
pub fn merge(
    existing: &mut Vec<Defect>,
    incoming: Vec<Defect>,
    scope: &BTreeSet<ProducerKind>,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    let mut seen: HashSet<String> = HashSet::new();
    let incoming: Vec<Defect> = incoming
        .into_iter()
        .filter(|d| seen.insert(d.id.clone()))
        .collect();

    let mut index: HashMap<String, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id.clone(), i))
        .collect();

    for fresh in incoming {
        let Some(pos) = index.get(&fresh.id).copied() else {
            index.insert(fresh.id.clone(), existing.len());
            let mut fresh = fresh;
            fresh.status = DefectStatus::Open;
            fresh.created_at = now;
            fresh.updated_at = now;
            existing.push(fresh);
            outcome.added += 1;
            continue;
        };

        let current = &mut existing[pos];
        match current.status {
            // Blocked defects keep their status until a human unblocks them.
            DefectStatus::Open | DefectStatus::Blocked => {
                if refresh(current, &fresh, now) {
                    outcome.refreshed += 1;
                } else {
                    outcome.unchanged += 1;
                }
            }
            DefectStatus::Fixed => {
                refresh(current, &fresh, now);
                current.status = DefectStatus::Open;
                current.resolution = None;
                current.regressions = current.regressions.saturating_add(1);
                current.updated_at = now;
                outcome.reopened += 1;
            }
        }
    }

    for defect in existing.iter_mut() {
        if defect.status == DefectStatus::Open
            && scope.contains(&defect.producer_kind)
            && !seen.contains(&defect.id)
        {
            defect.status = DefectStatus::Fixed;
            defect.resolution = Some(Resolution::Inferred);
            defect.updated_at = now;
            outcome.resolved += 1;
        }
    }

    outcome
}

/// Copy the volatile fields of a re-reported defect. Returns whether anything changed.
fn refresh(current: &mut Defect, fresh: &Defect, now: DateTime<Utc>) -> bool {
    let changed = current.message != fresh.message
        || current.severity != fresh.severity
        || current.column != fresh.column;
    if changed {
        current.message = fresh.message.clone();
        current.severity = fresh.severity;
        current.column = fresh.column;
        current.updated_at = now;
    }
    changed
}

/// Open defects of one severity, used by the report.
pub fn count_open_by_severity(defects: &[Defect], severity: Severity) -> usize {
    defects
        .iter()
        .filter(|d| d.is_open() && d.severity == severity)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    fn defect(kind: ProducerKind, file: &str, line: usize, message: &str) -> Defect {
        Defect::new(
            kind,
            Severity::High,
            Some(PathBuf::from(file)),
            Some(line),
            message.to_string(),
            Utc::now(),
        )
    }

    fn all_scope() -> BTreeSet<ProducerKind> {
        ProducerKind::all().into_iter().collect()
    }

    #[test]
    fn merging_the_same_collection_twice_is_idempotent() {
        let mut store = Vec::new();
        let t0 = Utc::now();
        let batch = vec![
            defect(ProducerKind::TypeCheck, "a.ts", 1, "one"),
            defect(ProducerKind::TypeCheck, "a.ts", 9, "two"),
            defect(ProducerKind::TypeCheck, "a.ts", 1, "duplicate"),
        ];

        let first = merge(&mut store, batch.clone(), &all_scope(), t0);
        assert_eq!(first.added, 2);
        let snapshot = store.clone();

        let second = merge(&mut store, batch, &all_scope(), t0 + Duration::seconds(5));
        assert!(!second.changed());
        assert_eq!(second.unchanged, 2);
        assert_eq!(store, snapshot);
        assert_eq!(store[0].message, "one");
    }

    #[test]
    fn deep_sibling_files_are_tracked_separately() {
        let dir = format!(
            "/home/dev/work/acme/monorepo/{}shared/inputs",
            "packages/web/src/features/checkout/".repeat(4)
        );
        let mut store = Vec::new();
        let outcome = merge(
            &mut store,
            vec![
                defect(ProducerKind::StaticAnalysis, &format!("{}/CardNumberInput.tsx", dir), 12, "unused"),
                defect(ProducerKind::StaticAnalysis, &format!("{}/ExpiryDateInput.tsx", dir), 12, "unused"),
            ],
            &all_scope(),
            Utc::now(),
        );
        assert_eq!(outcome.added, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn absent_open_defects_are_inferred_fixed() {
        let mut store = Vec::new();
        let t0 = Utc::now();
        merge(
            &mut store,
            vec![
                defect(ProducerKind::TypeCheck, "a.ts", 1, "one"),
                defect(ProducerKind::StaticAnalysis, "b.js", 2, "lint"),
            ],
            &all_scope(),
            t0,
        );

        let only_types: BTreeSet<_> = [ProducerKind::TypeCheck].into_iter().collect();
        let outcome = merge(&mut store, Vec::new(), &only_types, t0);
        assert_eq!(outcome.resolved, 1);
        assert_eq!(store[0].status, DefectStatus::Fixed);
        assert_eq!(store[0].resolution, Some(Resolution::Inferred));
        // The linter did not run, so its defect stays open.
        assert_eq!(store[1].status, DefectStatus::Open);
    }

    #[test]
    fn fixed_defect_reported_again_reopens_as_regression() {
        let mut store = Vec::new();
        let t0 = Utc::now();
        let d = defect(ProducerKind::TypeCheck, "a.ts", 1, "one");
        merge(&mut store, vec![d.clone()], &all_scope(), t0);
        merge(&mut store, Vec::new(), &all_scope(), t0);
        assert_eq!(store[0].status, DefectStatus::Fixed);

        let outcome = merge(&mut store, vec![d], &all_scope(), t0);
        assert_eq!(outcome.reopened, 1);
        assert_eq!(store[0].status, DefectStatus::Open);
        assert_eq!(store[0].regressions, 1);
        assert!(store[0].resolution.is_none());
    }

    #[test]
    fn blocked_defects_stay_blocked_and_never_inferred() {
        let tmp = TempDir::new().unwrap();
        let mut store = DefectStore::load(&tmp.path().join("defects.json")).unwrap();
        let t0 = Utc::now();
        let d = defect(ProducerKind::TypeCheck, "a.ts", 1, "one");
        let id = d.id.clone();
        store.merge(vec![d], &all_scope(), t0);

        assert_eq!(store.record_failure(&id, "tests failed", 2, t0), Some(DefectStatus::Open));
        assert_eq!(
            store.record_failure(&id, "tests failed", 2, t0),
            Some(DefectStatus::Blocked)
        );

        let outcome = store.merge(
            vec![defect(ProducerKind::TypeCheck, "a.ts", 1, "reworded")],
            &all_scope(),
            t0,
        );
        assert_eq!(outcome.refreshed, 1);
        assert_eq!(store.get(&id).unwrap().status, DefectStatus::Blocked);
        assert_eq!(store.get(&id).unwrap().message, "reworded");

        store.merge(Vec::new(), &all_scope(), t0);
        assert_eq!(store.get(&id).unwrap().status, DefectStatus::Blocked);

        assert!(store.unblock(&id, t0));
        let d = store.get(&id).unwrap();
        assert_eq!(d.status, DefectStatus::Open);
        assert_eq!(d.attempts, 0);
        assert!(!store.unblock(&id, t0));
    }

    #[test]
    fn save_and_load_keep_records_and_stats() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".remedy/defects.json");
        let mut store = DefectStore::load(&path).unwrap();
        assert!(store.defects().is_empty());

        store.merge(
            vec![
                defect(ProducerKind::TypeCheck, "a.ts", 1, "one"),
                defect(ProducerKind::TestFailure, "t.py", 3, "boom"),
            ],
            &all_scope(),
            Utc::now(),
        );
        store.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["stats"]["total"], 2);
        assert_eq!(raw["stats"]["byType"]["test_failure"], 1);
        assert_eq!(raw["stats"]["bySeverity"]["high"], 2);
        assert!(raw.get("lastUpdated").is_some());

        let reloaded = DefectStore::load(&path).unwrap();
        assert_eq!(reloaded.defects(), store.defects());
        assert_eq!(reloaded.stats().open, 2);
    }
}
