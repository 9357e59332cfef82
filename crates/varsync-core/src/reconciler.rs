//! The Self-healing Reconciler (§4.10): periodically compares Git state
//! against store state per `(repository, branch)` and emits repair
//! mutations.
//!
//! The schedule *map* (which repositories/branches are due) is owned by
//! the caller (`orchestration`) and guarded by a `Mutex` there, per §5
//! ("protected by a mutex on add/remove/toggle; the loop reads a snapshot
//! of keys under the lock and runs executions outside it"). This module is
//! the pure-ish per-schedule comparison and the file-lock guard around one
//! run; it does not own the loop itself.

use chrono::Utc;
use varsync_types::{DriftItem, DriftKind, DriftReport, FlatMap, MutationKind, MutationMetadata, MutationRow, SyncError};

use crate::comparator;
use crate::sink::{BufferedSink, SinkBackend};

/// A predicate suppressing DELETE emission (and the EXTRA_IN_DB repair)
/// for keys it matches, even though Git no longer has them.
pub trait PruneProtection: Send + Sync {
    fn is_protected(&self, key: &str) -> bool;
}

/// Protects nothing; the default when a rule declares no prune-protection.
pub struct NoProtection;

impl PruneProtection for NoProtection {
    fn is_protected(&self, _key: &str) -> bool {
        false
    }
}

/// Compare Git state (`git_state`) against store state (`store_state`) and
/// classify every difference, applying `protection` to EXTRA_IN_DB items.
pub fn detect_drift(
    repository: &str,
    branch: &str,
    unique_key: &str,
    git_state: &FlatMap,
    store_state: &FlatMap,
    protection: &dyn PruneProtection,
) -> DriftReport {
    let diff = comparator::compare(git_state, store_state);

    let mut items: Vec<DriftItem> = Vec::new();
    for (key, value) in &diff.added {
        items.push(DriftItem {
            key: key.clone(),
            kind: DriftKind::MissingInDb,
            git_value: Some(value.clone()),
            store_value: None,
            protected: false,
        });
    }
    for (key, value) in &diff.changed {
        items.push(DriftItem {
            key: key.clone(),
            kind: DriftKind::ValueMismatch,
            git_value: Some(value.clone()),
            store_value: store_state.get(key).cloned(),
            protected: false,
        });
    }
    for (key, value) in &diff.deleted {
        items.push(DriftItem {
            key: key.clone(),
            kind: DriftKind::ExtraInDb,
            git_value: None,
            store_value: Some(value.clone()),
            protected: protection.is_protected(key),
        });
    }
    items.sort_by(|a, b| a.key.cmp(&b.key));

    DriftReport {
        repository: repository.to_string(),
        branch: branch.to_string(),
        unique_key: unique_key.to_string(),
        items,
        generated_at: Utc::now(),
    }
}

/// Translate a drift report into repair rows: MISSING→INSERT,
/// MISMATCH→UPDATE, EXTRA→DELETE. Protected EXTRA_IN_DB items are skipped.
pub fn repair_rows(report: &DriftReport, metadata_template: &MutationMetadata) -> Vec<MutationRow> {
    report
        .items
        .iter()
        .filter_map(|item| {
            if item.protected {
                return None;
            }
            let (kind, value) = match item.kind {
                DriftKind::MissingInDb => (MutationKind::Insert, item.git_value.clone()?),
                DriftKind::ValueMismatch => (MutationKind::Update, item.git_value.clone()?),
                DriftKind::ExtraInDb => (MutationKind::Delete, item.store_value.clone().unwrap_or(serde_json::Value::Null)),
            };
            Some(MutationRow::new(item.key.clone(), value, kind, metadata_template.clone()))
        })
        .collect()
}

/// Run one reconciliation pass: detect drift, and if `auto_fix` and not
/// `dry_run`, write the repair rows through `sink` and flush.
pub fn run_pass<B: SinkBackend>(
    repository: &str,
    branch: &str,
    git_state: &FlatMap,
    metadata_template: &MutationMetadata,
    sink: &BufferedSink<B>,
    protection: &dyn PruneProtection,
    auto_fix: bool,
    dry_run: bool,
) -> Result<DriftReport, SyncError> {
    let store_state = sink.fetch(metadata_template)?;
    let report = detect_drift(
        repository,
        branch,
        &metadata_template.unique_key,
        git_state,
        &store_state,
        protection,
    );

    if auto_fix && !dry_run {
        for row in repair_rows(&report, metadata_template) {
            sink.write(row)?;
        }
        sink.flush();
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DocumentSinkBackend;
    use serde_json::json;

    fn metadata() -> MutationMetadata {
        MutationMetadata {
            unique_key: "acme-app-prod".to_string(),
            env: Some("prod".to_string()),
            file_path: "config.json".to_string(),
            commit_hash: "sha".to_string(),
        }
    }

    struct Protect(Vec<String>);
    impl PruneProtection for Protect {
        fn is_protected(&self, key: &str) -> bool {
            self.0.iter().any(|k| k == key)
        }
    }

    #[test]
    fn scenario_6_reconciler_drift_report() {
        // spec.md §8 scenario 6.
        let git: FlatMap = [("a", json!(1)), ("b", json!(3)), ("c", json!(4))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let store: FlatMap = [("a", json!(1)), ("b", json!(2)), ("extra", json!(9))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let report = detect_drift("acme/app", "main", "acme-app-prod", &git, &store, &NoProtection);
        assert_eq!(report.missing_count(), 1);
        assert_eq!(report.mismatch_count(), 1);
        assert_eq!(report.extra_count(), 1);
    }

    #[test]
    fn protected_extra_is_reported_but_not_fixed() {
        let git: FlatMap = [("a", json!(1))].into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let store: FlatMap = [("a", json!(1)), ("extra", json!(9))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let report = detect_drift("acme/app", "main", "acme-app-prod", &git, &store, &Protect(vec!["extra".to_string()]));
        let extra_item = report.items.iter().find(|i| i.key == "extra").unwrap();
        assert!(extra_item.protected);

        let rows = repair_rows(&report, &metadata());
        assert!(rows.iter().all(|r| r.key != "extra"));
    }

    #[test]
    fn run_pass_applies_repairs_when_auto_fix_enabled() {
        let git: FlatMap = [("a", json!(1)), ("b", json!(3))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let sink = BufferedSink::new(DocumentSinkBackend::new(false), 100);
        sink.write(MutationRow::new("a", json!(1), MutationKind::Insert, metadata())).unwrap();
        sink.write(MutationRow::new("b", json!(2), MutationKind::Insert, metadata())).unwrap();
        sink.flush();

        let report = run_pass("acme/app", "main", &git, &metadata(), &sink, &NoProtection, true, false).unwrap();
        assert_eq!(report.mismatch_count(), 1);

        let fixed = sink.fetch(&metadata()).unwrap();
        assert_eq!(fixed.get("b"), Some(&json!(3)));
    }

    #[test]
    fn run_pass_in_dry_run_reports_without_writing() {
        let git: FlatMap = [("a", json!(1)), ("b", json!(3))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let sink = BufferedSink::new(DocumentSinkBackend::new(false), 100);
        sink.write(MutationRow::new("a", json!(1), MutationKind::Insert, metadata())).unwrap();
        sink.write(MutationRow::new("b", json!(2), MutationKind::Insert, metadata())).unwrap();
        sink.flush();

        run_pass("acme/app", "main", &git, &metadata(), &sink, &NoProtection, true, true).unwrap();

        let unchanged = sink.fetch(&metadata()).unwrap();
        assert_eq!(unchanged.get("b"), Some(&json!(2)));
    }
}
