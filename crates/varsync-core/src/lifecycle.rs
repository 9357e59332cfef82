//! The Commit Lifecycle Analyzer: folds an ordered commit list into one
//! `{earliest_status, latest_status}` pair per file, so a push or PR touching
//! the same path across several commits is treated as a single logical
//! change.
//!
//! Transient: the resulting map lives only inside one Sync Worker
//! invocation (see `orchestration`).

use std::collections::BTreeMap;

use varsync_types::rule::RuleMatch;
use varsync_types::{FileStatus, NormalizedCommit, Rule};

/// One file's fold result across the event's commits.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEntry {
    pub earliest_status: FileStatus,
    pub latest_status: FileStatus,
    pub match_context: RuleMatch,
}

/// Fold `commits` (any order) into a per-path lifecycle map, matching each
/// path against `rule` exactly once. Paths the rule doesn't match are
/// recorded as ignored and never appear in the output, even if a later
/// (older) commit touches the same path again.
pub fn analyze(commits: &[NormalizedCommit], rule: &Rule, branch: &str, repo_name: &str) -> BTreeMap<String, LifecycleEntry> {
    let mut sorted: Vec<&NormalizedCommit> = commits.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut entries: BTreeMap<String, LifecycleEntry> = BTreeMap::new();
    let mut ignored: BTreeMap<String, ()> = BTreeMap::new();

    for commit in sorted {
        for change in &commit.files {
            if ignored.contains_key(&change.path) {
                continue;
            }
            if let Some(entry) = entries.get_mut(&change.path) {
                entry.earliest_status = change.status;
                continue;
            }
            match rule.match_file(&change.path, branch, repo_name) {
                None => {
                    ignored.insert(change.path.clone(), ());
                }
                Some(match_context) => {
                    entries.insert(
                        change.path.clone(),
                        LifecycleEntry {
                            earliest_status: change.status,
                            latest_status: change.status,
                            match_context,
                        },
                    );
                }
            }
        }
    }

    entries
}

/// Whether a lifecycle entry is ephemeral within the event (added then
/// removed, or vice versa across the sort) and should be dropped entirely
/// rather than produce any write.
pub fn is_ephemeral(entry: &LifecycleEntry) -> bool {
    entry.latest_status == FileStatus::Removed && entry.earliest_status == FileStatus::Added
}
