//! Core domain types shared by every varsync crate: the Bundle configuration
//! model, the Rule policy object, commit/push/PR events, the typed
//! [`MutationRow`], and the [`SyncError`] vocabulary.
//!
//! This crate is intentionally free of I/O. Validation and override
//! resolution are pure functions over these types; the adapters that talk to
//! a Git provider or a datastore live in `varsync-core`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use varsync_duration::{deserialize_duration, serialize_duration};

pub mod rule;

pub use rule::{Rule, RuleOverride, RuleOverrideSet};

/// The chosen comparison strategy for one file's sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMode {
    /// Upsert every current key, including ones that did not change.
    GitUpsertAll,
    /// Upsert current keys plus any unchanged keys the store has drifted on.
    GitSmartRepair,
    /// Diff Git content against a live read of the destination record.
    LiveState,
    /// Let the [`SyncMode`] chooser pick based on a cost model.
    Auto,
}

/// Storage strategy for a [`DatasourceConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkStrategy {
    /// One record per unique key, individual fields per flat config key.
    Document,
    /// One JSON blob per unique key in a content-addressed file store.
    File,
}

/// Kind of a single key-level mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
    Unchanged,
}

/// Metadata carried alongside every [`MutationRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationMetadata {
    pub unique_key: String,
    pub env: Option<String>,
    pub file_path: String,
    pub commit_hash: String,
}

/// A single typed mutation destined for a Sink.
///
/// Created by the Sync Engine, owned by the Sink's in-memory buffer,
/// destroyed after a successful flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRow {
    pub key: String,
    pub value: Value,
    pub kind: MutationKind,
    pub metadata: MutationMetadata,
}

impl MutationRow {
    pub fn new(key: impl Into<String>, value: Value, kind: MutationKind, metadata: MutationMetadata) -> Self {
        Self {
            key: key.into(),
            value,
            kind,
            metadata,
        }
    }
}

/// Status of a file within one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

/// One file's change within a [`NormalizedCommit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub status: FileStatus,
    /// Present only when `status == Renamed`; the path before the rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
}

/// A single commit normalized from a provider payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCommit {
    pub hash: String,
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A normalized push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repository: String,
    pub branch: String,
    pub before_sha: String,
    pub after_sha: String,
    pub commits: Vec<NormalizedCommit>,
}

/// Action that triggered a PR event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrAction {
    Opened,
    Synchronize,
    Closed,
    Merged,
    ReviewRequested,
    Reopened,
}

/// A normalized pull-request event. `base_sha` is the real merge base of
/// `(target_branch_sha, head_sha)`, not the base branch's naive tip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrEvent {
    pub id: String,
    pub action: PrAction,
    pub repository: String,
    pub base_branch: String,
    pub head_branch: String,
    /// Merge base of `(target_branch_sha, head_sha)`. Mandatory.
    pub base_sha: String,
    /// The base branch tip at the time of enrichment. Preserved for audit,
    /// never used as the diff baseline.
    pub target_branch_sha: String,
    pub head_sha: String,
    pub is_approved: bool,
    pub commits: Vec<NormalizedCommit>,
}

/// Tagged union of the two event shapes the Main/Sync Worker operate on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SyncEvent {
    Push(PushEvent),
    PullRequest(PrEvent),
}

impl SyncEvent {
    pub fn repository(&self) -> &str {
        match self {
            SyncEvent::Push(p) => &p.repository,
            SyncEvent::PullRequest(p) => &p.repository,
        }
    }

    pub fn branch(&self) -> &str {
        match self {
            SyncEvent::Push(p) => &p.branch,
            SyncEvent::PullRequest(p) => &p.head_branch,
        }
    }

    pub fn commits(&self) -> &[NormalizedCommit] {
        match self {
            SyncEvent::Push(p) => &p.commits,
            SyncEvent::PullRequest(p) => &p.commits,
        }
    }
}

/// Identity plus credential reference for a Git provider. Credentials are
/// held by name only; the actual secret lookup is an adapter concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    pub kind: String,
    /// Name of the credential to resolve from the process environment or a
    /// secret manager. Never the secret value itself.
    pub credential_ref: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Identity plus connection options for a destination datastore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub name: String,
    pub kind: String,
    pub strategy: SinkStrategy,
    /// Arbitrary adapter-specific connection options (host, database name, ...).
    #[serde(default)]
    pub options: Value,
    /// When true, route writes to a per-environment container named by
    /// `metadata.env` instead of one static container.
    #[serde(default)]
    pub dynamic_container: bool,
    /// Number of rows buffered before an automatic flush.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    100
}

/// The load-once, read-only configuration root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub schema_registry: String,
    pub platforms: Vec<PlatformConfig>,
    pub datasources: Vec<DatasourceConfig>,
    pub rules: Vec<Rule>,
}

impl Bundle {
    /// Validate the Bundle's internal references: every rule's `platform`
    /// and `datasource` must name a declared entry, and `schema_registry`
    /// must be non-empty (validation of its *contents* is out of scope).
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.schema_registry.trim().is_empty() {
            return Err(SyncError::ConfigInvalid(
                "schema_registry must not be empty".into(),
            ));
        }
        for rule in &self.rules {
            if !self.platforms.iter().any(|p| p.name == rule.platform) {
                return Err(SyncError::ConfigInvalid(format!(
                    "rule references unknown platform {:?}",
                    rule.platform
                )));
            }
            if !self.datasources.iter().any(|d| d.name == rule.datasource) {
                return Err(SyncError::ConfigInvalid(format!(
                    "rule references unknown datasource {:?}",
                    rule.datasource
                )));
            }
            rule.validate()?;
        }
        Ok(())
    }

    /// All rules bound to the given `(platform, datasource)` pair. A pair
    /// may have more than one rule scoping disjoint repository sets.
    pub fn rules_for(&self, platform: &str, datasource: &str) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| r.platform == platform && r.datasource == datasource)
            .collect()
    }

    pub fn platform(&self, name: &str) -> Option<&PlatformConfig> {
        self.platforms.iter().find(|p| p.name == name)
    }

    pub fn datasource(&self, name: &str) -> Option<&DatasourceConfig> {
        self.datasources.iter().find(|d| d.name == name)
    }
}

/// Classification of a key's drift between Git and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftKind {
    MissingInDb,
    ExtraInDb,
    ValueMismatch,
}

/// A single key whose stored value disagrees with Git.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftItem {
    pub key: String,
    pub kind: DriftKind,
    pub git_value: Option<Value>,
    pub store_value: Option<Value>,
    /// True when a prune-protection predicate matched and this item was
    /// reported but not fixed.
    #[serde(default)]
    pub protected: bool,
}

/// The outcome of one reconciler pass over one `(repository, branch)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub repository: String,
    pub branch: String,
    pub unique_key: String,
    pub items: Vec<DriftItem>,
    pub generated_at: DateTime<Utc>,
}

impl DriftReport {
    pub fn missing_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.kind == DriftKind::MissingInDb)
            .count()
    }

    pub fn extra_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.kind == DriftKind::ExtraInDb)
            .count()
    }

    pub fn mismatch_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.kind == DriftKind::ValueMismatch)
            .count()
    }
}

/// A scheduled, periodic reconciliation target. Owned by the Self-healing
/// supervisor; auto-disables after `max_consecutive_errors` failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSchedule {
    pub repository: String,
    pub branch: String,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_report: Option<DriftReport>,
    #[serde(default)]
    pub consecutive_errors: u32,
    pub auto_fix: bool,
    pub dry_run: bool,
}

/// Default threshold for auto-disabling a schedule after consecutive
/// reconciler failures.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

impl ReconciliationSchedule {
    pub fn new(repository: impl Into<String>, branch: impl Into<String>, interval: Duration) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            interval,
            enabled: true,
            last_run: None,
            last_report: None,
            consecutive_errors: 0,
            auto_fix: false,
            dry_run: true,
        }
    }

    /// Whether, given `now`, this schedule is due to run.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_run {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed
                    >= chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::zero())
            }
        }
    }

    /// Record a successful run: resets the failure counter.
    pub fn record_success(&mut self, now: DateTime<Utc>, report: DriftReport) {
        self.last_run = Some(now);
        self.last_report = Some(report);
        self.consecutive_errors = 0;
    }

    /// Record a failed run. Auto-disables once `max_consecutive_errors` is
    /// reached.
    pub fn record_failure(&mut self, now: DateTime<Utc>, max_consecutive_errors: u32) {
        self.last_run = Some(now);
        self.consecutive_errors += 1;
        if self.consecutive_errors >= max_consecutive_errors {
            self.enabled = false;
        }
    }
}

/// The error vocabulary of the synchronization pipeline.
///
/// These are logical categories (§7), not a 1:1 map of every possible
/// failure; adapters classify their own errors into one of these so the
/// Sync Worker and retry layer can make uniform decisions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("source provider transient error: {0}")]
    SourceTransient(String),

    #[error("source content missing")]
    SourceMissing,

    #[error("content could not be parsed: {0}")]
    ParseFailed(String),

    #[error("sink transient error: {0}")]
    SinkTransient(String),

    #[error("sink reported partial failure: {0}")]
    SinkPartial(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl SyncError {
    /// Whether an adapter should retry this error with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::SourceTransient(_) | SyncError::SinkTransient(_)
        )
    }

    /// Whether the Sync Worker should treat this as "no content" rather
    /// than failing the file outright.
    pub fn is_empty_content(&self) -> bool {
        matches!(self, SyncError::SourceMissing | SyncError::ParseFailed(_))
    }
}

/// Structured outcome of the Main Worker's handling of one webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Ignored { reason: String },
    Processing { task_id: String },
    Error { reason: String },
}

/// Simple key/value map used for both document fields and file-blob
/// contents. `BTreeMap` keeps iteration order deterministic for tests.
pub type FlatMap = BTreeMap<String, Value>;
