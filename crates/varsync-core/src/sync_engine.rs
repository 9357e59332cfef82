//! The Sync Engine (§4.6): composes the Content Pipeline, State Comparator,
//! and Sync-mode Chooser to produce an ordered batch of [`MutationRow`]s for
//! one file.

use serde_json::Value;
use varsync_types::{FlatMap, MutationKind, MutationMetadata, MutationRow, Rule, SyncError, SyncMode};

use crate::comparator::{self, Comparison};
use crate::pipeline::{self, FlattenOptions};
use crate::sink::{BufferedSink, SinkBackend};
use crate::sync_mode::{self, CostInputs};

/// One file's before/after content and the metadata to stamp on every row
/// produced from it.
#[derive(Debug, Clone)]
pub struct FileBundle {
    pub current_bytes: Option<Vec<u8>>,
    pub previous_bytes: Option<Vec<u8>>,
    pub metadata: MutationMetadata,
}

/// Extra knobs threaded through from the bundle/datasource that aren't
/// part of `Rule` itself.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub root_key: String,
    pub separator: String,
    pub is_file_strategy: bool,
    pub sink_latency_ms: f64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            root_key: "varTrack".to_string(),
            separator: "/".to_string(),
            is_file_strategy: false,
            sink_latency_ms: sync_mode::ASSUMED_LATENCY_MS,
        }
    }
}

fn flatten_content(bytes: Option<&[u8]>, root_key: &str, separator: &str) -> FlatMap {
    let tree = pipeline::parse(bytes);
    let projected = pipeline::project(&tree, root_key, pipeline::DEFAULT_MAX_DEPTH).unwrap_or(tree);
    let opts = FlattenOptions {
        separator: separator.to_string(),
        as_kv: true,
        ..FlattenOptions::default()
    };
    match pipeline::flatten(&projected, &opts) {
        pipeline::FlattenOutput::Flat(pairs) => pairs.into_iter().collect(),
        pipeline::FlattenOutput::Tree(_) => FlatMap::new(),
    }
}

/// Merge a rule's `variables_map` (template substitution values, also
/// usable as static fields every row should carry) into a flattened
/// document.
fn merge_variables(mut flat: FlatMap, variables: &std::collections::BTreeMap<String, String>) -> FlatMap {
    for (key, value) in variables {
        flat.insert(key.clone(), Value::String(value.clone()));
    }
    flat
}

fn row(key: &str, value: Value, kind: MutationKind, metadata: &MutationMetadata) -> MutationRow {
    MutationRow::new(key, value, kind, metadata.clone())
}

/// Execute the Sync Engine for one file, returning a stable-ordered row
/// batch: all INSERTs, then UPDATEs, then DELETEs, each group sorted by key
/// ascending.
pub fn sync_file<B: SinkBackend>(
    bundle: &FileBundle,
    rule: &Rule,
    sink: &BufferedSink<B>,
    opts: &SyncOptions,
) -> Result<Vec<MutationRow>, SyncError> {
    let current_len = bundle.current_bytes.as_ref().map(|b| b.len()).unwrap_or(0) as u64;
    let mode = sync_mode::resolve(
        rule.sync_mode,
        &CostInputs {
            record_count: CostInputs::estimate_record_count(bundle.current_bytes.as_deref().unwrap_or_default()),
            content_bytes: current_len,
            sink_latency_ms: opts.sink_latency_ms,
            is_file_strategy: opts.is_file_strategy,
        },
    );

    let curr_flat = merge_variables(
        flatten_content(bundle.current_bytes.as_deref(), &opts.root_key, &opts.separator),
        &rule.variables_map,
    );

    let prev_flat = match mode {
        SyncMode::LiveState => sink.fetch(&bundle.metadata)?,
        _ => flatten_content(bundle.previous_bytes.as_deref(), &opts.root_key, &opts.separator),
    };

    let diff = comparator::compare(&curr_flat, &prev_flat);
    let mut rows = base_rows(&diff, &bundle.metadata);

    match mode {
        SyncMode::GitUpsertAll => {
            for (key, value) in &diff.unchanged {
                rows.push(row(key, value.clone(), MutationKind::Update, &bundle.metadata));
            }
        }
        SyncMode::GitSmartRepair => {
            let live = sink.fetch(&bundle.metadata)?;
            for (key, value) in &diff.unchanged {
                let stored = live.get(key);
                if stored.is_none() || stored != Some(value) {
                    rows.push(row(key, value.clone(), MutationKind::Update, &bundle.metadata));
                }
            }
        }
        SyncMode::LiveState | SyncMode::Auto => {}
    }

    Ok(stable_order(rows))
}

fn base_rows(diff: &Comparison, metadata: &MutationMetadata) -> Vec<MutationRow> {
    let mut rows = Vec::new();
    for (key, value) in &diff.added {
        rows.push(row(key, value.clone(), MutationKind::Insert, metadata));
    }
    for (key, value) in &diff.changed {
        rows.push(row(key, value.clone(), MutationKind::Update, metadata));
    }
    for (key, value) in &diff.deleted {
        rows.push(row(key, value.clone(), MutationKind::Delete, metadata));
    }
    rows
}

fn kind_order(kind: MutationKind) -> u8 {
    match kind {
        MutationKind::Insert => 0,
        MutationKind::Update | MutationKind::Unchanged => 1,
        MutationKind::Delete => 2,
    }
}

/// Sort into the contract order: all INSERTs, then UPDATEs, then DELETEs,
/// each group ascending by key.
fn stable_order(mut rows: Vec<MutationRow>) -> Vec<MutationRow> {
    rows.sort_by(|a, b| kind_order(a.kind).cmp(&kind_order(b.kind)).then(a.key.cmp(&b.key)));
    rows
}
