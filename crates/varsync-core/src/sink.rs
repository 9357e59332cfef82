//! The Sink Adapter (§4.8): a buffered batch writer applied atomically
//! per-record against a destination, in one of two strategies.
//!
//! The datastore's wire protocol is out of scope (§1) — what's specified
//! here is the buffering contract and the DOCUMENT/FILE strategy semantics,
//! realized against an injectable [`SinkBackend`]. `DocumentSinkBackend` and
//! `FileSinkBackend` are reference implementations usable as-is for a
//! local/file-backed deployment, or as fixtures; a production MongoDB- or
//! S3-backed backend plugs into the same trait via the registry.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;
use varsync_types::{FlatMap, MutationKind, MutationMetadata, MutationRow, SinkStrategy, SyncError};

/// Outcome of one [`BufferedSink::flush`] call.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
    pub failures: Vec<(MutationRow, SyncError)>,
}

/// The pluggable half of a Sink: applying an already-ordered batch of rows,
/// and reading back a record's current state for `LIVE_STATE` / smart-repair
/// comparisons.
pub trait SinkBackend: Send + Sync {
    fn strategy(&self) -> SinkStrategy;

    /// Apply `rows` (pre-ordered per the buffer contract) to the
    /// destination. Each row may fail independently; failures must not
    /// abort remaining rows in the batch (unordered-mode bulk write, §4.8).
    fn apply_batch(&self, rows: &[MutationRow]) -> Vec<Result<(), SyncError>>;

    /// The record's field map minus internal bookkeeping fields (primary
    /// key, stored metadata blob), or the decoded blob JSON for FILE
    /// strategy.
    fn fetch(&self, metadata: &MutationMetadata) -> Result<FlatMap, SyncError>;
}

/// Lets a registry-resolved `Arc<dyn SinkBackend>` plug directly into
/// `BufferedSink<Arc<dyn SinkBackend>>` without a separate wrapper type.
impl<T: SinkBackend + ?Sized> SinkBackend for std::sync::Arc<T> {
    fn strategy(&self) -> SinkStrategy {
        (**self).strategy()
    }

    fn apply_batch(&self, rows: &[MutationRow]) -> Vec<Result<(), SyncError>> {
        (**self).apply_batch(rows)
    }

    fn fetch(&self, metadata: &MutationMetadata) -> Result<FlatMap, SyncError> {
        (**self).fetch(metadata)
    }
}

fn kind_rank(kind: MutationKind) -> u8 {
    match kind {
        MutationKind::Insert | MutationKind::Update | MutationKind::Unchanged => 0,
        MutationKind::Delete => 1,
    }
}

/// Order a batch per the buffer contract: grouped by `unique_key`, then by
/// kind within each group (inserts/updates before deletes, to avoid a
/// delete-then-insert race on the same key).
fn order_for_flush(mut rows: Vec<MutationRow>) -> Vec<MutationRow> {
    rows.sort_by(|a, b| {
        a.metadata
            .unique_key
            .cmp(&b.metadata.unique_key)
            .then(kind_rank(a.kind).cmp(&kind_rank(b.kind)))
    });
    rows
}

/// The in-memory buffering wrapper shared by both strategies. `write`
/// appends and flushes once the buffer reaches `buffer_size`; `flush`
/// forces a write of whatever has accumulated. `buffer_size == 0` flushes
/// on every write.
pub struct BufferedSink<B: SinkBackend> {
    backend: B,
    buffer_size: usize,
    buffer: Mutex<Vec<MutationRow>>,
}

impl<B: SinkBackend> BufferedSink<B> {
    pub fn new(backend: B, buffer_size: usize) -> Self {
        Self {
            backend,
            buffer_size,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn strategy(&self) -> SinkStrategy {
        self.backend.strategy()
    }

    pub fn fetch(&self, metadata: &MutationMetadata) -> Result<FlatMap, SyncError> {
        self.backend.fetch(metadata)
    }

    /// Append `row`; flushes automatically once the threshold is reached.
    pub fn write(&self, row: MutationRow) -> Result<Option<FlushReport>, SyncError> {
        let should_flush = {
            let mut buf = self.buffer.lock().expect("sink buffer mutex poisoned");
            buf.push(row);
            self.buffer_size == 0 || buf.len() >= self.buffer_size
        };
        if should_flush {
            Ok(Some(self.flush()))
        } else {
            Ok(None)
        }
    }

    /// Force a flush of whatever has accumulated, regardless of fill. The
    /// buffer is empty on return even if some rows failed.
    pub fn flush(&self) -> FlushReport {
        let pending = {
            let mut buf = self.buffer.lock().expect("sink buffer mutex poisoned");
            std::mem::take(&mut *buf)
        };
        if pending.is_empty() {
            return FlushReport::default();
        }

        let ordered = order_for_flush(pending);
        let results = self.backend.apply_batch(&ordered);

        let mut report = FlushReport::default();
        for (row, result) in ordered.into_iter().zip(results) {
            match result {
                Ok(()) => report.written += 1,
                Err(err) => {
                    report.failed += 1;
                    report.failures.push((row, err));
                }
            }
        }
        report
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.lock().expect("sink buffer mutex poisoned").len()
    }
}

/// Key a document record lives under: a fixed container, or one per
/// environment when `dynamic_container` routing is enabled.
fn document_container(metadata: &MutationMetadata, dynamic_container: bool) -> Result<String, SyncError> {
    if !dynamic_container {
        return Ok("_default".to_string());
    }
    // Open Question resolution (§9): when dynamic routing is configured
    // but no routing key is available, fail the row rather than fall back
    // to a default container.
    metadata
        .env
        .clone()
        .ok_or_else(|| SyncError::SinkPartial(format!("no env available to route unique_key {:?}", metadata.unique_key)))
}

/// Reference DOCUMENT strategy backend: one record per `unique_key`,
/// individual fields set/unset per row.
#[derive(Default)]
pub struct DocumentSinkBackend {
    pub dynamic_container: bool,
    containers: Mutex<HashMap<String, HashMap<String, FlatMap>>>,
}

impl DocumentSinkBackend {
    pub fn new(dynamic_container: bool) -> Self {
        Self {
            dynamic_container,
            containers: Mutex::new(HashMap::new()),
        }
    }
}

impl SinkBackend for DocumentSinkBackend {
    fn strategy(&self) -> SinkStrategy {
        SinkStrategy::Document
    }

    fn apply_batch(&self, rows: &[MutationRow]) -> Vec<Result<(), SyncError>> {
        let mut containers = self.containers.lock().expect("document sink mutex poisoned");
        rows.iter()
            .map(|row| {
                let container = document_container(&row.metadata, self.dynamic_container)?;
                let records = containers.entry(container).or_default();
                let record = records.entry(row.metadata.unique_key.clone()).or_default();
                match row.kind {
                    MutationKind::Insert | MutationKind::Update | MutationKind::Unchanged => {
                        record.insert(row.key.clone(), row.value.clone());
                    }
                    MutationKind::Delete => {
                        record.remove(&row.key);
                    }
                }
                Ok(())
            })
            .collect()
    }

    fn fetch(&self, metadata: &MutationMetadata) -> Result<FlatMap, SyncError> {
        let container = document_container(metadata, self.dynamic_container)?;
        let containers = self.containers.lock().expect("document sink mutex poisoned");
        Ok(containers
            .get(&container)
            .and_then(|records| records.get(&metadata.unique_key))
            .cloned()
            .unwrap_or_default())
    }
}

/// Reference FILE strategy backend: one JSON blob per `unique_key`, stored
/// as a file under `root`. Writes merge the per-key updates into the
/// existing blob, then atomically replace via write-to-temp-then-rename.
/// An empty merged result deletes the blob.
pub struct FileSinkBackend {
    root: PathBuf,
}

impl FileSinkBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, unique_key: &str) -> PathBuf {
        self.root.join(format!("{unique_key}.json"))
    }

    fn read_blob(&self, unique_key: &str) -> FlatMap {
        let path = self.blob_path(unique_key);
        let Ok(content) = fs::read_to_string(&path) else {
            return FlatMap::new();
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => FlatMap::new(),
        }
    }

    fn write_blob(&self, unique_key: &str, blob: &FlatMap) -> Result<(), SyncError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| SyncError::SinkTransient(format!("failed to create sink root: {e}")))?;
        let path = self.blob_path(unique_key);
        if blob.is_empty() {
            let _ = fs::remove_file(&path);
            return Ok(());
        }
        let tmp_path = self.root.join(format!("{unique_key}.json.tmp"));
        let content = serde_json::to_string(blob)
            .map_err(|e| SyncError::SinkTransient(format!("failed to serialize blob: {e}")))?;
        fs::write(&tmp_path, content)
            .map_err(|e| SyncError::SinkTransient(format!("failed to write temp blob: {e}")))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| SyncError::SinkTransient(format!("failed to replace blob: {e}")))?;
        Ok(())
    }
}

impl SinkBackend for FileSinkBackend {
    fn strategy(&self) -> SinkStrategy {
        SinkStrategy::File
    }

    fn apply_batch(&self, rows: &[MutationRow]) -> Vec<Result<(), SyncError>> {
        let mut results = Vec::with_capacity(rows.len());
        // Group rows per unique_key so one merged blob write covers all
        // the keys touched for that record in this batch.
        let mut by_key: Vec<(String, Vec<&MutationRow>)> = Vec::new();
        for row in rows {
            match by_key.iter_mut().find(|(k, _)| *k == row.metadata.unique_key) {
                Some((_, group)) => group.push(row),
                None => by_key.push((row.metadata.unique_key.clone(), vec![row])),
            }
        }

        let mut row_results: HashMap<String, Result<(), SyncError>> = HashMap::new();
        for (unique_key, group) in by_key {
            let mut blob = self.read_blob(&unique_key);
            for row in &group {
                match row.kind {
                    MutationKind::Insert | MutationKind::Update | MutationKind::Unchanged => {
                        blob.insert(row.key.clone(), row.value.clone());
                    }
                    MutationKind::Delete => {
                        blob.remove(&row.key);
                    }
                }
            }
            let outcome = self.write_blob(&unique_key, &blob);
            row_results.insert(unique_key, outcome.clone());
        }

        for row in rows {
            results.push(row_results.get(&row.metadata.unique_key).cloned().unwrap_or(Ok(())));
        }
        results
    }

    fn fetch(&self, metadata: &MutationMetadata) -> Result<FlatMap, SyncError> {
        Ok(self.read_blob(&metadata.unique_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use varsync_types::MutationMetadata;

    fn metadata(unique_key: &str, env: Option<&str>) -> MutationMetadata {
        MutationMetadata {
            unique_key: unique_key.to_string(),
            env: env.map(|s| s.to_string()),
            file_path: "config.json".to_string(),
            commit_hash: "abc123".to_string(),
        }
    }

    fn row(unique_key: &str, key: &str, value: Value, kind: MutationKind) -> MutationRow {
        MutationRow::new(key, value, kind, metadata(unique_key, Some("prod")))
    }

    #[test]
    fn write_below_threshold_does_not_flush() {
        let sink = BufferedSink::new(DocumentSinkBackend::new(false), 5);
        let report = sink.write(row("k1", "a", Value::from(1), MutationKind::Insert)).unwrap();
        assert!(report.is_none());
        assert_eq!(sink.buffered_len(), 1);
    }

    #[test]
    fn write_at_threshold_flushes() {
        let sink = BufferedSink::new(DocumentSinkBackend::new(false), 2);
        sink.write(row("k1", "a", Value::from(1), MutationKind::Insert)).unwrap();
        let report = sink
            .write(row("k1", "b", Value::from(2), MutationKind::Insert))
            .unwrap()
            .expect("flush triggered");
        assert_eq!(report.written, 2);
        assert_eq!(sink.buffered_len(), 0);
    }

    #[test]
    fn zero_buffer_size_flushes_every_write() {
        let sink = BufferedSink::new(DocumentSinkBackend::new(false), 0);
        let report = sink
            .write(row("k1", "a", Value::from(1), MutationKind::Insert))
            .unwrap()
            .expect("immediate flush");
        assert_eq!(report.written, 1);
    }

    #[test]
    fn flush_orders_inserts_and_updates_before_deletes_per_key() {
        let sink = BufferedSink::new(DocumentSinkBackend::new(false), 100);
        sink.write(row("k1", "a", Value::from(1), MutationKind::Delete)).unwrap();
        sink.write(row("k1", "b", Value::from(2), MutationKind::Insert)).unwrap();
        let report = sink.flush();
        assert_eq!(report.written, 2);
        // Fetching afterwards should reflect the insert surviving (delete
        // ran on a different key within the record, insert on another).
        let fetched = sink.fetch(&metadata("k1", Some("prod"))).unwrap();
        assert_eq!(fetched.get("b"), Some(&Value::from(2)));
    }

    #[test]
    fn buffer_is_empty_after_flush_even_with_partial_failure() {
        let sink = BufferedSink::new(DocumentSinkBackend::new(true), 100);
        // No env on this row while dynamic_container is on: should fail.
        let mut bad = row("k1", "a", Value::from(1), MutationKind::Insert);
        bad.metadata.env = None;
        sink.write(bad).unwrap();
        sink.write(row("k2", "b", Value::from(2), MutationKind::Insert)).unwrap();

        let report = sink.flush();
        assert_eq!(report.failed, 1);
        assert_eq!(report.written, 1);
        assert_eq!(sink.buffered_len(), 0);
    }

    #[test]
    fn document_dynamic_container_without_env_fails_the_row() {
        let backend = DocumentSinkBackend::new(true);
        let mut meta = metadata("k1", None);
        meta.env = None;
        let rows = vec![MutationRow::new("a", Value::from(1), MutationKind::Insert, meta)];
        let results = backend.apply_batch(&rows);
        assert!(matches!(results[0], Err(SyncError::SinkPartial(_))));
    }

    #[test]
    fn file_backend_merges_writes_and_deletes_empty_blob() {
        let dir = tempdir().unwrap();
        let backend = FileSinkBackend::new(dir.path());
        let sink = BufferedSink::new(backend, 0);

        sink.write(row("k1", "a", Value::from(1), MutationKind::Insert)).unwrap();
        let fetched = sink.fetch(&metadata("k1", None)).unwrap();
        assert_eq!(fetched.get("a"), Some(&Value::from(1)));

        sink.write(row("k1", "a", Value::from(1), MutationKind::Delete)).unwrap();
        let fetched = sink.fetch(&metadata("k1", None)).unwrap();
        assert!(fetched.is_empty());
        assert!(!dir.path().join("k1.json").exists());
    }
}
