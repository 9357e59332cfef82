//! Main Worker and Sync Worker orchestration (§5).
//!
//! Deliberately exposed as plain functions over `(headers, raw_body)` and
//! typed arguments rather than a web-framework handler: any router can
//! drive them without this crate depending on one.

use std::collections::BTreeMap;
use std::sync::Arc;

use varsync_registry::Registry;
use varsync_types::{
    Bundle, FileStatus, MutationMetadata, MutationRow, PrEvent, PushEvent, Rule, SyncError, SyncEvent, WebhookOutcome,
};
use varsync_webhook::{classify_event, verify_signature, WebhookEventKind};

use crate::lifecycle::{self, LifecycleEntry};
use crate::reporter::Reporter;
use crate::rule_engine;
use crate::sink::{BufferedSink, SinkBackend};
use crate::source::{self, FetchRequest, SourcePlatform};
use crate::sync_engine::{self, FileBundle, SyncOptions};

/// Headers relevant to authenticating and classifying an inbound webhook
/// request, already lower-cased by the caller's router.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub signature: Option<String>,
    pub event_kind: Option<String>,
}

/// One unit of work handed to a Sync Worker: a fully-identified event plus
/// the resolved rule and repository it applies to.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub event: SyncEvent,
    pub repository: String,
    pub platform: String,
    pub datasource: String,
}

/// The Main Worker flow (§5): authenticate, classify, parse, resolve the
/// owning rule, and hand back a job for dispatch — or a terminal
/// [`WebhookOutcome`] when there is nothing to dispatch.
///
/// `platform` and `datasource` name the `PlatformConfig`/`DatasourceConfig`
/// this webhook's route is bound to; multi-tenant routing by URL path or
/// provider host is the caller's concern.
pub fn handle_webhook(
    bundle: &Bundle,
    platform_name: &str,
    datasource_name: &str,
    platform_adapter: &Arc<dyn SourcePlatform>,
    webhook_secret: Option<&str>,
    headers: &WebhookHeaders,
    raw_body: &[u8],
    reporter: &mut dyn Reporter,
) -> Result<Result<SyncJob, WebhookOutcome>, SyncError> {
    if let Some(secret) = webhook_secret {
        if let Err(e) = verify_signature(secret, raw_body, headers.signature.as_deref()) {
            reporter.warn(&format!("webhook signature rejected: {e}"));
            return Err(SyncError::AuthFailed(e.to_string()));
        }
    }

    let kind = headers
        .event_kind
        .as_deref()
        .map(classify_event)
        .unwrap_or(WebhookEventKind::Unknown);

    let payload: serde_json::Value = serde_json::from_slice(raw_body)
        .map_err(|e| SyncError::ParseFailed(format!("webhook body is not valid JSON: {e}")))?;

    let event = match kind {
        WebhookEventKind::Push => SyncEvent::Push(platform_adapter.normalize_push(&payload)?),
        WebhookEventKind::PullRequest => SyncEvent::PullRequest(platform_adapter.normalize_pr(&payload)?),
        WebhookEventKind::Ignored => {
            return Ok(Err(WebhookOutcome::Ignored {
                reason: "provider ping event".to_string(),
            }))
        }
        WebhookEventKind::Unknown => {
            return Ok(Err(WebhookOutcome::Ignored {
                reason: "unrecognized event-type header".to_string(),
            }))
        }
    };

    let rule = rule_engine::select_rule(bundle, platform_name, datasource_name, event.repository())?;
    if !rule.repository_in_scope(event.repository()) {
        return Ok(Err(WebhookOutcome::Ignored {
            reason: format!("repository {:?} out of scope", event.repository()),
        }));
    }

    let repository = event.repository().to_string();
    Ok(Ok(SyncJob {
        event,
        repository,
        platform: platform_name.to_string(),
        datasource: datasource_name.to_string(),
    }))
}

/// One file's worth of work the Sync Worker has decided to process.
#[derive(Debug, Clone)]
struct PlannedFile {
    path: String,
    entry: LifecycleEntry,
}

/// Build the set of files a Sync Worker must fetch/sync for one job, per
/// §4.9 step 2: lifecycle-analyze the event's commits against the resolved
/// rule, dropping ephemeral (added-then-removed) files entirely.
fn plan_files(job: &SyncJob, rule: &Rule) -> Vec<PlannedFile> {
    lifecycle::analyze(job.event.commits(), rule, job.event.branch(), &job.repository)
        .into_iter()
        .filter(|(_, entry)| !lifecycle::is_ephemeral(entry))
        .map(|(path, entry)| PlannedFile { path, entry })
        .collect()
}

/// Resolve the `(current_commit, previous_commit)` pair for a PR or push
/// event, honoring §4.3's merge-base rule: a PR diffs against `base_sha`
/// (the real merge base), not the base branch's naive tip.
fn commit_endpoints(event: &SyncEvent) -> (&str, &str) {
    match event {
        SyncEvent::Push(p) => (&p.after_sha, &p.before_sha),
        SyncEvent::PullRequest(p) => (&p.head_sha, &p.base_sha),
    }
}

/// The Sync Worker flow (§5, §4.9): lifecycle-analyze the event, fetch
/// current/previous content for every non-ephemeral file, run the Sync
/// Engine per file, flush the sink, and process the prune list.
pub fn run_sync_job<B: SinkBackend>(
    job: &SyncJob,
    rule: &Rule,
    platform_adapter: &Arc<dyn SourcePlatform>,
    sink: &BufferedSink<B>,
    opts: &SyncOptions,
    concurrency: usize,
    reporter: &mut dyn Reporter,
) -> Result<Vec<MutationRow>, SyncError> {
    let planned = plan_files(job, rule);
    let (current_commit, previous_commit) = commit_endpoints(&job.event);

    let mut requests = Vec::new();
    let mut pairs = Vec::with_capacity(planned.len());
    for file in &planned {
        let (cur, prev) = source::commit_pair_for(
            file.entry.latest_status,
            file.entry.earliest_status,
            current_commit,
            previous_commit,
        );
        pairs.push((file, cur.clone(), prev.clone()));
        if let Some(c) = &cur {
            requests.push(FetchRequest {
                repository: job.repository.clone(),
                commit: c.clone(),
                path: file.path.clone(),
            });
        }
        if let Some(p) = &prev {
            requests.push(FetchRequest {
                repository: job.repository.clone(),
                commit: p.clone(),
                path: file.path.clone(),
            });
        }
    }

    let fetch_results = source::fetch_many(platform_adapter, &requests, concurrency);
    let mut by_commit: BTreeMap<(String, String), Vec<u8>> = BTreeMap::new();
    for (request, result) in requests.iter().zip(fetch_results) {
        match result {
            Ok(Some(bytes)) => {
                by_commit.insert((request.commit.clone(), request.path.clone()), bytes);
            }
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                reporter.warn(&format!("transient fetch failure for {}@{}: {e}", request.path, request.commit));
                return Err(e);
            }
            Err(e) => return Err(e),
        }
    }

    let mut all_rows = Vec::new();
    let mut prune_rows = Vec::new();

    for (file, cur, prev) in pairs {
        let metadata = MutationMetadata {
            unique_key: file.entry.match_context.unique_key.clone(),
            env: file.entry.match_context.env.clone(),
            file_path: file.path.clone(),
            commit_hash: current_commit.to_string(),
        };

        if file.entry.latest_status == FileStatus::Removed {
            if rule.prune {
                if rule.prune_last {
                    prune_rows.push(metadata);
                } else {
                    all_rows.extend(prune_file(&metadata, sink)?);
                }
            }
            continue;
        }

        let bundle = FileBundle {
            current_bytes: cur.and_then(|c| by_commit.get(&(c, file.path.clone())).cloned()),
            previous_bytes: prev.and_then(|p| by_commit.get(&(p, file.path.clone())).cloned()),
            metadata,
        };

        let rows = sync_engine::sync_file(&bundle, rule, sink, opts)?;
        all_rows.extend(rows);
    }

    let flush_report = sink.flush();
    if flush_report.failed > 0 {
        reporter.error(&format!("{} rows failed to flush", flush_report.failed));
    }

    for metadata in prune_rows {
        prune_file(&metadata, sink)?;
    }
    sink.flush();

    Ok(all_rows)
}

/// Emit and write a DELETE for every key a record currently holds, used
/// when a file's latest status is REMOVED and the rule permits pruning.
fn prune_file<B: SinkBackend>(metadata: &MutationMetadata, sink: &BufferedSink<B>) -> Result<Vec<MutationRow>, SyncError> {
    let live = sink.fetch(metadata)?;
    let rows: Vec<MutationRow> = live
        .into_iter()
        .map(|(key, value)| MutationRow::new(key, value, varsync_types::MutationKind::Delete, metadata.clone()))
        .collect();
    for row in rows.clone() {
        sink.write(row)?;
    }
    Ok(rows)
}

/// Resolve the webhook's owning `SourcePlatform` adapter from a registry,
/// for callers that keep one registry per process rather than threading a
/// single adapter through.
pub fn resolve_platform(registry: &Registry<dyn SourcePlatform>, kind: &str) -> Result<Arc<dyn SourcePlatform>, SyncError> {
    registry
        .require(kind)
        .map_err(|e| SyncError::ConfigInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;
    use crate::sink::DocumentSinkBackend;
    use chrono::{TimeZone, Utc};
    use varsync_types::{DatasourceConfig, FileChange, NormalizedCommit, PlatformConfig, SinkStrategy, SyncMode};

    struct FakePlatform {
        file_contents: BTreeMap<(String, String), Vec<u8>>,
    }

    impl SourcePlatform for FakePlatform {
        fn fetch(&self, _repo: &str, commit: &str, path: &str) -> crate::source::FetchResult {
            Ok(self.file_contents.get(&(commit.to_string(), path.to_string())).cloned())
        }

        fn normalize_push(&self, payload: &serde_json::Value) -> Result<PushEvent, SyncError> {
            serde_json::from_value(payload.clone()).map_err(|e| SyncError::ParseFailed(e.to_string()))
        }

        fn normalize_pr(&self, _payload: &serde_json::Value) -> Result<PrEvent, SyncError> {
            unimplemented!()
        }

        fn resolve_repositories(&self, _include: &[String], _exclude: &[String]) -> Result<Vec<String>, SyncError> {
            unimplemented!()
        }

        fn ensure_webhook(&self, _repo: &str, _url: &str, _events: &[String]) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn bundle() -> Bundle {
        Bundle {
            schema_registry: "schemas/v1".to_string(),
            platforms: vec![PlatformConfig {
                name: "github".to_string(),
                kind: "github".to_string(),
                credential_ref: "GITHUB_TOKEN".to_string(),
                api_base: None,
            }],
            datasources: vec![DatasourceConfig {
                name: "mongo-prod".to_string(),
                kind: "document".to_string(),
                strategy: SinkStrategy::Document,
                options: serde_json::json!({}),
                dynamic_container: false,
                buffer_size: 100,
            }],
            rules: vec![Rule::minimal("github", "mongo-prod")],
        }
    }

    #[test]
    fn scenario_1_webhook_to_sync_job_end_to_end() {
        let previous = br#"{"varTrack":{"a":1,"b":2}}"#.to_vec();
        let current = br#"{"varTrack":{"a":1,"b":3,"c":4}}"#.to_vec();

        let mut contents = BTreeMap::new();
        contents.insert(("new-sha".to_string(), "config.json".to_string()), current);
        contents.insert(("old-sha".to_string(), "config.json".to_string()), previous);
        let platform: Arc<dyn SourcePlatform> = Arc::new(FakePlatform { file_contents: contents });

        let commit = NormalizedCommit {
            hash: "new-sha".to_string(),
            files: vec![FileChange {
                path: "config.json".to_string(),
                status: FileStatus::Modified,
                previous_path: None,
            }],
            timestamp: Some(Utc.timestamp_opt(100, 0).unwrap()),
        };
        let push = PushEvent {
            repository: "acme/app".to_string(),
            branch: "refs/heads/prod".to_string(),
            before_sha: "old-sha".to_string(),
            after_sha: "new-sha".to_string(),
            commits: vec![commit],
        };
        let payload = serde_json::to_value(&push).unwrap();
        let body = serde_json::to_vec(&payload).unwrap();

        let mut reporter = RecordingReporter::default();
        let headers = WebhookHeaders {
            signature: None,
            event_kind: Some("push".to_string()),
        };

        let outcome = handle_webhook(&bundle(), "github", "mongo-prod", &platform, None, &headers, &body, &mut reporter)
            .unwrap()
            .expect("should dispatch a job");

        assert_eq!(outcome.repository, "acme/app");

        let mut rule = bundle().rules[0].clone();
        rule.sync_mode = SyncMode::GitSmartRepair;

        let sink = BufferedSink::new(DocumentSinkBackend::new(false), 100);
        let rows = run_sync_job(&outcome, &rule, &platform, &sink, &SyncOptions::default(), 20, &mut reporter).unwrap();

        let simplified: Vec<(String, varsync_types::MutationKind)> =
            rows.iter().map(|r| (r.key.clone(), r.kind)).collect();
        assert_eq!(
            simplified,
            vec![
                ("c".to_string(), varsync_types::MutationKind::Insert),
                ("b".to_string(), varsync_types::MutationKind::Update),
            ]
        );
    }

    #[test]
    fn handle_webhook_rejects_bad_signature() {
        let platform: Arc<dyn SourcePlatform> = Arc::new(FakePlatform {
            file_contents: BTreeMap::new(),
        });
        let mut reporter = RecordingReporter::default();
        let headers = WebhookHeaders {
            signature: Some("sha256=deadbeef".to_string()),
            event_kind: Some("push".to_string()),
        };
        let result = handle_webhook(&bundle(), "github", "mongo-prod", &platform, Some("secret"), &headers, b"{}", &mut reporter);
        assert!(result.is_err());
    }

    #[test]
    fn handle_webhook_ignores_ping() {
        let platform: Arc<dyn SourcePlatform> = Arc::new(FakePlatform {
            file_contents: BTreeMap::new(),
        });
        let mut reporter = RecordingReporter::default();
        let headers = WebhookHeaders {
            signature: None,
            event_kind: Some("ping".to_string()),
        };
        let outcome = handle_webhook(&bundle(), "github", "mongo-prod", &platform, None, &headers, b"{}", &mut reporter).unwrap();
        assert!(matches!(outcome, Err(WebhookOutcome::Ignored { .. })));
    }

    #[test]
    fn scenario_2_ephemeral_file_never_fetched_and_optionally_pruned() {
        // spec.md §8 scenario 2: add-then-remove within the same event
        // produces no INSERT/UPDATE/DELETE for that file's content keys;
        // the file itself never reaches the fetch stage.
        let platform: Arc<dyn SourcePlatform> = Arc::new(FakePlatform {
            file_contents: BTreeMap::new(),
        });
        let commits = vec![
            NormalizedCommit {
                hash: "c2".to_string(),
                files: vec![FileChange {
                    path: "config.json".to_string(),
                    status: FileStatus::Removed,
                    previous_path: None,
                }],
                timestamp: Some(Utc.timestamp_opt(200, 0).unwrap()),
            },
            NormalizedCommit {
                hash: "c1".to_string(),
                files: vec![FileChange {
                    path: "config.json".to_string(),
                    status: FileStatus::Added,
                    previous_path: None,
                }],
                timestamp: Some(Utc.timestamp_opt(100, 0).unwrap()),
            },
        ];
        let push = PushEvent {
            repository: "acme/app".to_string(),
            branch: "refs/heads/prod".to_string(),
            before_sha: "c0".to_string(),
            after_sha: "c2".to_string(),
            commits,
        };
        let job = SyncJob {
            event: SyncEvent::Push(push),
            repository: "acme/app".to_string(),
            platform: "github".to_string(),
            datasource: "mongo-prod".to_string(),
        };
        let rule = Rule::minimal("github", "mongo-prod");
        let sink = BufferedSink::new(DocumentSinkBackend::new(false), 100);
        let mut reporter = RecordingReporter::default();

        let rows = run_sync_job(&job, &rule, &platform, &sink, &SyncOptions::default(), 20, &mut reporter).unwrap();
        assert!(rows.is_empty());
    }
}
