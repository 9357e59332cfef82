use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use varsync_core::orchestration::{self, WebhookHeaders};
use varsync_core::reconciler::{self, NoProtection};
use varsync_core::reporter::{RecordingReporter, Reporter};
use varsync_core::sink::{BufferedSink, DocumentSinkBackend, FileSinkBackend, SinkBackend};
use varsync_core::source::SourcePlatform;
use varsync_core::sync_engine::SyncOptions;
use varsync_events::{EventLog, SyncEventKind, SyncJobEvent};
use varsync_types::{Bundle, FlatMap, PrEvent, PushEvent, SyncError};

#[derive(Parser, Debug)]
#[command(name = "varsync", version)]
#[command(about = "Validate bundles, replay webhooks locally, and run one-shot reconciliation")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate a Bundle configuration file.
    Validate {
        /// Path to the Bundle JSON file.
        #[arg(long)]
        bundle: PathBuf,
    },
    /// Feed a saved webhook payload through the ingress and Sync Worker
    /// path against an in-memory sink, for local testing.
    ReplayWebhook {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        platform: String,
        #[arg(long)]
        datasource: String,
        /// Value of the provider's event-type header (`push`, `pull_request`, ...).
        #[arg(long, default_value = "push")]
        event_kind: String,
        /// The webhook body: a normalized PushEvent or PrEvent as JSON.
        #[arg(long)]
        payload: PathBuf,
        /// Directory of `<commit>/<path>` fixture files used as file content.
        #[arg(long)]
        fixtures_dir: Option<PathBuf>,
        #[arg(long)]
        webhook_secret: Option<String>,
        #[arg(long)]
        signature_header: Option<String>,
    },
    /// Run one reconciler pass against a JSON snapshot of Git state and
    /// print the resulting drift report.
    ReconcileOnce {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        platform: String,
        #[arg(long)]
        datasource: String,
        #[arg(long)]
        repository: String,
        #[arg(long)]
        branch: String,
        #[arg(long)]
        unique_key: String,
        /// JSON object: the flattened Git-derived state to compare against the store.
        #[arg(long)]
        git_state: PathBuf,
        #[arg(long)]
        auto_fix: bool,
        #[arg(long)]
        dry_run: bool,
        /// Root directory for a FILE-strategy sink; omit for an in-memory DOCUMENT sink.
        #[arg(long)]
        sink_root: Option<PathBuf>,
        /// Directory holding the per-(repository, branch) lock file and the
        /// JSONL audit log; omit to skip both.
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

/// A non-networked `SourcePlatform` that reads file content from
/// `fixtures_dir/<commit>/<path>` and treats the payload file as an
/// already-normalized push/PR event, since parsing a specific provider's
/// raw webhook JSON is an adapter concern outside this crate (§1).
struct FixtureSourcePlatform {
    fixtures_dir: Option<PathBuf>,
}

impl SourcePlatform for FixtureSourcePlatform {
    fn fetch(&self, _repo: &str, commit: &str, path: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let Some(dir) = &self.fixtures_dir else {
            return Ok(None);
        };
        match std::fs::read(dir.join(commit).join(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::SourceTransient(e.to_string())),
        }
    }

    fn normalize_push(&self, payload: &serde_json::Value) -> Result<PushEvent, SyncError> {
        serde_json::from_value(payload.clone()).map_err(|e| SyncError::ParseFailed(e.to_string()))
    }

    fn normalize_pr(&self, payload: &serde_json::Value) -> Result<PrEvent, SyncError> {
        serde_json::from_value(payload.clone()).map_err(|e| SyncError::ParseFailed(e.to_string()))
    }

    fn resolve_repositories(&self, include: &[String], _exclude: &[String]) -> Result<Vec<String>, SyncError> {
        Ok(include.to_vec())
    }

    fn ensure_webhook(&self, _repo: &str, _url: &str, _events: &[String]) -> Result<(), SyncError> {
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Validate { bundle } => run_validate(&bundle),
        Commands::ReplayWebhook {
            bundle,
            platform,
            datasource,
            event_kind,
            payload,
            fixtures_dir,
            webhook_secret,
            signature_header,
        } => run_replay_webhook(
            &bundle,
            &platform,
            &datasource,
            &event_kind,
            &payload,
            fixtures_dir,
            webhook_secret.as_deref(),
            signature_header.as_deref(),
        ),
        Commands::ReconcileOnce {
            bundle,
            platform,
            datasource,
            repository,
            branch,
            unique_key,
            git_state,
            auto_fix,
            dry_run,
            sink_root,
            state_dir,
        } => run_reconcile_once(
            &bundle, &platform, &datasource, &repository, &branch, &unique_key, &git_state, auto_fix, dry_run, sink_root,
            state_dir,
        ),
    }
}

fn load_bundle(path: &PathBuf) -> Result<Bundle> {
    varsync_config::load_bundle(path)
}

fn run_validate(bundle_path: &PathBuf) -> Result<()> {
    let bundle = load_bundle(bundle_path)?;
    println!("bundle valid: {} rule(s), {} platform(s), {} datasource(s)", bundle.rules.len(), bundle.platforms.len(), bundle.datasources.len());
    Ok(())
}

fn build_sink_for_datasource(bundle: &Bundle, datasource: &str, sink_root: Option<PathBuf>) -> Result<Arc<dyn SinkBackend>> {
    let ds = bundle
        .datasource(datasource)
        .with_context(|| format!("datasource {datasource:?} not found in bundle"))?;
    Ok(match sink_root {
        Some(root) => Arc::new(FileSinkBackend::new(root)),
        None => Arc::new(DocumentSinkBackend::new(ds.dynamic_container)),
    })
}

#[allow(clippy::too_many_arguments)]
fn run_replay_webhook(
    bundle_path: &PathBuf,
    platform: &str,
    datasource: &str,
    event_kind: &str,
    payload_path: &PathBuf,
    fixtures_dir: Option<PathBuf>,
    webhook_secret: Option<&str>,
    signature_header: Option<&str>,
) -> Result<()> {
    let bundle = load_bundle(bundle_path)?;
    let datasource_cfg = bundle
        .datasource(datasource)
        .with_context(|| format!("datasource {datasource:?} not found in bundle"))?;
    let raw_body = std::fs::read(payload_path).with_context(|| format!("failed to read payload file: {}", payload_path.display()))?;

    let source_platform: Arc<dyn SourcePlatform> = Arc::new(FixtureSourcePlatform { fixtures_dir });
    let headers = WebhookHeaders {
        signature: signature_header.map(str::to_string),
        event_kind: Some(event_kind.to_string()),
    };

    let mut reporter = RecordingReporter::new();
    let job = match orchestration::handle_webhook(
        &bundle,
        platform,
        datasource,
        &source_platform,
        webhook_secret,
        &headers,
        &raw_body,
        &mut reporter,
    )? {
        Ok(job) => job,
        Err(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            return Ok(());
        }
    };

    let rule = bundle
        .rules_for(platform, datasource)
        .into_iter()
        .find(|r| r.repository_in_scope(&job.repository))
        .with_context(|| "no rule in scope for the replayed event's repository")?
        .resolve(&job.repository)?;

    let backend = build_sink_for_datasource(&bundle, datasource, None)?;
    let sink = BufferedSink::new(backend, datasource_cfg.buffer_size);
    let opts = SyncOptions::default();

    let rows = orchestration::run_sync_job(&job, &rule, &source_platform, &sink, &opts, 20, &mut reporter)?;

    for line in reporter.lines() {
        eprintln!("{line}");
    }
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
#[allow(clippy::too_many_arguments)]
fn run_reconcile_once(
    bundle_path: &PathBuf,
    platform: &str,
    datasource: &str,
    repository: &str,
    branch: &str,
    unique_key: &str,
    git_state_path: &PathBuf,
    auto_fix: bool,
    dry_run: bool,
    sink_root: Option<PathBuf>,
    state_dir: Option<PathBuf>,
) -> Result<()> {
    let bundle = load_bundle(bundle_path)?;
    // Re-validate the (platform, datasource) pair is declared, even though
    // the sink/rule lookups below don't strictly need the binding.
    let _ = bundle
        .rules_for(platform, datasource)
        .into_iter()
        .next()
        .with_context(|| format!("no rule bound to platform {platform:?} / datasource {datasource:?}"))?;

    // Guard against a scheduled reconciler pass racing this manual one
    // against the same (repository, branch), per the lock crate's contract.
    let _lock_guard = match &state_dir {
        Some(dir) => {
            let path = varsync_lock::lock_path(dir, repository, branch);
            Some(varsync_lock::acquire(&path, chrono::Duration::minutes(5)).with_context(|| {
                format!("could not acquire reconcile lock for {repository}@{branch}")
            })?)
        }
        None => None,
    };

    let content = std::fs::read_to_string(git_state_path)
        .with_context(|| format!("failed to read git-state file: {}", git_state_path.display()))?;
    let git_state: FlatMap = serde_json::from_str(&content).context("git-state file must be a flat JSON object")?;

    let backend = build_sink_for_datasource(&bundle, datasource, sink_root)?;
    let sink = BufferedSink::new(backend, 100);

    let metadata = varsync_types::MutationMetadata {
        unique_key: unique_key.to_string(),
        env: None,
        file_path: String::new(),
        commit_hash: String::new(),
    };

    let report = reconciler::run_pass(repository, branch, &git_state, &metadata, &sink, &NoProtection, auto_fix, dry_run)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    eprintln!(
        "missing={} mismatch={} extra={}",
        report.missing_count(),
        report.mismatch_count(),
        report.extra_count()
    );

    if let Some(dir) = &state_dir {
        let mut log = EventLog::new();
        log.record(SyncJobEvent {
            timestamp: Utc::now(),
            job_id: format!("reconcile-{repository}-{branch}"),
            repository: repository.to_string(),
            event_type: SyncEventKind::DriftDetected {
                unique_key: unique_key.to_string(),
                missing: report.missing_count(),
                extra: report.extra_count(),
                mismatch: report.mismatch_count(),
            },
        });
        log.write_to_file(&varsync_events::events_path(dir))
            .context("failed to append reconciliation event")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_reporter_methods_are_callable() {
        let mut rep = CliReporter;
        rep.info("info");
        rep.warn("warn");
        rep.error("error");
    }

    #[test]
    fn fixture_source_returns_none_when_no_fixtures_dir_configured() {
        let platform = FixtureSourcePlatform { fixtures_dir: None };
        let result = platform.fetch("acme/app", "sha", "config.json").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn fixture_source_reads_content_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sha")).unwrap();
        std::fs::write(dir.path().join("sha").join("config.json"), b"hello").unwrap();

        let platform = FixtureSourcePlatform {
            fixtures_dir: Some(dir.path().to_path_buf()),
        };
        let result = platform.fetch("acme/app", "sha", "config.json").unwrap();
        assert_eq!(result, Some(b"hello".to_vec()));
    }
}
