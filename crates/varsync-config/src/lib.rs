//! Configuration loading: the Bundle (JSON, §6) and the local operator
//! override file `.varsync.toml` (mirroring the teacher's `.shipper.toml`).
//!
//! The Bundle is the policy document — platforms, datasources, rules — and
//! is validated against its own invariants on load. `.varsync.toml` is
//! operational knob-turning: worker-pool sizing, the reconciler's poll
//! interval, HTTP bind address, default retry behavior. The two are
//! deliberately separate files with separate formats, following the
//! teacher's split between `shipper-types`-owned domain config and
//! `shipper-config`-owned process config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use varsync_duration::{deserialize_duration, serialize_duration};
use varsync_retry::RetryStrategyConfig;
use varsync_types::Bundle;

/// Default operator config file name.
pub const CONFIG_FILE: &str = ".varsync.toml";

/// The operator config file path for a directory.
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// HTTP ingress bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Worker pool sizing and per-task time limits (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub main_concurrency: usize,
    pub worker_concurrency: usize,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub soft_timeout: Duration,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub hard_timeout: Duration,
    /// Bounded pool size for concurrent Source fetches within one job.
    pub fetch_concurrency: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            main_concurrency: 10,
            worker_concurrency: 20,
            soft_timeout: Duration::from_secs(14 * 60),
            hard_timeout: Duration::from_secs(15 * 60),
            fetch_concurrency: 20,
        }
    }
}

/// Self-healing Reconciler scheduling knobs (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,
    pub max_consecutive_errors: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_consecutive_errors: varsync_types::DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

/// The operator-level configuration root, loaded from `.varsync.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Default retry behavior for Source/Sink adapters; adapters may
    /// override per error class.
    #[serde(default)]
    pub retry: RetryStrategyConfig,
    /// Path to the Bundle JSON file.
    pub bundle_path: PathBuf,
}

/// Load the operator config from `dir`, or defaults if `.varsync.toml` is
/// absent. `bundle_path` still defaults to an empty path in that case;
/// callers must check it before use.
pub fn load_operator_config(dir: &Path) -> Result<OperatorConfig> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(OperatorConfig::default());
    }
    load_operator_config_from_file(&path)
}

pub fn load_operator_config_from_file(path: &Path) -> Result<OperatorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read operator config: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse operator config: {}", path.display()))
}

/// Find `.varsync.toml` by walking up from `start_dir`.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        let candidate = current.join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        current = current.parent()?;
    }
}

/// Load and validate a Bundle from a JSON file.
pub fn load_bundle(path: &Path) -> Result<Bundle> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bundle file: {}", path.display()))?;
    let bundle: Bundle = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse bundle file: {}", path.display()))?;
    bundle
        .validate()
        .with_context(|| format!("bundle at {} failed validation", path.display()))?;
    Ok(bundle)
}
