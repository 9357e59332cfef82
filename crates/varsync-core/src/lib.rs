//! # varsync-core
//!
//! The synchronization engine: turns a Git provider's webhook payloads into
//! an ordered batch of field-level writes against a destination datastore,
//! and keeps the two in line afterward.
//!
//! ## Pipeline
//!
//! The core flow is **ingress → lifecycle → sync → flush**:
//!
//! 1. [`orchestration::handle_webhook`] authenticates the request, classifies
//!    and normalizes the payload via a [`source::SourcePlatform`], and
//!    resolves the owning [`varsync_types::Rule`].
//! 2. [`lifecycle::analyze`] folds an event's commits into one
//!    `{earliest_status, latest_status}` entry per changed path.
//! 3. [`orchestration::run_sync_job`] fetches current/previous file content
//!    through [`source::fetch_many`], and [`sync_engine::sync_file`] runs
//!    the [`pipeline`] → [`comparator`] → [`sync_mode`] pipeline per file.
//! 4. A [`sink::BufferedSink`] buffers and flushes the resulting
//!    [`varsync_types::MutationRow`]s.
//!
//! [`reconciler`] runs the same comparison independently of any webhook, on
//! a schedule, to repair drift a missed or failed sync left behind.
//!
//! Every module above the adapter traits (`source::SourcePlatform`,
//! `sink::SinkBackend`) is pure or nearly so; the adapters are where actual
//! I/O against a Git provider or a datastore happens, and the only pieces a
//! production deployment needs to supply beyond what's in this crate.

pub mod comparator;
pub mod lifecycle;
pub mod orchestration;
pub mod pipeline;
pub mod reconciler;
pub mod reporter;
pub mod rule_engine;
pub mod sink;
pub mod source;
pub mod sync_engine;
pub mod sync_mode;

pub use varsync_types::SyncError;
