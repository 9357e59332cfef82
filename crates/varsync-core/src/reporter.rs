//! The logging injection point used by every component above the
//! pure-function layer (Content Pipeline and State Comparator stay pure and
//! never log). Mirrors the teacher crate's `Reporter` trait in
//! `engine_parallel.rs`: leveled, bracket-tagged lines, no tracing
//! subscriber, because nothing else in this workspace uses one.

use std::sync::{Arc, Mutex};

/// Something that can receive `info`/`warn`/`error` lines. Implementations
/// must be `Send` so a single reporter can be shared across the worker-pool
/// threads in `source` and `orchestration`.
pub trait Reporter: Send {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Default reporter: bracket-tagged lines to stderr.
#[derive(Debug, Default)]
pub struct StderrReporter;

impl Reporter for StderrReporter {
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

/// Accumulates lines in memory instead of writing them; used by tests and
/// by `varsync-cli`'s `replay-webhook` to show what happened.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    pub lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("recording reporter mutex poisoned").clone()
    }
}

impl Reporter for RecordingReporter {
    fn info(&mut self, msg: &str) {
        self.lines.lock().expect("recording reporter mutex poisoned").push(format!("[info] {msg}"));
    }

    fn warn(&mut self, msg: &str) {
        self.lines.lock().expect("recording reporter mutex poisoned").push(format!("[warn] {msg}"));
    }

    fn error(&mut self, msg: &str) {
        self.lines.lock().expect("recording reporter mutex poisoned").push(format!("[error] {msg}"));
    }
}

/// Adapter letting worker-pool threads share one `Arc<Mutex<dyn Reporter>>`
/// through the `Reporter` trait without each thread holding its own lock
/// across the whole call.
pub struct SharedReporter(pub Arc<Mutex<dyn Reporter>>);

impl SharedReporter {
    pub fn info(&self, msg: &str) {
        self.0.lock().expect("shared reporter mutex poisoned").info(msg);
    }

    pub fn warn(&self, msg: &str) {
        self.0.lock().expect("shared reporter mutex poisoned").warn(msg);
    }

    pub fn error(&self, msg: &str) {
        self.0.lock().expect("shared reporter mutex poisoned").error(msg);
    }
}

impl Clone for SharedReporter {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}
