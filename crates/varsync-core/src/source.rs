//! The Source Adapter (§4.7): fetches file contents from a Git provider,
//! normalizes push/PR payloads, resolves repository-name patterns, and
//! manages webhook registrations.
//!
//! `fetch` is safe to call concurrently; `fetch_many` fans a batch out
//! across a bounded worker pool. The pool itself is grounded in the
//! teacher crate's `engine_parallel.rs`: plain `std::thread::spawn`,
//! chunked by the concurrency bound, joining each chunk before starting
//! the next — not a semaphore or an async runtime, matching how the
//! teacher already solves bounded fan-out elsewhere in this workspace.

use std::sync::Arc;

use varsync_types::{NormalizedCommit, PrEvent, PushEvent, SyncError};

/// Default bound on concurrent `Source.fetch` calls within one Sync Worker
/// job (§4.7, §4.9).
pub const DEFAULT_FETCH_CONCURRENCY: usize = 20;

/// A single file-content fetch request: the commit to read at, and the
/// path.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub repository: String,
    pub commit: String,
    pub path: String,
}

/// The result of one fetch: `None` means the file did not exist at that
/// commit (treated as empty content, not an error).
pub type FetchResult = Result<Option<Vec<u8>>, SyncError>;

/// The Git-provider interface (§4.7). Implementations talk to a specific
/// provider's API; the provider SDK itself is out of scope (§1) — this
/// trait is the contract.
pub trait SourcePlatform: Send + Sync {
    /// Fetch file content at `(repo, commit, path)`. Implementations must
    /// apply the two-step large-file fallback internally (primary content
    /// API, then tree+blob lookup on size-exceeded) and return `Ok(None)`
    /// for binary files or absent paths.
    fn fetch(&self, repo: &str, commit: &str, path: &str) -> FetchResult;

    /// Pure: parses a provider push payload. No network call.
    fn normalize_push(&self, payload: &serde_json::Value) -> Result<PushEvent, SyncError>;

    /// Impure: requires at least one API call to resolve the real merge
    /// base and enumerate the PR's file set.
    fn normalize_pr(&self, payload: &serde_json::Value) -> Result<PrEvent, SyncError>;

    /// Resolve `include`/`exclude` repository-name patterns into concrete
    /// repository names. Literal names are verified to exist; glob
    /// patterns (`*`, `?`) require listing the provider's visible repos.
    /// Exclusions apply last.
    fn resolve_repositories(&self, include: &[String], exclude: &[String]) -> Result<Vec<String>, SyncError>;

    /// Idempotently ensure a webhook exists for `(repo, url, events)`:
    /// update if one already targets `url`, else create. Must never
    /// create a duplicate.
    fn ensure_webhook(&self, repo: &str, url: &str, events: &[String]) -> Result<(), SyncError>;
}

/// Fan `requests` out across a bounded worker pool, chunked by
/// `concurrency`: each chunk's fetches run on their own thread and are
/// joined before the next chunk starts, so at most `concurrency` fetches
/// are ever in flight. Results are returned in the same order as
/// `requests`.
pub fn fetch_many(
    platform: &Arc<dyn SourcePlatform>,
    requests: &[FetchRequest],
    concurrency: usize,
) -> Vec<FetchResult> {
    let bound = concurrency.max(1);
    let mut results: Vec<Option<FetchResult>> = (0..requests.len()).map(|_| None).collect();

    let mut offset = 0;
    for chunk in requests.chunks(bound) {
        let mut handles = Vec::with_capacity(chunk.len());
        for request in chunk {
            let platform = Arc::clone(platform);
            let request = request.clone();
            handles.push(std::thread::spawn(move || {
                platform.fetch(&request.repository, &request.commit, &request.path)
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(SyncError::Fatal("fetch worker thread panicked".to_string())));
            results[offset + i] = Some(result);
        }
        offset += chunk.len();
    }

    results.into_iter().map(|r| r.expect("every request gets a result")).collect()
}

/// Derive the `(current_commit, previous_commit)` pair to fetch for one
/// lifecycle entry, honoring the earliest/latest rule from §4.3: an ADDED
/// earliest status means there is no "previous" content to fetch.
pub fn commit_pair_for(
    latest_status: varsync_types::FileStatus,
    earliest_status: varsync_types::FileStatus,
    current_commit: &str,
    previous_commit: &str,
) -> (Option<String>, Option<String>) {
    use varsync_types::FileStatus::*;

    let current = if latest_status == Removed {
        None
    } else {
        Some(current_commit.to_string())
    };
    let previous = if earliest_status == Added {
        None
    } else {
        Some(previous_commit.to_string())
    };
    (current, previous)
}

/// Fold an ordered commit list into `(hash, timestamp)` pairs sorted
/// newest-first; used by the lifecycle analyzer's PR/push commit handling
/// where only the hash order matters, not file-level detail.
pub fn newest_first(commits: &[NormalizedCommit]) -> Vec<&NormalizedCommit> {
    let mut sorted: Vec<&NormalizedCommit> = commits.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use varsync_types::FileStatus;

    struct CountingPlatform {
        max_concurrent_seen: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        delay: std::time::Duration,
        log: Mutex<Vec<String>>,
    }

    impl SourcePlatform for CountingPlatform {
        fn fetch(&self, repo: &str, commit: &str, path: &str) -> FetchResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent_seen.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.log.lock().unwrap().push(format!("{repo}@{commit}:{path}"));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Some(format!("{repo}/{path}@{commit}").into_bytes()))
        }

        fn normalize_push(&self, _payload: &serde_json::Value) -> Result<PushEvent, SyncError> {
            unimplemented!()
        }

        fn normalize_pr(&self, _payload: &serde_json::Value) -> Result<PrEvent, SyncError> {
            unimplemented!()
        }

        fn resolve_repositories(&self, _include: &[String], _exclude: &[String]) -> Result<Vec<String>, SyncError> {
            unimplemented!()
        }

        fn ensure_webhook(&self, _repo: &str, _url: &str, _events: &[String]) -> Result<(), SyncError> {
            unimplemented!()
        }
    }

    #[test]
    fn fetch_many_respects_concurrency_bound() {
        let max_seen = Arc::new(AtomicUsize::new(0));
        let platform: Arc<dyn SourcePlatform> = Arc::new(CountingPlatform {
            max_concurrent_seen: Arc::clone(&max_seen),
            in_flight: Arc::new(AtomicUsize::new(0)),
            delay: std::time::Duration::from_millis(20),
            log: Mutex::new(Vec::new()),
        });
        let requests: Vec<FetchRequest> = (0..10)
            .map(|i| FetchRequest {
                repository: "acme/app".to_string(),
                commit: "abc".to_string(),
                path: format!("file{i}.json"),
            })
            .collect();

        let results = fetch_many(&platform, &requests, 3);
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn fetch_many_preserves_request_order_in_results() {
        let platform: Arc<dyn SourcePlatform> = Arc::new(CountingPlatform {
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            delay: std::time::Duration::from_millis(1),
            log: Mutex::new(Vec::new()),
        });
        let requests: Vec<FetchRequest> = (0..5)
            .map(|i| FetchRequest {
                repository: "acme/app".to_string(),
                commit: "abc".to_string(),
                path: format!("file{i}.json"),
            })
            .collect();

        let results = fetch_many(&platform, &requests, 2);
        for (i, result) in results.into_iter().enumerate() {
            let bytes = result.unwrap().unwrap();
            assert_eq!(String::from_utf8(bytes).unwrap(), format!("acme/app/file{i}.json@abc"));
        }
    }

    #[test]
    fn commit_pair_skips_fetch_for_removed_and_added() {
        let (current, previous) = commit_pair_for(FileStatus::Removed, FileStatus::Added, "new-sha", "old-sha");
        assert_eq!(current, None);
        assert_eq!(previous, None);
    }

    #[test]
    fn commit_pair_fetches_both_for_modified() {
        let (current, previous) = commit_pair_for(FileStatus::Modified, FileStatus::Modified, "new-sha", "old-sha");
        assert_eq!(current, Some("new-sha".to_string()));
        assert_eq!(previous, Some("old-sha".to_string()));
    }
}
