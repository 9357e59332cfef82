//! The Sync-mode Chooser: a cost model, not a heuristic cascade, for
//! resolving `SyncMode::Auto` into one of the three concrete modes.

use varsync_types::SyncMode;

/// Average provider/sink bandwidth assumption, bytes/sec.
const BANDWIDTH_BYTES_PER_SEC: f64 = 20_000_000.0;
/// Per-record write cost, milliseconds.
const WRITE_COST_MS: f64 = 0.5;
/// Per-record id-read cost, milliseconds.
const READ_COST_MS: f64 = 0.05;
/// Assumed drift rate for the smart-repair cost term.
const DRIFT_RATE: f64 = 0.05;

/// Inputs to the cost model. `record_count` and `content_bytes` describe
/// the current file's content; `sink_latency_ms` is a measured one-round-trip
/// probe (or an assumed 100ms if the probe failed).
#[derive(Debug, Clone, Copy)]
pub struct CostInputs {
    pub record_count: u64,
    pub content_bytes: u64,
    pub sink_latency_ms: f64,
    pub is_file_strategy: bool,
}

impl CostInputs {
    /// Approximate record count from content: the number of newlines, or 1
    /// if there are none but content is non-empty.
    pub fn estimate_record_count(content: &[u8]) -> u64 {
        let newlines = content.iter().filter(|&&b| b == b'\n').count() as u64;
        if newlines > 0 {
            newlines
        } else if content.is_empty() {
            0
        } else {
            1
        }
    }
}

/// Assumed round-trip latency when a health probe fails.
pub const ASSUMED_LATENCY_MS: f64 = 100.0;

fn cost_live(inputs: &CostInputs) -> f64 {
    let bandwidth_term = (inputs.content_bytes as f64 / BANDWIDTH_BYTES_PER_SEC) * 1000.0;
    let multiplier = if inputs.is_file_strategy { 2.0 } else { 1.0 };
    inputs.sink_latency_ms + bandwidth_term * multiplier
}

fn cost_upsert(inputs: &CostInputs) -> f64 {
    inputs.sink_latency_ms + (inputs.record_count as f64) * WRITE_COST_MS
}

fn cost_repair(inputs: &CostInputs) -> f64 {
    2.0 * inputs.sink_latency_ms
        + (inputs.record_count as f64) * READ_COST_MS
        + (inputs.record_count as f64) * DRIFT_RATE * WRITE_COST_MS
}

/// Resolve `SyncMode::Auto` into a concrete mode via the cost model. Empty
/// content unconditionally selects `GitSmartRepair`. Ties break
/// live → upsert → repair.
pub fn decide(inputs: &CostInputs) -> SyncMode {
    if inputs.content_bytes == 0 {
        return SyncMode::GitSmartRepair;
    }

    let live = cost_live(inputs);
    let upsert = cost_upsert(inputs);
    let repair = cost_repair(inputs);

    let mut best = (SyncMode::LiveState, live);
    if upsert < best.1 {
        best = (SyncMode::GitUpsertAll, upsert);
    }
    if repair < best.1 {
        best = (SyncMode::GitSmartRepair, repair);
    }
    best.0
}

/// The mode to actually execute: the rule's mode verbatim, or the
/// chooser's decision if the rule says `Auto`.
pub fn resolve(configured: SyncMode, inputs: &CostInputs) -> SyncMode {
    match configured {
        SyncMode::Auto => decide(inputs),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_always_picks_smart_repair() {
        let inputs = CostInputs {
            record_count: 0,
            content_bytes: 0,
            sink_latency_ms: 1.0,
            is_file_strategy: false,
        };
        assert_eq!(decide(&inputs), SyncMode::GitSmartRepair);
    }

    #[test]
    fn low_latency_small_content_picks_live_state() {
        // Scenario 5 from the testable-properties section: 1ms latency,
        // 10KB content, 100 records, document strategy.
        let inputs = CostInputs {
            record_count: 100,
            content_bytes: 10 * 1024,
            sink_latency_ms: 1.0,
            is_file_strategy: false,
        };
        assert_eq!(decide(&inputs), SyncMode::LiveState);
    }

    #[test]
    fn many_records_small_payload_favors_live_over_upsert() {
        let inputs = CostInputs {
            record_count: 10_000,
            content_bytes: 100,
            sink_latency_ms: 1.0,
            is_file_strategy: false,
        };
        // cost_upsert ~5001ms dwarfs cost_live; live should win.
        assert_eq!(decide(&inputs), SyncMode::LiveState);
    }

    #[test]
    fn resolve_passes_through_explicit_modes_untouched() {
        let inputs = CostInputs {
            record_count: 1,
            content_bytes: 1,
            sink_latency_ms: 1.0,
            is_file_strategy: false,
        };
        assert_eq!(resolve(SyncMode::GitUpsertAll, &inputs), SyncMode::GitUpsertAll);
        assert_eq!(resolve(SyncMode::LiveState, &inputs), SyncMode::LiveState);
    }

    #[test]
    fn estimate_record_count_counts_newlines_or_defaults_to_one() {
        assert_eq!(CostInputs::estimate_record_count(b""), 0);
        assert_eq!(CostInputs::estimate_record_count(b"single line no newline"), 1);
        assert_eq!(CostInputs::estimate_record_count(b"a\nb\nc\n"), 3);
    }
}
