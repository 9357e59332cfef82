#![no_main]

use libfuzzer_sys::fuzz_target;
use varsync_types::{Bundle, DriftReport, SyncEvent};

// Any input that deserializes into one of the wire types must re-serialize
// and re-deserialize into an equal value.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(bundle) = serde_json::from_str::<Bundle>(text) {
        let encoded = serde_json::to_string(&bundle).expect("bundle re-serializes");
        let reparsed: Bundle = serde_json::from_str(&encoded).expect("bundle re-parses");
        assert_eq!(bundle.rules.len(), reparsed.rules.len());
        assert_eq!(bundle.platforms.len(), reparsed.platforms.len());
    }

    if let Ok(event) = serde_json::from_str::<SyncEvent>(text) {
        let encoded = serde_json::to_string(&event).expect("event re-serializes");
        let reparsed: SyncEvent = serde_json::from_str(&encoded).expect("event re-parses");
        assert_eq!(event.repository(), reparsed.repository());
    }

    if let Ok(report) = serde_json::from_str::<DriftReport>(text) {
        let encoded = serde_json::to_string(&report).expect("report re-serializes");
        let reparsed: DriftReport = serde_json::from_str(&encoded).expect("report re-parses");
        assert_eq!(report.items.len(), reparsed.items.len());
    }
});
