#![no_main]

use libfuzzer_sys::fuzz_target;
use varsync_webhook::{classify_event, verify_signature};

// verify_signature must never panic on arbitrary secrets/bodies/headers,
// and classify_event must handle arbitrary header text without panicking.
fuzz_target!(|data: (&str, &[u8], Option<&str>)| {
    let (secret, raw_body, signature_header) = data;
    let _ = verify_signature(secret, raw_body, signature_header);

    if let Some(header) = signature_header {
        let _ = classify_event(header);
    }
});
