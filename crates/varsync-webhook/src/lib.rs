//! Inbound webhook ingress: signature verification and event-kind
//! classification for Git provider webhooks.
//!
//! Parsing the provider-specific JSON body into a [`PushEvent`]/[`PrEvent`]
//! is a Source adapter concern (`varsync-core`); this crate only answers
//! "is this request authentic, and what kind of event is it".
//!
//! [`PushEvent`]: https://docs.rs/varsync-types
//! [`PrEvent`]: https://docs.rs/varsync-types

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The event kind a provider's event-type header identifies, independent
/// of the payload shape (which varies per provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    Push,
    PullRequest,
    /// A recognized but uninteresting event (e.g. `ping`).
    Ignored,
    /// An event-type header value this ingress does not recognize.
    Unknown,
}

/// Failure to authenticate an inbound webhook request.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("signature header is not well-formed: {0}")]
    MalformedSignature(String),
    #[error("signature does not match")]
    Mismatch,
}

/// Verify a `sha256=<hex>`-style HMAC signature header (the convention used
/// by GitHub, GitLab and Bitbucket Cloud) against the raw request body.
///
/// Uses [`Mac::verify_slice`] for a constant-time comparison rather than
/// comparing hex strings, which would leak timing information.
pub fn verify_signature(
    secret: &str,
    raw_body: &[u8],
    signature_header: Option<&str>,
) -> Result<(), VerificationError> {
    let header = signature_header.ok_or(VerificationError::MissingSignature)?;
    let hex_sig = header.strip_prefix("sha256=").unwrap_or(header);
    let expected = hex::decode(hex_sig)
        .map_err(|e| VerificationError::MalformedSignature(e.to_string()))?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(raw_body);
    mac.verify_slice(&expected).map_err(|_| VerificationError::Mismatch)
}

/// Classify a provider's event-type header into a [`WebhookEventKind`].
///
/// Recognizes the header names used by GitHub (`X-GitHub-Event`), GitLab
/// (`X-Gitlab-Event`) and Bitbucket Cloud (`X-Event-Key`); callers pass
/// whichever of the three is present on the request.
pub fn classify_event(event_header_value: &str) -> WebhookEventKind {
    match event_header_value.to_ascii_lowercase().as_str() {
        "push" | "repo:push" => WebhookEventKind::Push,
        "pull_request" | "merge_request" | "merge_request_hook" | "pullrequest:created"
        | "pullrequest:updated" | "pullrequest:fulfilled" | "pullrequest:rejected" => {
            WebhookEventKind::PullRequest
        }
        "ping" => WebhookEventKind::Ignored,
        _ => WebhookEventKind::Unknown,
    }
}
