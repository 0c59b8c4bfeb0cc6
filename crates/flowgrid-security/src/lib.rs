//! # FlowGrid Security
//!
//! Webhook payload signing and verification (HMAC-SHA256, `v1=` scheme,
//! replay-window enforcement) plus the rotatable credential store backing
//! both inbound triggers and outbound notifications.
//!
//! The same signature scheme covers both directions:
//! ```text
//! signature = "v1=" + hex(HMAC-SHA256(secret, "{timestamp}.{payload}"))
//! ```

pub mod credentials;
pub mod signature;

pub use credentials::{CredentialInfo, CredentialStore, WebhookCredential};
pub use signature::{MAX_SKEW_SECS, SignatureError, sign, verify};
