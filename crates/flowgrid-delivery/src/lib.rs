//! # FlowGrid Delivery
//!
//! Outbound webhook notifications: every payload is signed with the
//! subscriber's secret (same `v1=` scheme the inbound side verifies),
//! sent with a bounded timeout, and retried with exponential backoff on
//! transport failures and 5xx responses. 4xx responses are permanent —
//! the subscriber told us to stop.

pub mod client;
pub mod envelope;

pub use client::{DeliveryClient, DeliveryOptions, DeliveryOutcome, HttpTransport, Transport};
pub use envelope::{EVENT_RUN_COMPLETED, completion_envelope};
