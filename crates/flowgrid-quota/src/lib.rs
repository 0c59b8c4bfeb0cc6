//! # FlowGrid Quota
//!
//! Plan-tier admission control. Every trigger passes through the
//! [`UsageGate`] before anything is dispatched:
//!
//! ```text
//! trigger → UsageGate.check(tenant, kind)      read-only, never throws
//!             ├── allowed → create/start run → UsageGate.record(...)
//!             └── denied  → structured reason for upgrade messaging
//! ```
//!
//! Counters are per-tenant, per-period (daily for action/task counts,
//! monthly for tokens, a non-expiring bucket for automation totals) and
//! roll over implicitly — the period key is derived from the clock, no
//! reset job involved.

pub mod counters;
pub mod gate;

pub use counters::UsageDb;
pub use gate::{ActionKind, GateDecision, UsageGate};
