//! # FlowGrid Schedule
//!
//! Schedule descriptors and the next-run-time calculator.
//!
//! Descriptors come from a small closed grammar, not full cron:
//! ```text
//! daily@HH:MM          every day at HH:MM UTC
//! weekly@<0-6>,HH:MM   weekly on weekday (0 = Sunday) at HH:MM
//! monthly@<1-31>,HH:MM monthly on the given day (clamped to month length)
//! every@Nh             every N hours
//! ```
//! Anything else degrades to a one-hour fallback rather than stalling the
//! automation — see [`next_run_time`].

pub mod calc;
pub mod spec;

pub use calc::next_run_time;
pub use spec::ScheduleSpec;
