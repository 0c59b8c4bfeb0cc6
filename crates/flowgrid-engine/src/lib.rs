//! # FlowGrid Engine
//!
//! The orchestration core: automation templates, run lifecycle, and
//! dependency-ordered dispatch.
//!
//! ## Architecture
//! ```text
//! trigger (manual / schedule / webhook)
//!   → UsageGate (flowgrid-quota, caller-side)
//!   → RunOrchestrator.create_run     copy template → resolve DAG → pending
//!   → RunOrchestrator.start_run      pending → running, emit DispatchEvent
//!       ────────────────────────→ external worker pool
//!       ←──── completion callback ────
//!   → RunOrchestrator.complete_run   running → success | failed,
//!                                    bump automation counters,
//!                                    reschedule if schedule-triggered
//! ```
//!
//! Task execution itself lives outside this crate: the engine only ever
//! emits one typed [`DispatchEvent`] per run and consumes completion
//! reports. The schedule "wake me at T" mechanism is also external — the
//! engine just maintains the [`ScheduleQueue`] min-heap of next-due
//! instants for the poller to drain.

pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod store;

pub use graph::{GraphError, resolve};
pub use model::{Automation, LogEntry, Run, RunTask, TaskTemplate, TriggerConfig};
pub use orchestrator::{CompletionReport, DispatchEvent, RunOrchestrator};
pub use queue::{DueEntry, ScheduleQueue};
pub use store::EngineDb;
