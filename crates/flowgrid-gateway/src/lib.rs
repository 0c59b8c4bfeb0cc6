//! # FlowGrid Gateway
//!
//! The HTTP surface of the orchestration core:
//!
//! - `POST /api/v1/hooks/{id}` — authenticated inbound webhook triggers
//! - `POST /api/v1/automations/{id}/trigger` — manual triggers
//! - `POST /api/v1/runs/complete` — worker-pool completion callbacks
//! - automation lifecycle (create / activate / pause / archive) and
//!   run/log reads
//!
//! Every trigger path goes through the usage gate before anything is
//! dispatched; inbound hooks are verified against the credential store and
//! rejected opaquely on any authentication failure.

pub mod routes;
pub mod server;
pub mod trigger;

pub use server::{AppState, build_router, serve};
