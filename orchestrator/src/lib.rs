//! Threat-model pipeline orchestrator.
//!
//! A fixed sequence of model-backed stages (Parse → Analyze → Build) feeds a
//! bounded refinement loop (Verify → escalation check). Stages share a
//! per-session key/value state that only changes through appended events.
//!
//! - **[`core`]**: Pure, deterministic logic (event model, state, verdicts,
//!   the loop state machine). No I/O.
//! - **[`io`]**: Side-effecting operations (config, process execution, model
//!   invocation, report artifacts).
//!
//! [`pipeline`], [`looping`], and [`invocation`] coordinate the two;
//! [`server`] exposes runs over HTTP with server-sent events.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod invocation;
pub mod io;
pub mod logging;
pub mod looping;
pub mod pipeline;
pub mod server;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
