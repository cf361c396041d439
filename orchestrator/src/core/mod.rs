//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod escalation;
pub mod event;
pub mod refinement;
pub mod state;
pub mod types;
pub mod verdict;
