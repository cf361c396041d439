//! Refinement loop state machine.
//!
//! ```text
//! Iterating{n} --Escalate------------------> Escalated{n+1}
//! Iterating{n} --Continue, n+1 == max------> CapReached{n+1}
//! Iterating{n} --Continue, n+1 <  max------> Iterating{n+1}
//! ```
//!
//! Terminal states absorb every further signal.

use crate::core::escalation::LoopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// `completed` iterations have run and none escalated.
    Iterating { completed: u32 },
    /// The evaluator approved the artifact on iteration `iterations`.
    Escalated { iterations: u32 },
    /// `iterations` ran without approval and the cap was hit.
    CapReached { iterations: u32 },
}

impl LoopState {
    pub fn start() -> Self {
        LoopState::Iterating { completed: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoopState::Iterating { .. })
    }

    /// Iterations run so far.
    pub fn iterations(&self) -> u32 {
        match *self {
            LoopState::Iterating { completed } => completed,
            LoopState::Escalated { iterations } | LoopState::CapReached { iterations } => iterations,
        }
    }

    /// Apply the signal observed at the end of one iteration.
    pub fn advance(self, signal: LoopSignal, max_iterations: u32) -> Self {
        let LoopState::Iterating { completed } = self else {
            return self;
        };
        let iterations = completed + 1;
        match signal {
            LoopSignal::Escalate => LoopState::Escalated { iterations },
            LoopSignal::Continue if iterations >= max_iterations => {
                LoopState::CapReached { iterations }
            }
            LoopSignal::Continue => LoopState::Iterating {
                completed: iterations,
            },
        }
    }
}
