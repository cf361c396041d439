//! Bounded verify-and-evaluate refinement loop.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument};

use crate::core::escalation::{EscalationEvaluator, LoopSignal};
use crate::core::event::{Content, NewEvent};
use crate::core::refinement::LoopState;
use crate::core::types::{ESCALATION_CHECKER_AUTHOR, VERIFICATION_LOOP_AUTHOR, VERIFICATION_OUTCOME_KEY};
use crate::invocation::{InvocationContext, Stage};

/// Reason why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The evaluator approved the report.
    Escalated,
    /// `max_iterations` ran without approval.
    CapReached { max_iterations: u32 },
}

impl LoopStop {
    /// Value written under `verification_outcome`.
    pub fn outcome(&self) -> &'static str {
        match self {
            LoopStop::Escalated => "certified",
            LoopStop::CapReached { .. } => "best_effort",
        }
    }
}

/// Summary of one loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub stop: LoopStop,
}

impl LoopOutcome {
    pub fn certified(&self) -> bool {
        self.stop == LoopStop::Escalated
    }
}

/// Runs a verification stage until the evaluator escalates or the cap is hit.
#[derive(Clone)]
pub struct RefinementLoop {
    name: String,
    verifier: Arc<dyn Stage>,
    evaluator: Arc<dyn EscalationEvaluator>,
    max_iterations: u32,
}

impl RefinementLoop {
    /// `max_iterations` below 1 is raised to 1.
    pub fn new(
        name: impl Into<String>,
        verifier: Arc<dyn Stage>,
        evaluator: Arc<dyn EscalationEvaluator>,
        max_iterations: u32,
    ) -> Self {
        Self {
            name: name.into(),
            verifier,
            evaluator,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    #[instrument(skip_all, fields(loop_name = %self.name, max_iterations = self.max_iterations))]
    pub async fn run(&self, ctx: &InvocationContext) -> LoopOutcome {
        let mut state = LoopState::start();
        while !state.is_terminal() {
            let iteration = state.iterations() + 1;
            let verified = ctx.run_stage(self.verifier.as_ref()).await;

            // A failed pass leaves an older verdict in state; it must not count.
            let signal = if verified.is_error() {
                LoopSignal::Continue
            } else {
                self.evaluator.evaluate(&ctx.session().state().await)
            };
            // Control events carry no content; escalation is the only payload.
            let checker = match signal {
                LoopSignal::Escalate => NewEvent::new(ESCALATION_CHECKER_AUTHOR).escalate(),
                LoopSignal::Continue => NewEvent::new(ESCALATION_CHECKER_AUTHOR),
            };
            ctx.emit(checker).await;
            state = state.advance(signal, self.max_iterations);
            info!(iteration, ?signal, "refinement iteration finished");
        }

        let stop = match state {
            LoopState::Escalated { .. } => LoopStop::Escalated,
            _ => LoopStop::CapReached {
                max_iterations: self.max_iterations,
            },
        };
        let outcome = LoopOutcome {
            iterations: state.iterations(),
            stop,
        };
        let summary = match stop {
            LoopStop::Escalated => format!(
                "Report certified after {} verification pass(es).",
                outcome.iterations
            ),
            LoopStop::CapReached { max_iterations } => format!(
                "Report not certified after {max_iterations} verification pass(es); returning best effort."
            ),
        };
        ctx.emit(
            NewEvent::new(VERIFICATION_LOOP_AUTHOR)
                .with_content(Content::text(summary))
                .with_state(VERIFICATION_OUTCOME_KEY, json!(stop.outcome())),
        )
        .await;
        info!(iterations = outcome.iterations, outcome = stop.outcome(), "refinement loop finished");
        outcome
    }
}
