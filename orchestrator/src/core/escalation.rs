//! Escalation decision for the refinement loop.

use crate::core::state::State;
use crate::core::verdict::VerificationPayload;

/// Decision taken after each verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    /// Run another iteration (bounded by the loop cap).
    Continue,
    /// Stop the loop: the report was approved.
    Escalate,
}

/// Decides whether a refinement loop should stop, from state alone.
pub trait EscalationEvaluator: Send + Sync {
    fn evaluate(&self, state: &State) -> LoopSignal;
}

/// Evaluator that reads the verdict written by the Verify stage.
///
/// Only the configured key is inspected. An absent key means "continue".
#[derive(Debug, Clone)]
pub struct VerdictEvaluator {
    key: String,
}

impl VerdictEvaluator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl EscalationEvaluator for VerdictEvaluator {
    fn evaluate(&self, state: &State) -> LoopSignal {
        match state.get(&self.key).map(VerificationPayload::from_value) {
            Some(payload) if payload.is_pass() => LoopSignal::Escalate,
            _ => LoopSignal::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn evaluate(value: Option<Value>) -> LoopSignal {
        let mut state = State::new();
        if let Some(value) = value {
            state.set("verification_feedback", value);
        }
        VerdictEvaluator::new("verification_feedback").evaluate(&state)
    }

    #[test]
    fn structured_pass_escalates() {
        assert_eq!(
            evaluate(Some(json!({"status": "pass", "feedback": "ok"}))),
            LoopSignal::Escalate
        );
    }

    #[test]
    fn structured_fail_continues() {
        assert_eq!(
            evaluate(Some(json!({"status": "fail", "feedback": "x"}))),
            LoopSignal::Continue
        );
    }

    #[test]
    fn structured_pass_with_null_feedback_escalates() {
        assert_eq!(
            evaluate(Some(json!({"status": "pass", "feedback": null}))),
            LoopSignal::Escalate
        );
    }

    #[test]
    fn raw_string_with_marker_escalates() {
        assert_eq!(
            evaluate(Some(json!(r#"prefix {"status": "pass"} suffix"#))),
            LoopSignal::Escalate
        );
    }

    #[test]
    fn absent_key_continues() {
        assert_eq!(evaluate(None), LoopSignal::Continue);
    }

    #[test]
    fn other_keys_are_ignored() {
        let mut state = State::new();
        state.set("threat_model_report_content", json!(r#""status": "pass""#));
        assert_eq!(
            VerdictEvaluator::new("verification_feedback").evaluate(&state),
            LoopSignal::Continue
        );
    }
}
