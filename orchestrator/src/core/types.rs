//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between pipeline components: which
//! stage writes which state key, and under which author name its events
//! appear in the session log.

use serde::{Deserialize, Serialize};

/// Name the pipeline host registers the threat-model pipeline under.
pub const PIPELINE_NAME: &str = "threat_model_orchestrator";

/// Author of the event recording the incoming user message.
pub const USER_AUTHOR: &str = "user";

/// Author of the control events emitted after every verification pass.
pub const ESCALATION_CHECKER_AUTHOR: &str = "escalation_checker";

/// Author of the closing event of the refinement loop.
pub const VERIFICATION_LOOP_AUTHOR: &str = "verification_loop";

/// State key the refinement loop writes its terminal outcome to.
pub const VERIFICATION_OUTCOME_KEY: &str = "verification_outcome";

/// The four kinds of model-backed stages in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Parse,
    Analyze,
    Build,
    Verify,
}

impl StageKind {
    /// Stages in pipeline order.
    pub const ALL: [StageKind; 4] = [
        StageKind::Parse,
        StageKind::Analyze,
        StageKind::Build,
        StageKind::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Parse => "parse",
            StageKind::Analyze => "analyze",
            StageKind::Build => "build",
            StageKind::Verify => "verify",
        }
    }

    /// Event author for this stage.
    pub fn author(&self) -> &'static str {
        match self {
            StageKind::Parse => "architecture_parser_agent",
            StageKind::Analyze => "threat_modeler_agent",
            StageKind::Build => "report_builder_agent",
            StageKind::Verify => "report_verifier_agent",
        }
    }

    /// The single state key this stage is responsible for writing.
    pub fn output_key(&self) -> &'static str {
        match self {
            StageKind::Parse => "architecture_summary",
            StageKind::Analyze => "raw_threat_model",
            StageKind::Build => "threat_model_report_content",
            StageKind::Verify => "verification_feedback",
        }
    }

    /// State keys this stage reads, all written by earlier stages.
    pub fn input_keys(&self) -> &'static [&'static str] {
        match self {
            StageKind::Parse => &[],
            StageKind::Analyze => &["architecture_summary"],
            StageKind::Build => &["architecture_summary", "raw_threat_model"],
            StageKind::Verify => &["threat_model_report_content"],
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
