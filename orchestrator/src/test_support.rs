//! Test-only doubles for the model and artifact seams.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::agents::AgentConfig;
use crate::agents::builder::BuilderAgent;
use crate::agents::modeler::ModelerAgent;
use crate::agents::parser::ParserAgent;
use crate::agents::verifier::VerifierAgent;
use crate::core::escalation::VerdictEvaluator;
use crate::core::event::Content;
use crate::core::types::{StageKind, VERIFICATION_LOOP_AUTHOR, PIPELINE_NAME};
use crate::io::artifacts::ArtifactWriter;
use crate::io::invoker::{InvokeRequest, ModelInvoker, ModelReply};
use crate::looping::RefinementLoop;
use crate::pipeline::Pipeline;

/// A queued reply for one stage.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
}

/// Invoker returning queued replies per stage.
///
/// When a stage's queue is empty it answers `"<stage> output"`.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    replies: Mutex<HashMap<StageKind, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, stage: StageKind, text: impl Into<String>) -> Self {
        self.push(stage, ScriptedReply::Text(text.into()))
    }

    pub fn fail(self, stage: StageKind, message: impl Into<String>) -> Self {
        self.push(stage, ScriptedReply::Fail(message.into()))
    }

    fn push(self, stage: StageKind, reply: ScriptedReply) -> Self {
        self.replies
            .lock()
            .expect("replies lock")
            .entry(stage)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<InvokeRequest> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_for(&self, stage: StageKind) -> Vec<InvokeRequest> {
        self.calls()
            .into_iter()
            .filter(|call| call.stage == stage)
            .collect()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> Result<ModelReply> {
        self.calls.lock().expect("calls lock").push(request.clone());
        let next = self
            .replies
            .lock()
            .expect("replies lock")
            .get_mut(&request.stage)
            .and_then(VecDeque::pop_front);
        match next {
            Some(ScriptedReply::Text(text)) => Ok(ModelReply::text(text)),
            Some(ScriptedReply::Fail(message)) => Err(anyhow!(message)),
            None => Ok(ModelReply::text(format!("{} output", request.stage))),
        }
    }
}

/// Artifact writer that records report bodies in memory.
#[derive(Debug, Default)]
pub struct RecordingArtifacts {
    written: Mutex<Vec<String>>,
    pdf: bool,
    fail_writes: bool,
}

impl RecordingArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pdf(mut self) -> Self {
        self.pdf = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().expect("written lock").clone()
    }
}

#[async_trait]
impl ArtifactWriter for RecordingArtifacts {
    async fn write_markdown(&self, content: &str) -> Result<PathBuf> {
        if self.fail_writes {
            return Err(anyhow!("disk full"));
        }
        let mut written = self.written.lock().expect("written lock");
        written.push(content.to_string());
        Ok(PathBuf::from(format!("reports/report_test_{}.md", written.len())))
    }

    async fn render_pdf(&self, markdown: &Path) -> Result<Option<PathBuf>> {
        Ok(self.pdf.then(|| markdown.with_extension("pdf")))
    }
}

/// The threat-model pipeline over test doubles, with fixed instructions.
pub fn threat_model_pipeline(
    invoker: Arc<dyn ModelInvoker>,
    artifacts: Arc<dyn ArtifactWriter>,
    max_iterations: u32,
) -> Pipeline {
    let config = || AgentConfig {
        instructions: "Test instructions.".to_string(),
        prompt_budget_bytes: 50_000,
    };
    Pipeline::new(PIPELINE_NAME)
        .then_stage(Arc::new(ParserAgent::new(config(), Arc::clone(&invoker))))
        .then_stage(Arc::new(ModelerAgent::new(config(), Arc::clone(&invoker))))
        .then_stage(Arc::new(BuilderAgent::new(
            config(),
            Arc::clone(&invoker),
            artifacts,
        )))
        .then_refine(RefinementLoop::new(
            VERIFICATION_LOOP_AUTHOR,
            Arc::new(VerifierAgent::new(config(), invoker)),
            Arc::new(VerdictEvaluator::new(StageKind::Verify.output_key())),
            max_iterations,
        ))
}

/// A user message with a single text part.
pub fn text_message(text: &str) -> Content {
    Content::text(text)
}
