//! Model-backed pipeline stages.
//!
//! Each agent renders its prompt from instructions plus the state keys it
//! reads, calls the [`ModelInvoker`], and turns the reply into a
//! [`StageReply`](crate::invocation::StageReply).

use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::core::event::Blob;
use crate::core::types::StageKind;
use crate::invocation::StageInput;
use crate::io::invoker::{InvokeRequest, ModelInvoker, ModelReply};
use crate::io::prompt::{PromptBuilder, PromptInputs};

pub mod builder;
pub mod modeler;
pub mod parser;
pub mod verifier;

/// Settings shared by every agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub instructions: String,
    pub prompt_budget_bytes: usize,
}

/// Everything an agent needs to call the model.
#[derive(Clone)]
pub(crate) struct AgentCore {
    kind: StageKind,
    config: AgentConfig,
    invoker: Arc<dyn ModelInvoker>,
}

impl AgentCore {
    pub(crate) fn new(kind: StageKind, config: AgentConfig, invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            kind,
            config,
            invoker,
        }
    }

    pub(crate) fn kind(&self) -> StageKind {
        self.kind
    }

    /// Render the prompt and invoke the model.
    pub(crate) async fn invoke(
        &self,
        input: &StageInput<'_>,
        request: Option<&str>,
        attachments: Vec<Blob>,
        output_schema: Option<&str>,
    ) -> Result<ModelReply> {
        let labels: Vec<String> = attachments
            .iter()
            .enumerate()
            .map(|(idx, blob)| format!("attachment-{idx} ({})", blob.mime_type))
            .collect();
        let prompt = PromptBuilder::new(self.config.prompt_budget_bytes).build(
            self.kind,
            &PromptInputs {
                instructions: &self.config.instructions,
                request,
                attachments: &labels,
                state: input.state,
            },
        )?;
        self.invoker
            .invoke(&InvokeRequest {
                stage: self.kind,
                invocation_id: input.invocation_id.to_string(),
                prompt,
                attachments,
                output_schema: output_schema.map(str::to_string),
            })
            .await
    }
}

/// The reply's final text, or an error naming the stage.
pub(crate) fn reply_text(kind: StageKind, reply: &ModelReply) -> Result<String> {
    reply
        .final_text()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{kind} reply contained no text"))
}
