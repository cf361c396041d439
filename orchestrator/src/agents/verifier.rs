//! Verify stage: review the report and return a pass/fail verdict.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{AgentConfig, AgentCore, reply_text};
use crate::core::types::StageKind;
use crate::core::verdict::{VERIFIER_OUTPUT_SCHEMA, state_value_from_reply};
use crate::invocation::{Stage, StageInput, StageReply};
use crate::io::invoker::ModelInvoker;

pub struct VerifierAgent {
    core: AgentCore,
}

impl VerifierAgent {
    pub fn new(config: AgentConfig, invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            core: AgentCore::new(StageKind::Verify, config, invoker),
        }
    }
}

#[async_trait]
impl Stage for VerifierAgent {
    fn name(&self) -> &str {
        self.core.kind().author()
    }

    fn output_key(&self) -> &str {
        self.core.kind().output_key()
    }

    async fn run(&self, input: &StageInput<'_>) -> Result<StageReply> {
        let reply = self
            .core
            .invoke(input, None, Vec::new(), Some(VERIFIER_OUTPUT_SCHEMA))
            .await?;
        let text = reply_text(self.core.kind(), &reply)?;
        Ok(StageReply {
            content: Some(reply.content),
            output: Some(state_value_from_reply(&text)),
            ..StageReply::default()
        })
    }
}
