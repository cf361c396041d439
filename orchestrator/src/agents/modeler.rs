//! Analyze stage: architecture summary to a STRIDE threat model.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{AgentConfig, AgentCore, reply_text};
use crate::core::types::StageKind;
use crate::invocation::{Stage, StageInput, StageReply};
use crate::io::invoker::ModelInvoker;

pub struct ModelerAgent {
    core: AgentCore,
}

impl ModelerAgent {
    pub fn new(config: AgentConfig, invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            core: AgentCore::new(StageKind::Analyze, config, invoker),
        }
    }
}

#[async_trait]
impl Stage for ModelerAgent {
    fn name(&self) -> &str {
        self.core.kind().author()
    }

    fn output_key(&self) -> &str {
        self.core.kind().output_key()
    }

    async fn run(&self, input: &StageInput<'_>) -> Result<StageReply> {
        let reply = self.core.invoke(input, None, Vec::new(), None).await?;
        let text = reply_text(self.core.kind(), &reply)?;
        Ok(StageReply {
            content: Some(reply.content),
            output: Some(Value::String(text)),
            ..StageReply::default()
        })
    }
}
