//! Parse stage: user description and diagrams to an architecture summary.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{AgentConfig, AgentCore, reply_text};
use crate::core::types::StageKind;
use crate::invocation::{Stage, StageInput, StageReply};
use crate::io::invoker::ModelInvoker;

pub struct ParserAgent {
    core: AgentCore,
}

impl ParserAgent {
    pub fn new(config: AgentConfig, invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            core: AgentCore::new(StageKind::Parse, config, invoker),
        }
    }
}

#[async_trait]
impl Stage for ParserAgent {
    fn name(&self) -> &str {
        self.core.kind().author()
    }

    fn output_key(&self) -> &str {
        self.core.kind().output_key()
    }

    async fn run(&self, input: &StageInput<'_>) -> Result<StageReply> {
        let request = input.user_content.joined_text();
        let attachments = input.user_content.inline_data().cloned().collect();
        let reply = self
            .core
            .invoke(input, request.as_deref(), attachments, None)
            .await?;
        let text = reply_text(self.core.kind(), &reply)?;
        Ok(StageReply {
            content: Some(reply.content),
            output: Some(Value::String(text)),
            ..StageReply::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{Blob, Content, Part};
    use crate::core::state::State;
    use crate::test_support::ScriptedInvoker;
    use serde_json::json;

    #[tokio::test]
    async fn text_and_diagrams_reach_the_model() {
        let invoker = Arc::new(ScriptedInvoker::new().reply(StageKind::Parse, "## Components"));
        let agent = ParserAgent::new(
            AgentConfig {
                instructions: "List components.".to_string(),
                prompt_budget_bytes: 50_000,
            },
            invoker.clone(),
        );
        let user = Content::new(vec![
            Part::text("Mobile app talking to an API gateway"),
            Part::InlineData(Blob {
                mime_type: "image/png".to_string(),
                data: "aGVsbG8=".to_string(),
            }),
        ]);
        let state = State::new();
        let reply = agent
            .run(&StageInput {
                state: &state,
                user_content: &user,
                invocation_id: "e-1",
            })
            .await
            .expect("run");

        assert_eq!(reply.output, Some(json!("## Components")));
        let call = &invoker.calls_for(StageKind::Parse)[0];
        assert_eq!(call.attachments.len(), 1);
        assert!(call.prompt.contains("API gateway"));
        assert!(call.prompt.contains("attachment-0 (image/png)"));
    }
}
