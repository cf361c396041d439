//! One pipeline invocation: the stage seam and the context stages run in.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::core::event::{ArtifactAck, Content, Event, NewEvent};
use crate::core::state::State;
use crate::session::SessionHandle;

/// What a stage sees: a state snapshot plus the triggering user message.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub state: &'a State,
    pub user_content: &'a Content,
    pub invocation_id: &'a str,
}

/// What a stage produced. `output` is written to the stage's output key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReply {
    pub content: Option<Content>,
    pub output: Option<Value>,
    pub artifacts: BTreeMap<String, ArtifactAck>,
}

/// A unit of pipeline work that writes at most one state key.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Event author name.
    fn name(&self) -> &str;

    /// The state key this stage writes.
    fn output_key(&self) -> &str;

    async fn run(&self, input: &StageInput<'_>) -> Result<StageReply>;
}

/// Carries one invocation's identity and forwards every appended event to an
/// optional live sink.
pub struct InvocationContext {
    session: SessionHandle,
    invocation_id: String,
    user_content: Content,
    sink: Option<mpsc::UnboundedSender<Event>>,
}

impl InvocationContext {
    pub fn new(
        session: SessionHandle,
        invocation_id: impl Into<String>,
        user_content: Content,
        sink: Option<mpsc::UnboundedSender<Event>>,
    ) -> Self {
        Self {
            session,
            invocation_id: invocation_id.into(),
            user_content,
            sink,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn user_content(&self) -> &Content {
        &self.user_content
    }

    /// Append to the session, then forward to the sink.
    ///
    /// A closed sink (client went away) does not stop the run.
    pub async fn emit(&self, event: NewEvent) -> Event {
        let event = self.session.append(&self.invocation_id, event).await;
        if let Some(sink) = &self.sink
            && sink.send(event.clone()).is_err()
        {
            warn!(ordinal = event.ordinal, "event sink closed, continuing run");
        }
        event
    }

    /// Run `stage` against the current state and record the result.
    ///
    /// A failing stage yields an error event and leaves its key unset.
    #[instrument(skip_all, fields(stage = stage.name(), invocation_id = %self.invocation_id))]
    pub async fn run_stage(&self, stage: &dyn Stage) -> Event {
        let state = self.session.state().await;
        let input = StageInput {
            state: &state,
            user_content: &self.user_content,
            invocation_id: &self.invocation_id,
        };
        match stage.run(&input).await {
            Ok(reply) => {
                let mut event = NewEvent::new(stage.name()).with_artifacts(reply.artifacts);
                if let Some(content) = reply.content {
                    event = event.with_content(content);
                }
                if let Some(output) = reply.output {
                    event = event.with_state(stage.output_key(), output);
                }
                info!("stage completed");
                self.emit(event).await
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "stage failed");
                self.emit(NewEvent::new(stage.name()).with_error(format!("{err:#}")))
                    .await
            }
        }
    }
}
