//! Sequential stage pipeline with a trailing refinement loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agents::AgentConfig;
use crate::agents::builder::BuilderAgent;
use crate::agents::modeler::ModelerAgent;
use crate::agents::parser::ParserAgent;
use crate::agents::verifier::VerifierAgent;
use crate::core::escalation::VerdictEvaluator;
use crate::core::event::{Content, Event, NewEvent};
use crate::core::types::{StageKind, USER_AUTHOR, VERIFICATION_LOOP_AUTHOR};
use crate::invocation::{InvocationContext, Stage};
use crate::io::artifacts::{ArtifactWriter, FsArtifactWriter};
use crate::io::config::PipelineConfig;
use crate::io::init::ProjectPaths;
use crate::io::instructions::load_instructions;
use crate::io::invoker::{CommandInvoker, ModelInvoker};
use crate::looping::{LoopOutcome, RefinementLoop};
use crate::session::SessionHandle;

/// One step of a pipeline.
#[derive(Clone)]
pub enum PipelineStep {
    Stage(Arc<dyn Stage>),
    Refine(RefinementLoop),
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub invocation_id: String,
    /// Outcome of the last refinement loop, if the pipeline has one.
    pub refinement: Option<LoopOutcome>,
}

impl RunOutcome {
    pub fn certified(&self) -> bool {
        self.refinement.is_some_and(|outcome| outcome.certified())
    }
}

/// Ordered steps run strictly one after another.
#[derive(Clone)]
pub struct Pipeline {
    name: String,
    steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn then_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.steps.push(PipelineStep::Stage(stage));
        self
    }

    pub fn then_refine(mut self, refinement: RefinementLoop) -> Self {
        self.steps.push(PipelineStep::Refine(refinement));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Parse → Analyze → Build → loop(Verify → evaluate).
    pub fn threat_model(
        config: &PipelineConfig,
        instructions_dir: &Path,
        invoker: Arc<dyn ModelInvoker>,
        artifacts: Arc<dyn ArtifactWriter>,
    ) -> Result<Self> {
        let agent_config = |kind: StageKind| -> Result<AgentConfig> {
            Ok(AgentConfig {
                instructions: load_instructions(instructions_dir, kind)?,
                prompt_budget_bytes: config.prompt_budget_bytes,
            })
        };
        let verifier = Arc::new(VerifierAgent::new(
            agent_config(StageKind::Verify)?,
            Arc::clone(&invoker),
        ));
        let refinement = RefinementLoop::new(
            VERIFICATION_LOOP_AUTHOR,
            verifier,
            Arc::new(VerdictEvaluator::new(StageKind::Verify.output_key())),
            config.max_iterations,
        );
        Ok(Pipeline::new(config.app_name.clone())
            .then_stage(Arc::new(ParserAgent::new(
                agent_config(StageKind::Parse)?,
                Arc::clone(&invoker),
            )))
            .then_stage(Arc::new(ModelerAgent::new(
                agent_config(StageKind::Analyze)?,
                Arc::clone(&invoker),
            )))
            .then_stage(Arc::new(BuilderAgent::new(
                agent_config(StageKind::Build)?,
                invoker,
                artifacts,
            )))
            .then_refine(refinement))
    }

    /// The threat-model pipeline wired to the configured CLI invoker and report directory.
    pub fn from_config(config: &PipelineConfig, root: &Path) -> Result<Self> {
        let paths = ProjectPaths::new(root, config);
        let timeout = Duration::from_secs(config.stage_timeout_secs);
        let invoker = Arc::new(CommandInvoker::new(
            config.invoker.clone(),
            paths.work_dir.clone(),
            timeout,
            config.output_limit_bytes,
        ));
        let artifacts = Arc::new(FsArtifactWriter::new(
            paths.reports_dir.clone(),
            config.pdf.command.clone(),
            timeout,
            config.output_limit_bytes,
        ));
        Self::threat_model(config, &paths.instructions_dir, invoker, artifacts)
    }

    /// Run every step for `message` on `session`, forwarding events to `sink`.
    ///
    /// Waits for any run already in progress on the same session.
    #[instrument(skip_all, fields(pipeline = %self.name, session_id = %session.id()))]
    pub async fn run(
        &self,
        session: &SessionHandle,
        message: Content,
        sink: Option<mpsc::UnboundedSender<Event>>,
    ) -> Result<RunOutcome> {
        if message.is_empty() {
            return Err(anyhow!("new message has no parts"));
        }
        let _guard = session.begin_run().await;
        let invocation_id = format!("e-{}", Uuid::new_v4());
        info!(%invocation_id, "pipeline run started");

        let ctx = InvocationContext::new(session.clone(), invocation_id.clone(), message, sink);
        ctx.emit(NewEvent::new(USER_AUTHOR).with_content(ctx.user_content().clone()))
            .await;

        let mut refinement = None;
        for step in &self.steps {
            match step {
                PipelineStep::Stage(stage) => {
                    ctx.run_stage(stage.as_ref()).await;
                }
                PipelineStep::Refine(refine) => {
                    refinement = Some(refine.run(&ctx).await);
                }
            }
        }

        info!(%invocation_id, certified = refinement.is_some_and(|o| o.certified()), "pipeline run finished");
        Ok(RunOutcome {
            invocation_id,
            refinement,
        })
    }

    /// Run in a background task and yield events as they are appended.
    ///
    /// Dropping the stream stops delivery only; the run itself completes.
    pub fn stream(
        self: Arc<Self>,
        session: SessionHandle,
        message: Content,
    ) -> impl Stream<Item = Event> + Send + 'static {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            if let Err(err) = self.run(&session, message, Some(tx)).await {
                warn!(err = %format!("{err:#}"), "pipeline run rejected");
            }
        });
        async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;
    use crate::test_support::{RecordingArtifacts, ScriptedInvoker, threat_model_pipeline};
    use futures::StreamExt;

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let pipeline = threat_model_pipeline(
            Arc::new(ScriptedInvoker::new()),
            Arc::new(RecordingArtifacts::new()),
            3,
        );
        let session = SessionStore::new().create("app", "user").await;
        assert!(pipeline.run(&session, Content::default(), None).await.is_err());
        assert!(session.events().await.is_empty());
    }

    #[tokio::test]
    async fn stream_yields_every_event_then_ends() {
        let invoker = Arc::new(
            ScriptedInvoker::new().reply(StageKind::Verify, r#"{"status": "pass", "feedback": "ok"}"#),
        );
        let pipeline = Arc::new(threat_model_pipeline(
            invoker,
            Arc::new(RecordingArtifacts::new()),
            3,
        ));
        let session = SessionStore::new().create("app", "user").await;
        let streamed: Vec<Event> = pipeline
            .stream(session.clone(), Content::text("web app"))
            .collect()
            .await;
        assert_eq!(streamed, session.events().await);
        let authors: Vec<&str> = streamed.iter().map(|e| e.author.as_str()).collect();
        assert_eq!(
            authors,
            vec![
                USER_AUTHOR,
                StageKind::Parse.author(),
                StageKind::Analyze.author(),
                StageKind::Build.author(),
                StageKind::Verify.author(),
                crate::core::types::ESCALATION_CHECKER_AUTHOR,
                VERIFICATION_LOOP_AUTHOR,
            ]
        );
    }

    #[tokio::test]
    async fn from_config_loads_instructions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pipeline = Pipeline::from_config(&PipelineConfig::default(), temp.path()).expect("build");
        assert_eq!(pipeline.name(), crate::core::types::PIPELINE_NAME);
        assert_eq!(pipeline.steps().len(), 4);
    }
}
