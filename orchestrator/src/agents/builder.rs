//! Build stage: threat model to a publishable Markdown report.
//!
//! Besides storing the report text in state, the builder persists it through
//! an [`ArtifactWriter`] and, when configured, renders a PDF. Artifact
//! failures are reported in the event's artifact delta and never fail the
//! stage: the report text is still the stage's output.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{AgentConfig, AgentCore, reply_text};
use crate::core::event::ArtifactAck;
use crate::core::types::StageKind;
use crate::invocation::{Stage, StageInput, StageReply};
use crate::io::artifacts::ArtifactWriter;
use crate::io::invoker::ModelInvoker;

/// Artifact-delta key of the Markdown report.
pub const REPORT_MARKDOWN: &str = "report_markdown";
/// Artifact-delta key of the rendered PDF.
pub const REPORT_PDF: &str = "report_pdf";

pub struct BuilderAgent {
    core: AgentCore,
    artifacts: Arc<dyn ArtifactWriter>,
}

impl BuilderAgent {
    pub fn new(
        config: AgentConfig,
        invoker: Arc<dyn ModelInvoker>,
        artifacts: Arc<dyn ArtifactWriter>,
    ) -> Self {
        Self {
            core: AgentCore::new(StageKind::Build, config, invoker),
            artifacts,
        }
    }

    async fn persist(&self, report: &str) -> BTreeMap<String, ArtifactAck> {
        let mut acks = BTreeMap::new();
        let markdown = match self.artifacts.write_markdown(report).await {
            Ok(path) => path,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "report write failed");
                acks.insert(
                    REPORT_MARKDOWN.to_string(),
                    ArtifactAck::Error {
                        error: format!("{err:#}"),
                    },
                );
                return acks;
            }
        };
        acks.insert(
            REPORT_MARKDOWN.to_string(),
            ArtifactAck::Success {
                file_path: markdown.display().to_string(),
            },
        );
        match self.artifacts.render_pdf(&markdown).await {
            Ok(Some(pdf)) => {
                acks.insert(
                    REPORT_PDF.to_string(),
                    ArtifactAck::Success {
                        file_path: pdf.display().to_string(),
                    },
                );
            }
            Ok(None) => {}
            Err(err) => {
                warn!(err = %format!("{err:#}"), "pdf render failed");
                acks.insert(
                    REPORT_PDF.to_string(),
                    ArtifactAck::Error {
                        error: format!("{err:#}"),
                    },
                );
            }
        }
        acks
    }
}

#[async_trait]
impl Stage for BuilderAgent {
    fn name(&self) -> &str {
        self.core.kind().author()
    }

    fn output_key(&self) -> &str {
        self.core.kind().output_key()
    }

    async fn run(&self, input: &StageInput<'_>) -> Result<StageReply> {
        let reply = self.core.invoke(input, None, Vec::new(), None).await?;
        let report = reply_text(self.core.kind(), &reply)?;
        let artifacts = self.persist(&report).await;
        Ok(StageReply {
            content: Some(reply.content),
            output: Some(Value::String(report)),
            artifacts,
        })
    }
}
