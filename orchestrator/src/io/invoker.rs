//! Model invocation abstraction.
//!
//! The [`ModelInvoker`] trait decouples stages from the model backend. The
//! production implementation spawns a model CLI per request; tests use
//! scripted invokers that return predetermined replies without spawning
//! processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::event::{Blob, Content};
use crate::core::types::StageKind;
use crate::io::config::InvokerConfig;
use crate::io::process::{CommandOutput, run_command};

/// One model call.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub stage: StageKind,
    /// Pipeline run this call belongs to.
    pub invocation_id: String,
    pub prompt: String,
    /// Inline binary inputs (e.g. architecture diagrams).
    pub attachments: Vec<Blob>,
    /// JSON Schema the reply must satisfy, when the stage has one.
    pub output_schema: Option<String>,
}

/// The model's reply to one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub content: Content,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Content::text(text),
        }
    }

    /// The last non-blank text part, if any.
    pub fn final_text(&self) -> Option<&str> {
        self.content.last_text()
    }
}

/// Abstraction over model backends.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, request: &InvokeRequest) -> Result<ModelReply>;
}

/// Invoker that spawns a model CLI (e.g. `codex exec`) per request.
///
/// Each call gets its own directory, `work_dir/<invocation_id>/<stage>-<uuid>`,
/// holding the output schema, decoded attachments, the reply file, and an
/// `invoker.log`.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    config: InvokerConfig,
    work_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandInvoker {
    pub fn new(
        config: InvokerConfig,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            timeout,
            output_limit_bytes,
        }
    }
}

#[async_trait]
impl ModelInvoker for CommandInvoker {
    #[instrument(skip_all, fields(
        stage = %request.stage,
        invocation_id = %request.invocation_id,
        attachments = request.attachments.len(),
    ))]
    async fn invoke(&self, request: &InvokeRequest) -> Result<ModelReply> {
        let (program, leading) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("invoker command is empty"))?;

        let call_dir = self
            .work_dir
            .join(&request.invocation_id)
            .join(format!("{}-{}", request.stage, Uuid::new_v4()));
        tokio::fs::create_dir_all(&call_dir)
            .await
            .with_context(|| format!("create invoker dir {}", call_dir.display()))?;
        // The child runs inside `call_dir`, so every path handed to it must be absolute.
        let call_dir = std::path::absolute(&call_dir)
            .with_context(|| format!("resolve invoker dir {}", call_dir.display()))?;
        info!(call_dir = %call_dir.display(), "starting model invocation");

        let mut cmd = Command::new(program);
        cmd.args(leading).current_dir(&call_dir);

        if let (Some(flag), Some(schema)) = (&self.config.output_schema_flag, &request.output_schema)
        {
            let schema_path = call_dir.join("output.schema.json");
            tokio::fs::write(&schema_path, schema)
                .await
                .with_context(|| format!("write output schema {}", schema_path.display()))?;
            cmd.arg(flag).arg(&schema_path);
        }

        let output_path = call_dir.join("reply.md");
        if let Some(flag) = &self.config.output_file_flag {
            cmd.arg(flag).arg(&output_path);
        }

        if !request.attachments.is_empty() {
            let Some(flag) = &self.config.attachment_flag else {
                return Err(anyhow!(
                    "request carries {} attachment(s) but invoker.attachment_flag is unset",
                    request.attachments.len()
                ));
            };
            for (idx, blob) in request.attachments.iter().enumerate() {
                let path = write_attachment(&call_dir, idx, blob).await?;
                cmd.arg(flag).arg(path);
            }
        }

        cmd.args(&self.config.trailing_args);

        let output = run_command(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .await
        .context("run model command")?;

        write_invoker_log(
            &call_dir.join("invoker.log"),
            &output,
            self.output_limit_bytes,
        )
        .await?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model command timed out");
            return Err(anyhow!("model command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}",
                output.status.code()
            ));
        }

        let reply = if self.config.output_file_flag.is_some() {
            tokio::fs::read_to_string(&output_path)
                .await
                .with_context(|| format!("read model reply {}", output_path.display()))?
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        if reply.trim().is_empty() {
            return Err(anyhow!("model returned an empty reply"));
        }

        debug!(bytes = reply.len(), "model invocation completed");
        Ok(ModelReply::text(reply.trim().to_string()))
    }
}

/// File extension for an attachment's MIME type.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        _ => "bin",
    }
}

async fn write_attachment(dir: &Path, idx: usize, blob: &Blob) -> Result<PathBuf> {
    let bytes = STANDARD
        .decode(blob.data.trim())
        .with_context(|| format!("decode attachment {idx} ({})", blob.mime_type))?;
    let path = dir.join(format!(
        "attachment-{idx}.{}",
        extension_for_mime(&blob.mime_type)
    ));
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("write attachment {}", path.display()))?;
    Ok(path)
}

async fn write_invoker_log(
    path: &Path,
    output: &CommandOutput,
    output_limit: usize,
) -> Result<()> {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("invoker"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("invoker"));
    if output.timed_out {
        buf.push_str("\n[invoker timed out]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }

    tokio::fs::write(path, buf)
        .await
        .with_context(|| format!("write invoker log {}", path.display()))
}
