//! Report artifact persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Local;
use tokio::process::Command;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::io::process::run_command;

/// Writes report artifacts produced by the Build stage.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Persist the Markdown report and return where it was written.
    async fn write_markdown(&self, content: &str) -> Result<PathBuf>;

    /// Render a PDF next to `markdown`. `Ok(None)` means PDF output is disabled.
    async fn render_pdf(&self, markdown: &Path) -> Result<Option<PathBuf>>;
}

/// File-name stem for a report written now: `report_YYYYmmdd_HHMMSS_<8 hex>`.
///
/// The random suffix keeps reports from concurrent sessions apart.
pub fn report_stem() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "report_{}_{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

/// Writes reports under a directory and shells out for PDF rendering.
#[derive(Debug, Clone)]
pub struct FsArtifactWriter {
    reports_dir: PathBuf,
    pdf_command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl FsArtifactWriter {
    pub fn new(
        reports_dir: impl Into<PathBuf>,
        pdf_command: Vec<String>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            reports_dir: reports_dir.into(),
            pdf_command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    #[instrument(skip_all, fields(reports_dir = %self.reports_dir.display(), bytes = content.len()))]
    async fn write_markdown(&self, content: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .with_context(|| format!("create reports dir {}", self.reports_dir.display()))?;
        let path = self.reports_dir.join(format!("{}.md", report_stem()));
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("write report {}", path.display()))?;
        info!(path = %path.display(), "report written");
        Ok(path)
    }

    #[instrument(skip_all, fields(markdown = %markdown.display()))]
    async fn render_pdf(&self, markdown: &Path) -> Result<Option<PathBuf>> {
        let Some((program, args)) = self.pdf_command.split_first() else {
            return Ok(None);
        };
        let output_path = markdown.with_extension("pdf");
        let input = markdown.display().to_string();
        let output = output_path.display().to_string();

        let mut cmd = Command::new(program);
        for arg in args {
            cmd.arg(arg.replace("{input}", &input).replace("{output}", &output));
        }
        let result = run_command(cmd, None, self.timeout, self.output_limit_bytes)
            .await
            .context("run pdf renderer")?;
        if result.timed_out {
            return Err(anyhow!("pdf renderer timed out after {:?}", self.timeout));
        }
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(exit_code = ?result.status.code(), "pdf renderer failed");
            return Err(anyhow!(
                "pdf renderer failed with status {:?}: {}",
                result.status.code(),
                stderr.trim()
            ));
        }
        if !output_path.is_file() {
            return Err(anyhow!(
                "pdf renderer did not produce {}",
                output_path.display()
            ));
        }
        info!(path = %output_path.display(), "pdf rendered");
        Ok(Some(output_path))
    }
}
