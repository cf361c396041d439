//! Orchestrator configuration stored in `orchestrator.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::PIPELINE_NAME;

/// Default config file name, relative to the project root.
pub const CONFIG_FILE: &str = "orchestrator.toml";

/// Orchestrator configuration (TOML).
///
/// Relative paths are resolved against the project root (the directory that
/// holds the config file). Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name the pipeline is served under (`/list-apps`, `app_name`).
    pub app_name: String,

    /// Cap on Verify iterations inside the refinement loop.
    pub max_iterations: u32,

    /// Wall-clock budget for one model invocation, in seconds.
    pub stage_timeout_secs: u64,

    /// Truncate captured invoker stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Byte budget for a rendered stage prompt.
    pub prompt_budget_bytes: usize,

    /// Directory holding `<stage>.md` instruction files.
    pub instructions_dir: PathBuf,

    /// Directory report artifacts are written to.
    pub reports_dir: PathBuf,

    /// Scratch directory for invoker requests, logs, and attachments.
    pub work_dir: PathBuf,

    pub invoker: InvokerConfig,

    pub pdf: PdfConfig,
}

/// How the model CLI is launched for each stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InvokerConfig {
    /// Program and leading arguments (e.g. `["codex","exec","--skip-git-repo-check"]`).
    pub command: Vec<String>,

    /// Arguments appended after all flags (e.g. `["-"]` to read the prompt from stdin).
    pub trailing_args: Vec<String>,

    /// Flag that receives a path the CLI writes its final reply to. Stdout is used when unset.
    pub output_file_flag: Option<String>,

    /// Flag that receives a JSON Schema path constraining the reply.
    pub output_schema_flag: Option<String>,

    /// Flag repeated once per decoded inline attachment.
    pub attachment_flag: Option<String>,
}

/// External Markdown-to-PDF renderer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PdfConfig {
    /// Command with `{input}` and `{output}` placeholders. Empty disables PDF rendering.
    pub command: Vec<String>,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
            ],
            trailing_args: vec!["-".to_string()],
            output_file_flag: Some("--output-last-message".to_string()),
            output_schema_flag: Some("--output-schema".to_string()),
            attachment_flag: Some("--image".to_string()),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            app_name: PIPELINE_NAME.to_string(),
            max_iterations: 3,
            stage_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 200_000,
            instructions_dir: PathBuf::from("instructions"),
            reports_dir: PathBuf::from("reports"),
            work_dir: PathBuf::from(".orchestrator/work"),
            invoker: InvokerConfig::default(),
            pdf: PdfConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(anyhow!("app_name must be non-empty"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.stage_timeout_secs == 0 {
            return Err(anyhow!("stage_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.invoker.command.is_empty() || self.invoker.command[0].trim().is_empty() {
            return Err(anyhow!("invoker.command must be a non-empty array"));
        }
        if !self.pdf.command.is_empty() && self.pdf.command[0].trim().is_empty() {
            return Err(anyhow!("pdf.command must start with a program"));
        }
        Ok(())
    }

    /// Resolve a configured path against the project root.
    pub fn resolve(&self, root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
