//! Per-stage instruction files.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::types::StageKind;

/// Used when a stage has no instruction file, or the file is blank.
pub const DEFAULT_INSTRUCTIONS: &str = "Perform your tasks as an expert agent.";

/// Read `<dir>/<stage>.md`, trimmed. Missing or blank files fall back to
/// [`DEFAULT_INSTRUCTIONS`]; other read errors propagate.
pub fn load_instructions(dir: &Path, kind: StageKind) -> Result<String> {
    let path = dir.join(format!("{}.md", kind.as_str()));
    match fs::read_to_string(&path) {
        Ok(contents) if !contents.trim().is_empty() => Ok(contents.trim().to_string()),
        Ok(_) => {
            warn!(path = %path.display(), "instruction file is blank, using fallback");
            Ok(DEFAULT_INSTRUCTIONS.to_string())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "instruction file not found, using fallback");
            Ok(DEFAULT_INSTRUCTIONS.to_string())
        }
        Err(e) => Err(e).with_context(|| format!("read instructions {}", path.display())),
    }
}
