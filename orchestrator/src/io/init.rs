//! Project scaffolding: default config and per-stage instruction files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{CONFIG_FILE, PipelineConfig, write_config};
use crate::core::types::StageKind;

/// Canonical paths for a project root, resolved through its config.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub instructions_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>, config: &PipelineConfig) -> Self {
        let root = root.into();
        Self {
            config_path: root.join(CONFIG_FILE),
            instructions_dir: config.resolve(&root, &config.instructions_dir),
            reports_dir: config.resolve(&root, &config.reports_dir),
            work_dir: config.resolve(&root, &config.work_dir),
            root,
        }
    }

    pub fn instruction_path(&self, kind: StageKind) -> PathBuf {
        self.instructions_dir.join(format!("{}.md", kind.as_str()))
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config and instruction files.
    pub force: bool,
}

/// Write a default `orchestrator.toml` and instruction files into `root`.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    let config = PipelineConfig::default();
    let paths = ProjectPaths::new(root, &config);
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    write_config(&paths.config_path, &config)?;
    create_dir(&paths.instructions_dir)?;
    create_dir(&paths.reports_dir)?;
    for kind in StageKind::ALL {
        write_file(&paths.instruction_path(kind), default_instructions(kind))?;
    }

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

fn default_instructions(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Parse => PARSE_INSTRUCTIONS,
        StageKind::Analyze => ANALYZE_INSTRUCTIONS,
        StageKind::Build => BUILD_INSTRUCTIONS,
        StageKind::Verify => VERIFY_INSTRUCTIONS,
    }
}

const PARSE_INSTRUCTIONS: &str = "\
Identify every component, data store, external entity, and data flow.
Mark trust boundaries explicitly. Note anything the description leaves ambiguous.
";
const ANALYZE_INSTRUCTIONS: &str = "\
Enumerate threats per element using STRIDE.
Rate likelihood and impact as Low, Medium, or High and propose concrete mitigations.
";
const BUILD_INSTRUCTIONS: &str = "\
Write for an engineering audience. Lead with the highest-risk findings.
Include a table of all threats with their STRIDE category and rating.
";
const VERIFY_INSTRUCTIONS: &str = "\
Fail the report if any component lacks threat coverage, if mitigations are vague,
or if required sections are missing. Explain each gap in the feedback.
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::instructions::load_instructions;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.config_path.is_file());
        assert!(paths.reports_dir.is_dir());
        for kind in StageKind::ALL {
            assert!(paths.instruction_path(kind).is_file(), "{kind}");
        }
        assert_eq!(
            load_config(&paths.config_path).expect("load"),
            PipelineConfig::default()
        );
        let verify = load_instructions(&paths.instructions_dir, StageKind::Verify).expect("load");
        assert!(verify.starts_with("Fail the report"));
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_project(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_project(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_instructions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        let parse = paths.instruction_path(StageKind::Parse);
        fs::write(&parse, "custom").expect("write custom");

        init_project(temp.path(), &InitOptions { force: true }).expect("re-init");
        assert_eq!(fs::read_to_string(&parse).expect("read"), PARSE_INSTRUCTIONS);
    }
}
