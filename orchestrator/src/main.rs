//! Threat-model pipeline orchestrator CLI.
//!
//! `init` scaffolds a project, `serve` hosts the pipeline over HTTP for the
//! gateway, and `run` executes one pipeline run locally, printing each event
//! as a JSON line.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use orchestrator::core::event::{Blob, Content, Event, Part};
use orchestrator::exit_codes;
use orchestrator::io::config::{CONFIG_FILE, load_config};
use orchestrator::io::init::{InitOptions, init_project};
use orchestrator::logging;
use orchestrator::pipeline::Pipeline;
use orchestrator::server::{HostState, serve};
use orchestrator::session::SessionStore;

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Threat-model pipeline orchestrator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config and stage instruction files.
    Init {
        /// Project directory.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Host the pipeline over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value = "8005")]
        port: u16,
        #[arg(long, default_value = CONFIG_FILE)]
        config: PathBuf,
    },
    /// Run the pipeline once on a local architecture description.
    Run {
        #[arg(long, default_value = CONFIG_FILE)]
        config: PathBuf,
        /// Text file describing the architecture.
        #[arg(long)]
        input: PathBuf,
        /// Architecture diagram to attach (repeatable).
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        #[arg(long, default_value = "cli_user")]
        user_id: String,
    },
}

#[tokio::main]
async fn main() {
    logging::init("warn");
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { dir, force } => {
            let paths = init_project(&dir, &InitOptions { force })?;
            println!("{}", paths.config_path.display());
            Ok(exit_codes::OK)
        }
        Command::Serve { bind, port, config } => cmd_serve(&bind, port, &config).await,
        Command::Run {
            config,
            input,
            images,
            user_id,
        } => cmd_run(&config, &input, &images, &user_id).await,
    }
}

fn load_pipeline(config_path: &Path) -> Result<Pipeline> {
    let config = load_config(config_path)?;
    Pipeline::from_config(&config, project_root(config_path))
}

/// The directory holding the config file.
fn project_root(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

async fn cmd_serve(bind: &str, port: u16, config_path: &Path) -> Result<i32> {
    let pipeline = load_pipeline(config_path)?;
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("parse bind address {bind}:{port}"))?;
    serve(HostState::new(pipeline), addr).await?;
    Ok(exit_codes::OK)
}

async fn cmd_run(
    config_path: &Path,
    input: &Path,
    images: &[PathBuf],
    user_id: &str,
) -> Result<i32> {
    let pipeline = load_pipeline(config_path)?;
    let message = build_message(input, images)?;

    let session = SessionStore::new().create(pipeline.name(), user_id).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => eprintln!("failed to encode event {}: {err}", event.ordinal),
            }
        }
    });

    let outcome = pipeline.run(&session, message, Some(tx)).await?;
    printer.await.context("join event printer")?;

    info!(invocation_id = %outcome.invocation_id, certified = outcome.certified(), "run finished");
    Ok(if outcome.certified() {
        exit_codes::OK
    } else {
        exit_codes::UNCERTIFIED
    })
}

fn build_message(input: &Path, images: &[PathBuf]) -> Result<Content> {
    let text =
        fs::read_to_string(input).with_context(|| format!("read input {}", input.display()))?;
    let mut parts = vec![Part::text(text)];
    for image in images {
        let bytes = fs::read(image).with_context(|| format!("read image {}", image.display()))?;
        parts.push(Part::InlineData(Blob {
            mime_type: mime_for_path(image)?.to_string(),
            data: STANDARD.encode(bytes),
        }));
    }
    Ok(Content::new(parts))
}

fn mime_for_path(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        "svg" => Ok("image/svg+xml"),
        "pdf" => Ok("application/pdf"),
        _ => Err(anyhow!("unsupported attachment type {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["orchestrator", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn parse_run_with_images() {
        let cli = Cli::parse_from([
            "orchestrator",
            "run",
            "--input",
            "arch.md",
            "--image",
            "a.png",
            "--image",
            "b.jpg",
        ]);
        let Command::Run { images, user_id, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(images.len(), 2);
        assert_eq!(user_id, "cli_user");
    }

    #[test]
    fn serve_defaults_to_port_8005() {
        let cli = Cli::parse_from(["orchestrator", "serve"]);
        assert!(matches!(cli.command, Command::Serve { port: 8005, .. }));
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(mime_for_path(Path::new("d.PNG")).expect("png"), "image/png");
        assert!(mime_for_path(Path::new("d.txt")).is_err());
    }

    #[test]
    fn project_root_of_bare_file_is_cwd() {
        assert_eq!(project_root(Path::new("orchestrator.toml")), Path::new("."));
        assert_eq!(project_root(Path::new("cfg/o.toml")), Path::new("cfg"));
    }
}
