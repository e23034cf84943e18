//! agentbox — run agent commands inside a bounded workspace.
//!
//! Thin binary entry point: wires the path validator, command safety gates,
//! and the PTY session manager, then drives one command end-to-end while
//! streaming its output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use agentbox_core::command_safety::{CommandAllowlist, SafetyOptions, validate_command};
use agentbox_core::config::AgentboxConfig;
use agentbox_core::terminal::{
    SessionManagerConfig, StreamEvent, StreamingOutputHandler, TerminalSessionManager,
};
use agentbox_core::tools::TerminalTool;
use agentbox_core::workspace::WorkspacePathValidator;

#[derive(Parser)]
#[command(name = "agentbox", version, about = "Bounded-workspace command execution sandbox")]
struct Cli {
    /// Workspace root; defaults to the current directory.
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a command inside the sandbox and stream its output.
    Exec {
        /// The command line to run via the user's shell.
        command: String,

        /// Working directory, relative to the workspace root.
        #[arg(long)]
        cwd: Option<String>,

        /// Timeout in milliseconds.
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long)]
        allow_pipes: bool,

        #[arg(long)]
        allow_redirections: bool,
    },
    /// Evaluate a command against the safety gates without running it.
    Check {
        command: String,

        #[arg(long)]
        allow_pipes: bool,

        #[arg(long)]
        allow_redirections: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    let config = AgentboxConfig::load_from_workspace(&workspace)?;
    let allowlist = CommandAllowlist::from_config(&config.commands);

    match cli.command {
        Commands::Check {
            command,
            allow_pipes,
            allow_redirections,
        } => {
            let options = SafetyOptions {
                allow_pipes,
                allow_redirections,
                ..SafetyOptions::default()
            };
            let verdict = validate_command(&command, &allowlist, options);
            println!("{}", serde_json::to_string_pretty(&json!({
                "command": command,
                "allowed": verdict.allowed,
                "reason": verdict.reason,
                "matched": verdict.matched,
            }))?);
            if !verdict.allowed {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Exec {
            command,
            cwd,
            timeout,
            allow_pipes,
            allow_redirections,
        } => {
            let exit_code = run_exec(
                &workspace,
                &config,
                allowlist,
                &command,
                cwd,
                timeout,
                allow_pipes,
                allow_redirections,
            )
            .await?;
            std::process::exit(exit_code);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_exec(
    workspace: &Path,
    config: &AgentboxConfig,
    allowlist: CommandAllowlist,
    command: &str,
    cwd: Option<String>,
    timeout: Option<u64>,
    allow_pipes: bool,
    allow_redirections: bool,
) -> Result<i32> {
    let validator = WorkspacePathValidator::bind(workspace);
    let manager = Arc::new(TerminalSessionManager::new(SessionManagerConfig::from(
        &config.terminal,
    )));
    let (streaming, mut events) = StreamingOutputHandler::new(&config.streaming);
    let streaming = Arc::new(streaming.without_line_events());
    let tool = TerminalTool::new(validator, allowlist, Arc::clone(&manager))
        .with_streaming(Arc::clone(&streaming));

    let response = tool
        .terminal_execute(json!({
            "command": command,
            "cwd": cwd,
            "timeout": timeout,
            "allowPipes": allow_pipes,
            "allowRedirections": allow_redirections,
        }))
        .await?;

    let status = response["status"].as_str().unwrap_or("error");
    if status != "running" {
        let message = response["message"].as_str().unwrap_or("execution refused");
        eprintln!("agentbox: {status}: {message}");
        return Ok(1);
    }
    let session_id = response["sessionId"]
        .as_str()
        .context("missing session id in execute response")?
        .to_string();

    let mut exit_code = 1;
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Output { data, .. } => {
                print!("{data}");
            }
            StreamEvent::Exit {
                exit_code: code, ..
            } => {
                exit_code = code;
            }
            StreamEvent::Error { message, .. } => {
                eprintln!("agentbox: {message}");
            }
            StreamEvent::Timeout { timeout_ms, .. } => {
                eprintln!("agentbox: session timed out after {timeout_ms} ms");
                exit_code = 124;
            }
            StreamEvent::SessionEnd { .. } => break,
            StreamEvent::Line { .. } => {}
        }
    }

    manager.cleanup_session(&session_id);
    use std::io::Write;
    std::io::stdout().flush().ok();
    Ok(exit_code)
}
