//! agent-bridge - run one Claude Code turn and stream it as NDJSON
//!
//! Usage: `agent-bridge <prompt> [session_id] [cwd]`
//!
//! Protocol lines go to stdout; logs go to stderr.

use agent_stream_bridge::agent::{
    ClaudeCliUpstream, LineEmitter, OutputEvent, RetryController, SessionDriver,
};
use agent_stream_bridge::config::BridgeConfig;
use agent_stream_bridge::Error;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agent-bridge")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Bridge a Claude Code session into a small NDJSON protocol")]
struct Cli {
    /// Prompt for this turn
    prompt: Option<String>,

    /// Session to resume
    session_id: Option<String>,

    /// Working directory for the agent
    cwd: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "AGENT_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Model override
    #[arg(long)]
    model: Option<String>,

    /// Permission mode override
    #[arg(long)]
    permission_mode: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let mut emitter = LineEmitter::stdout();
    ExitCode::from(run(&cli, &mut emitter).await)
}

/// Run one turn and return the process exit status
async fn run<W: Write>(cli: &Cli, emitter: &mut LineEmitter<W>) -> u8 {
    let Some(prompt) = non_empty(cli.prompt.clone()) else {
        let err = Error::Usage(
            "prompt is required (agent-bridge <prompt> [session_id] [cwd])".to_string(),
        );
        return fail(emitter, &err.wire_message());
    };
    let session_id = non_empty(cli.session_id.clone());
    let cwd = non_empty(cli.cwd.clone()).map(PathBuf::from);

    let (config, upstream) = match bootstrap(cli) {
        Ok(ready) => ready,
        Err(e) => return fail(emitter, &format!("{:#}", e)),
    };

    tracing::info!(
        binary = %upstream.binary().display(),
        session_id = ?session_id,
        cwd = ?cwd,
        "Starting agent turn"
    );

    let controller = RetryController::new(SessionDriver::new(
        upstream,
        config.upstream.to_options(),
    ));

    match controller
        .run(&prompt, session_id.as_deref(), cwd.as_deref(), emitter)
        .await
    {
        Ok(outcome) => {
            tracing::info!(outcome = ?outcome, lines = emitter.lines_written(), "Agent turn finished");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Output channel failed");
            1
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("agent_stream_bridge={}", log_level).into());

    let text = (format == LogFormat::Text)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let json = (format == LogFormat::Json)
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

/// Load configuration, apply CLI overrides and locate the upstream binary
fn bootstrap(cli: &Cli) -> Result<(BridgeConfig, ClaudeCliUpstream)> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    if let Some(model) = &cli.model {
        config.upstream.model = Some(model.clone());
    }
    if let Some(mode) = &cli.permission_mode {
        config.upstream.permission_mode = Some(mode.clone());
    }

    let upstream = ClaudeCliUpstream::locate(config.upstream.binary.as_deref())
        .context("Failed to locate Claude Code CLI")?;

    Ok((config, upstream))
}

/// Report a pre-turn failure as a single error line
fn fail<W: Write>(emitter: &mut LineEmitter<W>, message: &str) -> u8 {
    tracing::error!(error = message, "Cannot start agent turn");
    if let Err(e) = emitter.emit(&OutputEvent::Error {
        error: message.to_string(),
    }) {
        tracing::error!(error = %e, "Output channel failed");
    }
    1
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
