use anyhow::{Context, Result};
use retro_studio::config::Config;
use retro_studio::protocol::handler::OrchestratorHandler;
use retro_studio::protocol::messages::EventSink;
use retro_studio::protocol::transport::serve_stdio;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) -> Result<()> {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("retro_studio={}", level)));

    // stdout carries the channel protocol, so logs go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    setup_logging(&config.log_level)?;

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "Starting retro-studio orchestrator");
    tracing::debug!("Loaded configuration: {:?}", config);

    let build_tool = config.build_command.split_whitespace().next().unwrap_or_default();
    if which::which(build_tool).is_err() {
        tracing::warn!(
            tool = %build_tool,
            "Build tool is not installed or not in PATH. `run-game` requests will fail to build."
        );
    }

    let (events, events_rx) = EventSink::channel();
    let handler = OrchestratorHandler::new(Arc::new(config), events);
    serve_stdio(handler, events_rx).await?;

    tracing::info!("Orchestrator shutdown.");
    Ok(())
}
