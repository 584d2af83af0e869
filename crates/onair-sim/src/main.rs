//! onair-sim: runs a whole live room in one process.
//!
//! A host goes live on an in-memory signaling store, viewers join, some of
//! them are brought on stage, everyone chats, and the run waits until every
//! participant receives the streams it should. The room is then ended and
//! the simulator checks that every link was torn down.

mod scenario;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use onair_common::{ConfigError, LiveError};
use onair_config::OnAirConfig;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "onair-sim", version, about = "Simulate a live room end to end")]
struct Args {
    /// Viewers that join the room.
    #[arg(long, default_value_t = 4)]
    viewers: usize,

    /// Viewers promoted to the stage.
    #[arg(long, default_value_t = 2)]
    guests: usize,

    /// Chat messages sent by each viewer.
    #[arg(long, default_value_t = 1)]
    messages: usize,

    /// Seconds to wait for every stream to arrive.
    #[arg(long, default_value_t = 10)]
    settle_secs: u64,

    /// Room title.
    #[arg(long, default_value = "Simulated broadcast")]
    title: String,

    /// Config file path override.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Live(#[from] LiveError),

    #[error("the room did not settle: {0}")]
    Unsettled(String),

    #[error("{0} peer links still open after teardown")]
    LeakedLinks(usize),
}

fn load(args: &Args) -> Result<OnAirConfig, ConfigError> {
    match &args.config {
        Some(path) => {
            let config = onair_config::toml_loader::load_from_path(path)?;
            onair_config::validation::validate(&config)?;
            Ok(config)
        }
        None => onair_config::load_config(),
    }
}

fn init_logging(args: &Args, config: &OnAirConfig) {
    let fallback = config.logging.level.as_directive();
    let directive = match args.log_level.as_deref() {
        Some(level) => format!("onair={level}"),
        None => fallback.to_string(),
    };
    let directive: Directive = directive
        .parse()
        .unwrap_or_else(|_| Directive::from(tracing::Level::INFO));
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("onair-sim: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&args, &config);

    let plan = scenario::Plan {
        viewers: args.viewers,
        guests: args.guests.min(args.viewers),
        messages: args.messages,
        settle: std::time::Duration::from_secs(args.settle_secs),
        title: args.title.clone(),
    };
    match scenario::run(config, plan).await {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Simulation failed");
            eprintln!("onair-sim: {e}");
            ExitCode::FAILURE
        }
    }
}
