//! `agentim-gatewayd`: the operator-machine gateway daemon (§4.5, §6).
//!
//! A thin CLI over [`agentim_gateway_session::GatewaySession`] — `login`
//! exchanges credentials for tokens, `start` runs the session and the
//! agent adapters it owns, `status` inspects the persisted state without
//! opening a connection. Telemetry setup follows the same shape as
//! `agentim-hub`'s (and, before it, the teacher's `cli::init_telemetry`).

mod agent_spec;
mod login;
mod start;
mod status;
mod token_provider;

use clap::{Parser, Subcommand};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "agentim-gatewayd", about = "AgentIM gateway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`). Overridden by `RUST_LOG`.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit structured JSON logs instead of human-readable ones.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Log in to a hub and persist the resulting tokens.
    Login(login::LoginArgs),
    /// Connect the gateway session and run until shutdown.
    Start(start::StartArgs),
    /// Print configuration location and identifiers.
    Status,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let exit_code = match cli.command {
        Commands::Login(args) => {
            login::run(args).await?;
            0
        },
        Commands::Start(args) => start::run(args).await?,
        Commands::Status => {
            status::run()?;
            0
        },
    };

    std::process::exit(exit_code);
}
