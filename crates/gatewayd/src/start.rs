//! `agentim-gatewayd start` (§4.5, §6): connects the gateway session,
//! registers the requested agents, and runs until shutdown.

use std::sync::Arc;

use agentim_adapter::SpawnAdapter;
use agentim_config::gateway_state::{self, DaemonRecord};
use agentim_gateway_session::{AgentManager, GatewaySession, GatewaySessionConfig, SessionError};
use agentim_protocol::DeviceInfo;
use agentim_vault::TokenCipher;
use clap::Args;

use crate::{agent_spec::AgentSpec, token_provider::GatewayTokenProvider};

const DAEMON_NAME: &str = "gatewayd";

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Agent to register, as `name:type[:workdir]`. Repeatable.
    #[arg(long = "agent")]
    agents: Vec<String>,

    /// Exit once the last registered agent is removed, instead of running
    /// indefinitely (§4.5 "Ephemeral gateway lifecycle").
    #[arg(long, default_value_t = false)]
    ephemeral: bool,
}

/// Returns the process exit code (§6: 0 normal, 1 fatal auth/protocol mismatch).
pub async fn run(args: StartArgs) -> anyhow::Result<i32> {
    let cipher = TokenCipher::for_machine()?;
    let Some(config) = gateway_state::load_or_migrate(|plain| cipher.encrypt(plain).unwrap_or_default())? else {
        eprintln!("not logged in — run `agentim-gatewayd login` first");
        return Ok(1);
    };

    let specs = args.agents.iter().map(|raw| AgentSpec::parse(raw)).collect::<anyhow::Result<Vec<_>>>()?;

    let token_provider = GatewayTokenProvider::new(&config, cipher)?;
    let agents = Arc::new(AgentManager::new());

    let session_config = GatewaySessionConfig {
        ws_url: config.server_url.clone(),
        gateway_id: config.gateway_id.clone(),
        device_info: Some(device_info()),
        ephemeral: args.ephemeral,
        ..GatewaySessionConfig::default()
    };
    let session = Arc::new(GatewaySession::new(session_config, token_provider, Arc::clone(&agents)));
    session.install_signal_handlers();

    for spec in &specs {
        let adapter = Arc::new(SpawnAdapter::new(spec.spawn_config()));
        session.register_agent(spec.registration(), adapter).await;
    }

    let record = DaemonRecord {
        pid: std::process::id(),
        name: DAEMON_NAME.into(),
        kind: "gateway".into(),
        work_dir: std::env::current_dir()?.to_string_lossy().into_owned(),
        started_at_ms: now_ms(),
        gateway_id: config.gateway_id.clone(),
    };
    gateway_state::save_daemon_record(&record)?;

    let result = session.run().await;
    let _ = gateway_state::remove_daemon_record(DAEMON_NAME);

    match result {
        Ok(()) => Ok(0),
        Err(err @ (SessionError::AuthenticationFailed | SessionError::ProtocolMismatch | SessionError::MaxAttemptsExceeded(_))) => {
            tracing::error!(error = %err, "gateway session exited fatally");
            Ok(1)
        },
        Err(err) => Err(err.into()),
    }
}

fn device_info() -> DeviceInfo {
    DeviceInfo {
        platform: Some(std::env::consts::OS.to_string()),
        hostname: hostname::get().ok().map(|h| h.to_string_lossy().into_owned()),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
