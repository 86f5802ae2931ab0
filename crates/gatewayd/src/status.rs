//! `agentim-gatewayd status` (§6): prints configuration location and
//! identifiers without touching any network connection.

use agentim_config::gateway_state::{self, DaemonRecord};
use agentim_vault::TokenCipher;

const DAEMON_NAME: &str = "gatewayd";

pub fn run() -> anyhow::Result<()> {
    let dir = gateway_state::state_dir()?;
    println!("config directory: {}", dir.display());

    let cipher = TokenCipher::for_machine()?;
    match gateway_state::load_or_migrate(|plain| cipher.encrypt(plain).unwrap_or_default())? {
        Some(config) => {
            println!("server: {}", config.server_base_url);
            println!("gateway id: {}", config.gateway_id);
        },
        None => {
            println!("not logged in — run `agentim-gatewayd login` first");
            return Ok(());
        },
    }

    match gateway_state::load_daemon_record(DAEMON_NAME)? {
        Some(record) => print_daemon_status(&record),
        None => println!("daemon: not running"),
    }

    Ok(())
}

fn print_daemon_status(record: &DaemonRecord) {
    if gateway_state::is_daemon_alive(record) {
        println!("daemon: running (pid {}, since {})", record.pid, record.started_at_ms);
    } else {
        println!("daemon: stale record (pid {} is not an agentim process)", record.pid);
    }
}
