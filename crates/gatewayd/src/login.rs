//! `agentim-gatewayd login` (§6): exchanges operator credentials for an
//! access/refresh token pair and persists them under `~/.agentim/`.

use agentim_config::gateway_state::{self, GatewayConfig};
use agentim_vault::TokenCipher;
use clap::Args;
use serde::{Deserialize, Serialize};

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Hub base URL, e.g. `https://hub.example.com`.
    #[arg(long)]
    server: String,

    #[arg(long)]
    username: String,

    #[arg(long)]
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    gateway_id: String,
}

pub async fn run(args: LoginArgs) -> anyhow::Result<()> {
    let server_base_url = args.server.trim_end_matches('/').to_string();

    let http = reqwest::Client::new();
    let response = http
        .post(format!("{server_base_url}/api/auth/login"))
        .json(&LoginRequest { username: &args.username, password: &args.password })
        .send()
        .await?;

    if !response.status().is_success() {
        anyhow::bail!("login rejected by hub: HTTP {}", response.status());
    }
    let body: LoginResponse = response.json().await?;

    let cipher = TokenCipher::for_machine()?;
    let config = GatewayConfig {
        version: gateway_state::CURRENT_VERSION,
        server_url: to_ws_url(&server_base_url),
        server_base_url,
        token: cipher.encrypt(&body.access_token)?,
        refresh_token: Some(cipher.encrypt(&body.refresh_token)?),
        gateway_id: body.gateway_id,
    };
    gateway_state::save_gateway_config(&config)?;

    println!("logged in as {} — gateway id {}", args.username, config.gateway_id);
    Ok(())
}

/// `https://host` → `wss://host/ws/gateway`, `http://host` → `ws://host/ws/gateway`.
fn to_ws_url(base: &str) -> String {
    let ws_base = base.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1);
    format!("{ws_base}/ws/gateway")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_https_to_wss() {
        assert_eq!(to_ws_url("https://hub.example.com"), "wss://hub.example.com/ws/gateway");
    }

    #[test]
    fn converts_http_to_ws() {
        assert_eq!(to_ws_url("http://localhost:8787"), "ws://localhost:8787/ws/gateway");
    }
}
