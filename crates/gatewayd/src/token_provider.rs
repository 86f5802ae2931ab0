//! [`TokenProvider`] wired over `agentim-vault` (at-rest decrypt) and a
//! `reqwest` call to the hub's token-refresh endpoint (§6).
//!
//! Holds the current access token in memory and persists a refreshed pair
//! back to `~/.agentim/config.json`, re-encrypted, so a later `start` picks
//! up the latest tokens even across restarts.

use std::sync::Arc;

use agentim_config::gateway_state::{self, GatewayConfig};
use agentim_gateway_session::TokenProvider;
use agentim_vault::TokenCipher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub struct GatewayTokenProvider {
    http: reqwest::Client,
    cipher: TokenCipher,
    server_url: String,
    server_base_url: String,
    gateway_id: String,
    access_token: RwLock<String>,
    refresh_token: RwLock<Option<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    gateway_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl GatewayTokenProvider {
    pub fn new(config: &GatewayConfig, cipher: TokenCipher) -> Result<Arc<Self>, anyhow::Error> {
        let access_token = cipher.decrypt(&config.token)?;
        let refresh_token = config.refresh_token.as_deref().map(|t| cipher.decrypt(t)).transpose()?;

        Ok(Arc::new(Self {
            http: reqwest::Client::new(),
            cipher,
            server_url: config.server_url.clone(),
            server_base_url: config.server_base_url.clone(),
            gateway_id: config.gateway_id.clone(),
            access_token: RwLock::new(access_token),
            refresh_token: RwLock::new(refresh_token),
        }))
    }

    async fn persist(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), anyhow::Error> {
        let config = GatewayConfig {
            version: gateway_state::CURRENT_VERSION,
            server_url: self.server_url.clone(),
            server_base_url: self.server_base_url.clone(),
            token: self.cipher.encrypt(access_token)?,
            refresh_token: refresh_token.map(|t| self.cipher.encrypt(t)).transpose()?,
            gateway_id: self.gateway_id.clone(),
        };
        gateway_state::save_gateway_config(&config)?;
        Ok(())
    }
}

#[async_trait]
impl TokenProvider for GatewayTokenProvider {
    async fn access_token(&self) -> String {
        self.access_token.read().await.clone()
    }

    async fn refresh(&self) -> Result<(), String> {
        let Some(refresh_token) = self.refresh_token.read().await.clone() else {
            return Err("no refresh token configured".into());
        };

        let response = self
            .http
            .post(format!("{}/api/auth/refresh", self.server_base_url))
            .json(&RefreshRequest { refresh_token: &refresh_token, gateway_id: &self.gateway_id })
            .send()
            .await
            .map_err(|e| format!("refresh request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("refresh rejected by hub: HTTP {}", response.status()));
        }

        let body: RefreshResponse = response.json().await.map_err(|e| format!("malformed refresh response: {e}"))?;

        *self.access_token.write().await = body.access_token.clone();
        let next_refresh = body.refresh_token.clone().or(Some(refresh_token));
        if let Some(next) = &next_refresh {
            *self.refresh_token.write().await = Some(next.clone());
        }

        self.persist(&body.access_token, next_refresh.as_deref()).await.map_err(|e| format!("failed to persist refreshed tokens: {e}"))?;

        Ok(())
    }

    fn has_refresh_token(&self) -> bool {
        // `try_read` is sufficient: the only writer is `refresh`, which never
        // runs concurrently with the reconnect loop that calls this.
        self.refresh_token.try_read().map(|g| g.is_some()).unwrap_or(true)
    }
}
