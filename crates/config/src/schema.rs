use serde::{Deserialize, Serialize};

/// Hub server settings (§2, §6). Discovered via [`crate::discover_and_load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub bind: String,
    pub port: u16,
    pub max_client_connections_per_user: u32,
    pub max_gateway_connections_per_user: u32,
    pub max_connections_global: u32,
    pub access_token_ttl_secs: u64,
    pub token_secret_current: String,
    pub token_secret_previous: Option<String>,
    pub shared_revocation_store_url: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8787,
            max_client_connections_per_user: 10,
            max_gateway_connections_per_user: 5,
            max_connections_global: 10_000,
            access_token_ttl_secs: 900,
            token_secret_current: String::new(),
            token_secret_previous: None,
            shared_revocation_store_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_sane_caps() {
        let cfg = HubConfig::default();
        assert!(cfg.max_client_connections_per_user > 0);
        assert!(cfg.max_gateway_connections_per_user > 0);
        assert!(cfg.max_connections_global >= u32::from(cfg.max_client_connections_per_user));
    }
}
