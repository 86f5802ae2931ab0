//! The token surface a [`crate::session::GatewaySession`] needs: a current
//! access token plus a single refresh attempt per connection (§4.5 step 3).
//! `agentim-gatewayd` implements this over `agentim-vault` (decrypt at rest)
//! and a `reqwest` call to the hub's token-refresh endpoint.

use async_trait::async_trait;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The current access token to present in `gateway:auth`.
    async fn access_token(&self) -> String;

    /// Exchanges the configured refresh token for a new access token and
    /// persists it. Called at most once per connection attempt.
    async fn refresh(&self) -> Result<(), String>;

    /// Whether a refresh token is configured at all — if not, an auth
    /// failure is permanent (§4.5 step 3).
    fn has_refresh_token(&self) -> bool;
}
