//! The Gateway Session Manager (§4.5): the client side of the gateway
//! protocol running on an operator's machine — reconnect with backoff,
//! one-shot token refresh, a monotonic connectionId guard against stale
//! async callbacks, ephemeral-gateway lifecycle, and bounded-deadline
//! signal-triggered shutdown.

pub mod agent_manager;
pub mod backoff;
pub mod error;
pub mod session;
pub mod shutdown;
pub mod token;

pub use agent_manager::AgentManager;
pub use error::SessionError;
pub use session::{GatewaySession, GatewaySessionConfig};
pub use token::TokenProvider;
