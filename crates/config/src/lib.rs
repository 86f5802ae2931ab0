//! Hub server configuration loading and env substitution (§10.3.1).
//!
//! Config files: `agentim.toml`, `agentim.yaml`, or `agentim.json`.
//! Searched in `./` then `~/.config/agentim/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.
//!
//! This is distinct from [`gateway_state`], which owns the gateway's own
//! persisted `~/.agentim/` layout (§6, §10.3.2) — a narrower, explicitly
//! versioned artifact that is never discovered through the search above.

pub mod env_subst;
pub mod gateway_state;
pub mod loader;
pub mod schema;

pub use loader::{config_dir, discover_and_load, find_or_default_config_path, save_config};
pub use schema::HubConfig;
