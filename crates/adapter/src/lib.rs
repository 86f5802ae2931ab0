//! The Agent Adapter Runtime (§4.6): a uniform `AgentAdapter` contract over
//! two different underlying agent shapes — a spawned CLI child process
//! (`spawn`) and an in-process thread-resumable SDK (`sdk_codex`) — plus
//! the shared environment-scrubbing and stderr-redaction policy both
//! implementations must apply before a byte leaves the child's process
//! boundary.

pub mod error;
pub mod redaction;
pub mod safe_env;
pub mod sdk_codex;
pub mod spawn;
pub mod traits;

pub use error::AdapterError;
pub use sdk_codex::{ApprovalPolicy, CodexAdapter, CodexSession, PermissionLevel, SdkEvent};
pub use spawn::{SpawnAdapter, SpawnAdapterConfig};
pub use traits::{AdapterEvent, AdapterEvents, AgentAdapter, TurnContext};
