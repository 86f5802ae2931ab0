//! Adapter-local failure taxonomy (§4.6, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("already processing")]
    AlreadyProcessing,

    #[error("command not found: {0} (check PATH)")]
    CommandNotFound(String),

    #[error("{label} exited with code {code}")]
    NonZeroExit { label: String, code: i32 },

    #[error("killed by signal")]
    KilledBySignal,

    #[error("Process exceeded idle timeout ({0} minutes)")]
    IdleTimeout(u64),

    #[error("Process exceeded absolute timeout ({0} minutes)")]
    AbsoluteTimeout(u64),

    #[error("output exceeded the maximum buffer size")]
    OutputTooLarge,

    #[error("failed to spawn child process: {0}")]
    Spawn(String),

    #[error("{0}")]
    Other(String),
}
