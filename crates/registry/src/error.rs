//! Connection Registry failure taxonomy (§4.3).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection already registered")]
    AlreadyRegistered,

    #[error("connection id already holds the other role")]
    ConnIdRoleConflict,

    #[error("too many connections for this user")]
    TooManyConnections,

    #[error("connection not found")]
    NotFound,
}
