//! Node registry error types.

use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("node already registered: {0}")]
    AlreadyRegistered(String),

    #[error("node not found: {0}")]
    NotFound(String),
}
