//! Provisioning error types.

use std::time::Duration;

use flotilla_core::{ConfigError, LabelError};
use flotilla_registry::RegistryError;
use flotilla_runtime::{LaunchError, TerminateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no template satisfies label {}", .0.as_deref().unwrap_or("<any>"))]
    Unsatisfiable(Option<String>),

    #[error("failed to launch node {node}: {source}")]
    Launch {
        node: String,
        #[source]
        source: LaunchError,
    },

    #[error("node {node} did not come online within {waited:?}")]
    Timeout { node: String, waited: Duration },

    #[error("node {node} was removed from the registry while waiting for it")]
    Vanished { node: String },

    #[error("provisioning of node {node} was cancelled")]
    Cancelled { node: String },

    #[error("provisioning task aborted: {0}")]
    Aborted(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("invalid label expression: {0}")]
    Label(#[from] LabelError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Terminate(#[from] TerminateError),
}

impl ProvisionError {
    /// Name of the node the fault belongs to, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            ProvisionError::Launch { node, .. }
            | ProvisionError::Timeout { node, .. }
            | ProvisionError::Vanished { node }
            | ProvisionError::Cancelled { node } => Some(node),
            ProvisionError::UnknownNode(node) => Some(node),
            _ => None,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
