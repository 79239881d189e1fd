//! Runtime CLI error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::launcher::InstanceId;

/// Failure to produce a config artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create config directory: {0}")]
    TempDir(#[source] io::Error),

    #[error("failed to run config command: {0}")]
    Spawn(#[source] io::Error),

    #[error("config command failed (status {status:?}): {stderr}")]
    Write { status: Option<i32>, stderr: String },
}

/// Failure to remove a config artifact's directory.
#[derive(Debug, Error)]
#[error("failed to delete config directory {path}: {source}")]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Failure of a launch attempt.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("failed to run launch command: {0}")]
    Spawn(#[source] io::Error),

    #[error("launch command failed (status {status:?}): {stderr}")]
    NonZeroExit {
        status: Option<i32>,
        stderr: String,
        /// Identifier printed before the failure, if any.
        instance: Option<InstanceId>,
    },

    #[error("launch command printed no instance id")]
    EmptyInstanceId,
}

impl LaunchError {
    /// Exit status of the launch command, when it ran to completion.
    pub fn status(&self) -> Option<i32> {
        match self {
            LaunchError::NonZeroExit { status, .. } => *status,
            _ => None,
        }
    }
}

/// Failure to remove a backing instance.
#[derive(Debug, Error)]
pub enum TerminateError {
    #[error("failed to run terminate command for {instance}: {source}")]
    Spawn {
        instance: InstanceId,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove instance {instance} (status {status:?}): {stderr}")]
    NonZeroExit {
        instance: InstanceId,
        status: Option<i32>,
        stderr: String,
    },
}
