//! Instance terminator.

use std::sync::Arc;

use tracing::{info, warn};

use crate::command::{CommandRunner, Invocation};
use crate::error::TerminateError;
use crate::launcher::InstanceId;

/// Destroys backing instances with `<cli> rm -v -f <instance>`.
#[derive(Clone)]
pub struct InstanceTerminator {
    runner: Arc<dyn CommandRunner>,
    cli: String,
}

impl InstanceTerminator {
    pub fn new(runner: Arc<dyn CommandRunner>, cli: impl Into<String>) -> Self {
        Self {
            runner,
            cli: cli.into(),
        }
    }

    pub fn invocation(&self, instance: &InstanceId) -> Invocation {
        Invocation::new(&self.cli)
            .args(["rm", "-v", "-f"])
            .arg(instance.as_str())
    }

    /// Issue the removal once. The instance is considered gone from the
    /// caller's point of view even when this fails.
    pub async fn terminate(&self, instance: &InstanceId) -> Result<(), TerminateError> {
        let output = self
            .runner
            .run(&self.invocation(instance))
            .await
            .map_err(|source| TerminateError::Spawn {
                instance: instance.clone(),
                source,
            })?;

        if !output.is_success() {
            warn!(
                %instance,
                status = ?output.status,
                stderr = %output.stderr.trim(),
                "terminate command failed"
            );
            return Err(TerminateError::NonZeroExit {
                instance: instance.clone(),
                status: output.status,
                stderr: output.stderr,
            });
        }

        info!(%instance, "instance removed");
        Ok(())
    }
}
