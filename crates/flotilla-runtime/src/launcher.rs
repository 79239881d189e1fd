//! Instance launcher. Builds and runs the `run -d` command for a template.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use flotilla_core::SlaveTemplate;
use flotilla_registry::Secret;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::{CommandRunner, Invocation};
use crate::error::LaunchError;

/// Identifier of a backing instance, as printed by the runtime CLI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Returns `None` for blank identifiers.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inputs for one launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub template: &'a SlaveTemplate,
    /// Config directory or file handed to `--config`.
    pub config_path: &'a Path,
    pub name: &'a str,
    pub connection_secret: &'a Secret,
    pub label: Option<&'a str>,
}

/// What the launch command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl LaunchOutput {
    /// The instance id: the last non-empty line of stdout, trimmed.
    pub fn instance_id(&self) -> Option<InstanceId> {
        self.stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(InstanceId::new)
    }

    /// Check the exit status and extract the instance id.
    pub fn into_instance(self) -> Result<InstanceId, LaunchError> {
        if self.status != Some(0) {
            let instance = self.instance_id();
            return Err(LaunchError::NonZeroExit {
                status: self.status,
                stderr: self.stderr,
                instance,
            });
        }
        self.instance_id().ok_or(LaunchError::EmptyInstanceId)
    }
}

/// Creates backing instances through the runtime CLI.
#[derive(Clone)]
pub struct InstanceLauncher {
    runner: Arc<dyn CommandRunner>,
    cli: String,
    /// `--label <label_key>=<label>` ties the instance to its cloud.
    label_key: String,
    callback_env: String,
    callback_url: String,
}

impl InstanceLauncher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cli: impl Into<String>,
        label_key: impl Into<String>,
        callback_env: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            cli: cli.into(),
            label_key: label_key.into(),
            callback_env: callback_env.into(),
            callback_url: callback_url.into(),
        }
    }

    /// The exact command a launch would run.
    pub fn invocation(&self, req: &LaunchRequest<'_>) -> Invocation {
        Invocation::new(&self.cli)
            .arg("--config")
            .arg(req.config_path.to_string_lossy())
            .args(["run", "-d"])
            .arg("--workdir")
            .arg(req.template.remote_root())
            .arg("--label")
            .arg(format!("{}={}", self.label_key, req.label.unwrap_or_default()))
            .arg("-e")
            .arg(format!("{}={}", self.callback_env, self.callback_url))
            .arg("--size")
            .arg(req.template.size().as_str())
            .arg(req.template.image())
            .arg(req.connection_secret.expose())
            .arg(req.name)
    }

    /// Run the launch command once. Only a failure to start the process is
    /// an `Err` here; exit status is judged by [`LaunchOutput::into_instance`].
    pub async fn launch(&self, req: &LaunchRequest<'_>) -> Result<LaunchOutput, LaunchError> {
        let invocation = self.invocation(req);
        debug!(
            node = %req.name,
            image = %req.template.image(),
            size = %req.template.size(),
            config = ?req.config_path,
            "launching instance"
        );

        let output = self
            .runner
            .run(&invocation)
            .await
            .map_err(LaunchError::Spawn)?;

        if output.is_success() {
            info!(node = %req.name, stdout = %output.stdout.trim(), "launch command succeeded");
        } else {
            warn!(
                node = %req.name,
                status = ?output.status,
                stderr = %output.stderr.trim(),
                "launch command failed"
            );
        }

        Ok(LaunchOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
