//! ProvisioningTask: one node's life from name to READY or rollback.

use std::sync::Arc;
use std::time::Duration;

use flotilla_core::{ConfigResult, FlotillaConfig, SlaveTemplate};
use flotilla_registry::{CredentialStore, Node, NodeRegistry, RegistryError, Secret};
use flotilla_runtime::{
    ArtifactSource, CommandRunner, InstanceId, InstanceLauncher, InstanceTerminator, LaunchError,
    LaunchRequest,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ProvisionError;
use crate::name::{next_stamp, node_name};
use crate::secret::connection_secret;

/// Everything a task needs besides its template and label. Shared by all
/// tasks of one cloud.
pub struct TaskContext {
    pub cloud: String,
    pub registry: Arc<dyn NodeRegistry>,
    pub artifacts: ArtifactSource,
    pub launcher: InstanceLauncher,
    pub terminator: InstanceTerminator,
    /// Key the per-node connection secrets are derived from.
    pub agent_secret: Secret,
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
}

impl TaskContext {
    pub fn from_config(
        config: &FlotillaConfig,
        registry: Arc<dyn NodeRegistry>,
        store: Arc<dyn CredentialStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> ConfigResult<Self> {
        let cloud = &config.cloud;
        Ok(Self {
            cloud: cloud.name.clone(),
            registry,
            artifacts: ArtifactSource::new(
                runner.clone(),
                store,
                &cloud.cli,
                cloud.server(),
                cloud.credentials_id.clone(),
                &cloud.name,
            ),
            launcher: InstanceLauncher::new(
                runner.clone(),
                &cloud.cli,
                cloud.label_key(),
                &cloud.callback_env,
                &cloud.callback_url,
            ),
            terminator: InstanceTerminator::new(runner, &cloud.cli),
            agent_secret: Secret::new(cloud.agent_secret.clone()),
            connect_timeout: config.provisioning.connect_timeout()?,
            poll_interval: config.provisioning.poll_interval()?,
        })
    }
}

/// Published progress of a task. The last four variants are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Naming,
    Launching { node: String },
    Waiting { node: String, instance: InstanceId },
    Ready { node: String, instance: InstanceId },
    TimedOut { node: String, waited: Duration },
    LaunchFailed { node: String, reason: String },
    Failed { node: String, reason: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Ready { .. }
                | TaskState::TimedOut { .. }
                | TaskState::LaunchFailed { .. }
                | TaskState::Failed { .. }
        )
    }

    pub fn node(&self) -> Option<&str> {
        match self {
            TaskState::Naming => None,
            TaskState::Launching { node }
            | TaskState::Waiting { node, .. }
            | TaskState::Ready { node, .. }
            | TaskState::TimedOut { node, .. }
            | TaskState::LaunchFailed { node, .. }
            | TaskState::Failed { node, .. } => Some(node),
        }
    }
}

/// A node that came online, linked to its running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedNode {
    pub name: String,
    pub instance: InstanceId,
    pub display_name: String,
    pub label: Option<String>,
}

enum WaitOutcome {
    Online,
    TimedOut,
    Vanished,
    Cancelled,
}

pub struct ProvisioningTask {
    ctx: Arc<TaskContext>,
    template: Arc<SlaveTemplate>,
    label: Option<String>,
    state: watch::Sender<TaskState>,
    shutdown: watch::Receiver<bool>,
}

impl ProvisioningTask {
    /// Create a task in the `Naming` state along with a receiver for its
    /// state changes.
    pub fn new(
        ctx: Arc<TaskContext>,
        template: Arc<SlaveTemplate>,
        label: Option<String>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<TaskState>) {
        let (state, state_rx) = watch::channel(TaskState::Naming);
        let task = Self {
            ctx,
            template,
            label,
            state,
            shutdown,
        };
        (task, state_rx)
    }

    /// Drive the task to a terminal state.
    pub async fn run(mut self) -> Result<ProvisionedNode, ProvisionError> {
        let started = Instant::now();
        let deadline = started + self.ctx.connect_timeout;

        let (name, secret) = match self.register().await {
            Ok(named) => named,
            Err(err) => {
                self.publish(TaskState::Failed {
                    node: String::new(),
                    reason: err.to_string(),
                });
                return Err(err.into());
            }
        };
        self.publish(TaskState::Launching { node: name.clone() });

        let instance = match self.launch(&name, &secret).await {
            Ok(instance) => instance,
            Err(err) => {
                warn!(node = %name, error = %err, status = ?err.status(), "launch failed");
                self.ctx.registry.deregister(&name).await;
                if let LaunchError::NonZeroExit { instance: Some(instance), .. } = &err {
                    self.terminate(&name, instance).await;
                }
                self.publish(TaskState::LaunchFailed {
                    node: name.clone(),
                    reason: err.to_string(),
                });
                return Err(ProvisionError::Launch { node: name, source: err });
            }
        };

        info!(node = %name, %instance, "instance launched, waiting for agent");
        self.publish(TaskState::Waiting {
            node: name.clone(),
            instance: instance.clone(),
        });

        match self.wait_online(&name, deadline).await {
            WaitOutcome::Online => {
                info!(node = %name, %instance, elapsed = ?started.elapsed(), "node online");
                self.publish(TaskState::Ready {
                    node: name.clone(),
                    instance: instance.clone(),
                });
                Ok(ProvisionedNode {
                    name,
                    instance,
                    display_name: self.template.display_name(&self.ctx.cloud),
                    label: self.label.clone(),
                })
            }
            WaitOutcome::TimedOut => {
                let waited = started.elapsed();
                warn!(node = %name, %instance, ?waited, "node did not come online in time");
                self.ctx.registry.deregister(&name).await;
                self.terminate(&name, &instance).await;
                self.publish(TaskState::TimedOut {
                    node: name.clone(),
                    waited,
                });
                Err(ProvisionError::Timeout { node: name, waited })
            }
            WaitOutcome::Vanished => {
                warn!(node = %name, %instance, "node removed while waiting");
                self.terminate(&name, &instance).await;
                let err = ProvisionError::Vanished { node: name.clone() };
                self.publish(TaskState::Failed {
                    node: name,
                    reason: err.to_string(),
                });
                Err(err)
            }
            WaitOutcome::Cancelled => {
                info!(node = %name, %instance, "provisioning cancelled");
                self.ctx.registry.deregister(&name).await;
                self.terminate(&name, &instance).await;
                let err = ProvisionError::Cancelled { node: name.clone() };
                self.publish(TaskState::Failed {
                    node: name,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn publish(&self, state: TaskState) {
        debug!(?state, "task state");
        self.state.send_replace(state);
    }

    /// Pick a free name and register the node under it.
    async fn register(&self) -> Result<(String, Secret), RegistryError> {
        loop {
            let name = node_name(self.label.as_deref(), next_stamp());
            if self.ctx.registry.exists(&name).await {
                debug!(node = %name, "name taken, regenerating");
                continue;
            }
            let secret = connection_secret(&self.ctx.agent_secret, &name);
            let node = Node {
                name: name.clone(),
                remote_root: self.template.remote_root().to_string(),
                label: self.label.clone(),
                cloud: self.ctx.cloud.clone(),
                connection_secret: secret.clone(),
            };
            match self.ctx.registry.register(node).await {
                Ok(()) => return Ok((name, secret)),
                Err(RegistryError::AlreadyRegistered(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Acquire config, run the launch command, release config.
    async fn launch(&self, name: &str, secret: &Secret) -> Result<InstanceId, LaunchError> {
        let artifact = self.ctx.artifacts.acquire().await?;
        let request = LaunchRequest {
            template: &self.template,
            config_path: artifact.path(),
            name,
            connection_secret: secret,
            label: self.label.as_deref(),
        };
        let result = self.ctx.launcher.launch(&request).await;

        if let Err(err) = artifact.release() {
            error!(node = %name, error = %err, "failed to delete config artifact");
        }

        result?.into_instance()
    }

    async fn wait_online(&mut self, name: &str, deadline: Instant) -> WaitOutcome {
        let registry = self.ctx.registry.clone();
        let poll = self.ctx.poll_interval;
        loop {
            if !registry.exists(name).await {
                return WaitOutcome::Vanished;
            }
            if registry.is_online(name).await {
                return WaitOutcome::Online;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline.min(now + poll)) => {}
                _ = shutdown_requested(&mut self.shutdown) => return WaitOutcome::Cancelled,
            }
        }
    }

    async fn terminate(&self, name: &str, instance: &InstanceId) {
        if let Err(err) = self.ctx.terminator.terminate(instance).await {
            error!(node = %name, %instance, error = %err, "failed to terminate instance");
        }
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use flotilla_core::InstanceSize;
    use flotilla_registry::{ConfigCredentialStore, InMemoryRegistry, NodeStatus};
    use flotilla_runtime::{CommandOutput, ScriptedRunner};

    use super::*;

    fn context(runner: Arc<ScriptedRunner>, registry: InMemoryRegistry) -> Arc<TaskContext> {
        let store: Arc<dyn CredentialStore> = Arc::new(ConfigCredentialStore::new(BTreeMap::new()));
        Arc::new(TaskContext {
            cloud: "hyper".into(),
            registry: Arc::new(registry),
            artifacts: ArtifactSource::new(runner.clone(), store, "hyper", "tcp://x:443", None, "hyper"),
            launcher: InstanceLauncher::new(runner.clone(), "hyper", "io.flotilla.hyper", "FLOTILLA_URL", "http://ci/"),
            terminator: InstanceTerminator::new(runner, "hyper"),
            agent_secret: Secret::new("k"),
            connect_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        })
    }

    fn template() -> Arc<SlaveTemplate> {
        Arc::new(SlaveTemplate::new("linux", "agent:latest", InstanceSize::S2, "/agent"))
    }

    fn launching(stdout: &'static str) -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(move |inv| {
            if inv.has_arg("run") {
                Ok(CommandOutput::success(stdout))
            } else {
                Ok(CommandOutput::success(""))
            }
        }))
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Naming.is_terminal());
        assert!(!TaskState::Launching { node: "n".into() }.is_terminal());
        assert!(
            TaskState::TimedOut {
                node: "n".into(),
                waited: Duration::from_secs(1)
            }
            .is_terminal()
        );
        assert_eq!(TaskState::Naming.node(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn online_agent_makes_task_ready() {
        let registry = InMemoryRegistry::new();
        let runner = launching("abc123\n");
        let (_stop, shutdown) = watch::channel(false);
        let (task, mut state) =
            ProvisioningTask::new(context(runner, registry.clone()), template(), Some("linux".into()), shutdown);
        let handle = tokio::spawn(task.run());

        state.wait_for(|s| matches!(s, TaskState::Waiting { .. })).await.unwrap();
        let node = state.borrow().node().unwrap().to_string();
        registry.set_status(&node, NodeStatus::Online).await.unwrap();

        let ready = handle.await.unwrap().unwrap();
        assert_eq!(ready.name, node);
        assert_eq!(ready.instance.as_str(), "abc123");
        assert_eq!(ready.display_name, "hyper node linux");
        assert!(matches!(&*state.borrow(), TaskState::Ready { .. }));
        assert!(registry.exists(&node).await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_and_tears_down() {
        let registry = InMemoryRegistry::new();
        let runner = launching("abc123");
        let (stop, shutdown) = watch::channel(false);
        let (task, mut state) =
            ProvisioningTask::new(context(runner.clone(), registry.clone()), template(), None, shutdown);
        let handle = tokio::spawn(task.run());

        state.wait_for(|s| matches!(s, TaskState::Waiting { .. })).await.unwrap();
        stop.send_replace(true);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled { .. }));
        assert!(registry.list().await.is_empty());
        assert_eq!(runner.calls_with("rm").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn node_name_carries_sanitized_label() {
        let registry = InMemoryRegistry::new();
        let runner = launching("abc123");
        let (_stop, shutdown) = watch::channel(false);
        let (task, mut state) = ProvisioningTask::new(
            context(runner.clone(), registry.clone()),
            template(),
            Some("linux && docker".into()),
            shutdown,
        );
        let handle = tokio::spawn(task.run());

        state.wait_for(|s| matches!(s, TaskState::Waiting { .. })).await.unwrap();
        let node = state.borrow().node().unwrap().to_string();
        assert!(node.starts_with("linux-docker-"));

        let launch = &runner.calls_with("run")[0];
        assert_eq!(launch.args.last().map(String::as_str), Some(node.as_str()));
        assert_eq!(launch.arg_after("--label"), Some("io.flotilla.hyper=linux && docker"));

        registry.set_status(&node, NodeStatus::Online).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}
