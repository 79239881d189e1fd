//! CloudProvisioner, the entry point demand comes in through.

use std::collections::HashMap;
use std::sync::Arc;

use flotilla_core::{FlotillaConfig, LabelError, LabelMatcher, SlaveTemplate};
use flotilla_registry::{CredentialStore, NodeRegistry};
use flotilla_runtime::CommandRunner;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::secret::verify_connection_secret;
use crate::task::{ProvisionedNode, ProvisioningTask, TaskContext, TaskState};

/// Capacity promised to the caller for one requested unit.
pub struct PendingUnit {
    pub display_name: String,
    /// Executors this unit contributes once online. Always 1.
    pub capacity: u32,
    pub handle: JoinHandle<Result<ProvisionedNode, ProvisionError>>,
    pub state: watch::Receiver<TaskState>,
}

impl PendingUnit {
    /// Latest published state.
    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    /// Wait for the task to finish.
    pub async fn join(self) -> Result<ProvisionedNode, ProvisionError> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(ProvisionError::Aborted(err.to_string())),
        }
    }
}

pub struct CloudProvisioner {
    /// Templates in selection order.
    templates: Vec<Arc<SlaveTemplate>>,
    matcher: Arc<dyn LabelMatcher>,
    ctx: Arc<TaskContext>,
    shutdown: watch::Receiver<bool>,
    /// Nodes that reached READY and have not been retired.
    ready: Arc<RwLock<HashMap<String, ProvisionedNode>>>,
    max_units_per_request: u32,
}

/// Request limit used when the provisioner is not built from config.
pub const DEFAULT_MAX_UNITS_PER_REQUEST: u32 = 100;

/// `None` for an absent or blank label, the trimmed expression otherwise.
fn normalize_label(label: Option<&str>) -> Option<&str> {
    label.map(str::trim).filter(|l| !l.is_empty())
}

impl CloudProvisioner {
    pub fn new(
        templates: Vec<SlaveTemplate>,
        matcher: Arc<dyn LabelMatcher>,
        ctx: Arc<TaskContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            templates: templates.into_iter().map(Arc::new).collect(),
            matcher,
            ctx,
            shutdown,
            ready: Arc::new(RwLock::new(HashMap::new())),
            max_units_per_request: DEFAULT_MAX_UNITS_PER_REQUEST,
        }
    }

    pub fn with_max_units_per_request(mut self, max: u32) -> Self {
        self.max_units_per_request = max;
        self
    }

    /// Build a provisioner for the cloud described by `config`.
    pub fn from_config(
        config: &FlotillaConfig,
        matcher: Arc<dyn LabelMatcher>,
        registry: Arc<dyn NodeRegistry>,
        store: Arc<dyn CredentialStore>,
        runner: Arc<dyn CommandRunner>,
        shutdown: watch::Receiver<bool>,
    ) -> ProvisionResult<Self> {
        config.validate()?;
        let ctx = TaskContext::from_config(config, registry, store, runner)?;
        info!(
            cloud = %ctx.cloud,
            templates = config.templates.len(),
            timeout = ?ctx.connect_timeout,
            "provisioner ready"
        );
        Ok(Self::new(config.templates.clone(), matcher, Arc::new(ctx), shutdown)
            .with_max_units_per_request(config.provisioning.max_units_per_request))
    }

    pub fn cloud_name(&self) -> &str {
        &self.ctx.cloud
    }

    pub fn templates(&self) -> &[Arc<SlaveTemplate>] {
        &self.templates
    }

    pub fn registry(&self) -> &Arc<dyn NodeRegistry> {
        &self.ctx.registry
    }

    /// Largest `units` one request may ask for.
    pub fn max_units_per_request(&self) -> u32 {
        self.max_units_per_request
    }

    /// First template whose labels satisfy `label`. An absent or blank
    /// label matches every template.
    pub fn template_for(&self, label: Option<&str>) -> Result<Option<&Arc<SlaveTemplate>>, LabelError> {
        let Some(expression) = normalize_label(label) else {
            return Ok(self.templates.first());
        };
        for template in &self.templates {
            if self.matcher.matches(expression, &template.label_set())? {
                return Ok(Some(template));
            }
        }
        Ok(None)
    }

    pub fn can_provision(&self, label: Option<&str>) -> bool {
        match self.template_for(label) {
            Ok(found) => found.is_some(),
            Err(err) => {
                warn!(label = ?label, error = %err, "cannot evaluate label expression");
                false
            }
        }
    }

    /// Start `units` provisioning tasks for `label`. Never fails: an
    /// unsatisfiable or malformed label is logged and yields no units.
    pub fn provision(&self, label: Option<&str>, units: u32) -> Vec<PendingUnit> {
        let label = normalize_label(label);
        let template = match self.template_for(label) {
            Ok(Some(template)) => template.clone(),
            Ok(None) => {
                let err = ProvisionError::Unsatisfiable(label.map(str::to_string));
                warn!(error = %err, "provision request dropped");
                return Vec::new();
            }
            Err(err) => {
                warn!(label = ?label, error = %err, "provision request dropped");
                return Vec::new();
            }
        };

        let display_name = template.display_name(&self.ctx.cloud);
        info!(label = ?label, units, template = %display_name, "provisioning");

        let label = label.map(str::to_string);
        (0..units)
            .map(|_| {
                let (task, state) = ProvisioningTask::new(
                    self.ctx.clone(),
                    template.clone(),
                    label.clone(),
                    self.shutdown.clone(),
                );
                let ready = self.ready.clone();
                let handle = tokio::spawn(async move {
                    let result = task.run().await;
                    if let Ok(node) = &result {
                        ready.write().await.insert(node.name.clone(), node.clone());
                    }
                    result
                });
                PendingUnit {
                    display_name: display_name.clone(),
                    capacity: 1,
                    handle,
                    state,
                }
            })
            .collect()
    }

    /// Nodes currently linked to a running instance.
    pub async fn provisioned(&self) -> Vec<ProvisionedNode> {
        let mut nodes: Vec<_> = self.ready.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    /// Deregister a READY node and remove its instance. The node counts as
    /// gone even when the terminate command fails.
    pub async fn retire(&self, node: &ProvisionedNode) -> ProvisionResult<()> {
        self.ready.write().await.remove(&node.name);
        self.ctx.registry.deregister(&node.name).await;
        info!(node = %node.name, instance = %node.instance, "retiring node");
        self.ctx.terminator.terminate(&node.instance).await?;
        Ok(())
    }

    /// Retire a READY node by name.
    pub async fn retire_by_name(&self, name: &str) -> ProvisionResult<ProvisionedNode> {
        let node = self
            .ready
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ProvisionError::UnknownNode(name.to_string()))?;
        self.retire(&node).await?;
        Ok(node)
    }

    /// Check the secret an agent presents for `name`.
    pub async fn verify_agent(&self, name: &str, presented: &str) -> bool {
        let Some(node) = self.ctx.registry.get(name).await else {
            debug!(node = %name, "agent callback for unknown node");
            return false;
        };
        verify_connection_secret(&node.connection_secret, presented)
    }
}
