//! Node registry: the host orchestrator's view of registered nodes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::node::{Node, NodeStatus, NodeView};

/// Registry of nodes owned by the host orchestrator.
///
/// Implementations must tolerate concurrent calls from many provisioning
/// tasks at once.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Add a node in the `Connecting` state.
    async fn register(&self, node: Node) -> RegistryResult<()>;

    /// Remove a node. Returns the node if it was registered.
    async fn deregister(&self, name: &str) -> Option<Node>;

    async fn exists(&self, name: &str) -> bool;

    /// Whether the node's agent is currently connected.
    async fn is_online(&self, name: &str) -> bool;

    async fn get(&self, name: &str) -> Option<Node>;

    async fn list(&self) -> Vec<NodeView>;

    async fn set_status(&self, name: &str, status: NodeStatus) -> RegistryResult<()>;
}

struct Entry {
    node: Node,
    status: NodeStatus,
}

/// Process-local registry. `Clone` shares the same underlying map.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    nodes: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeRegistry for InMemoryRegistry {
    async fn register(&self, node: Node) -> RegistryResult<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.name) {
            return Err(RegistryError::AlreadyRegistered(node.name));
        }
        info!(node = %node.name, label = ?node.label, cloud = %node.cloud, "node registered");
        nodes.insert(
            node.name.clone(),
            Entry {
                node,
                status: NodeStatus::Connecting,
            },
        );
        Ok(())
    }

    async fn deregister(&self, name: &str) -> Option<Node> {
        let removed = self.nodes.write().await.remove(name);
        if removed.is_some() {
            info!(node = %name, "node deregistered");
        }
        removed.map(|entry| entry.node)
    }

    async fn exists(&self, name: &str) -> bool {
        self.nodes.read().await.contains_key(name)
    }

    async fn is_online(&self, name: &str) -> bool {
        self.nodes
            .read()
            .await
            .get(name)
            .is_some_and(|entry| entry.status == NodeStatus::Online)
    }

    async fn get(&self, name: &str) -> Option<Node> {
        self.nodes.read().await.get(name).map(|entry| entry.node.clone())
    }

    async fn list(&self) -> Vec<NodeView> {
        let nodes = self.nodes.read().await;
        let mut views: Vec<NodeView> = nodes
            .values()
            .map(|entry| NodeView::new(&entry.node, entry.status))
            .collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views
    }

    async fn set_status(&self, name: &str, status: NodeStatus) -> RegistryResult<()> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        debug!(node = %name, from = ?entry.status, to = ?status, "node status changed");
        entry.status = status;
        Ok(())
    }
}
