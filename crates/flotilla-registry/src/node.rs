//! Registered nodes.

use serde::Serialize;

use crate::credentials::Secret;

/// Agent connection state as seen by the host orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Registered, backing instance launching or agent not yet connected.
    Connecting,
    Online,
    /// Agent disconnected after having been online.
    Offline,
}

/// A logical execution agent, backed by one instance.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub remote_root: String,
    pub label: Option<String>,
    /// Name of the cloud that provisioned this node.
    pub cloud: String,
    /// Secret the agent presents when it calls back.
    pub connection_secret: Secret,
}

/// Serializable snapshot of a registered node, without its secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub name: String,
    pub remote_root: String,
    pub label: Option<String>,
    pub cloud: String,
    pub status: NodeStatus,
}

impl NodeView {
    pub fn new(node: &Node, status: NodeStatus) -> Self {
        Self {
            name: node.name.clone(),
            remote_root: node.remote_root.clone(),
            label: node.label.clone(),
            cloud: node.cloud.clone(),
            status,
        }
    }
}
