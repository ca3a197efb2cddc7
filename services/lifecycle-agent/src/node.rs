//! Node controller interface and the cluster-backed implementation.
//!
//! A [`Node`] correlates a compute instance with its cluster member. Nodes
//! are resolved fresh for every event and never cached, so a redelivered
//! event always sees the current inventory.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::command::CommandError;
use crate::inventory::Ec2Inventory;
use crate::cluster::KubeCluster;

/// How a cluster node name is derived from an instance's private DNS name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostnameStyle {
    /// Use the full DNS name (`ip-10-0-0-1.ec2.internal`).
    #[default]
    Full,
    /// Use only the first label (`ip-10-0-0-1`).
    Short,
}

impl HostnameStyle {
    pub fn node_name(&self, dns_name: &str) -> String {
        let dns_name = dns_name.trim().trim_end_matches('.');
        match self {
            HostnameStyle::Full => dns_name.to_string(),
            HostnameStyle::Short => dns_name.split('.').next().unwrap_or_default().to_string(),
        }
    }
}

/// Lifecycle state of the instance behind a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The instance exists and may still run workloads.
    Active,
    /// The instance is gone; there is nothing left to drain.
    Terminated,
    Unknown,
}

impl NodeState {
    /// Map a compute instance state name onto a node state.
    pub fn from_instance_state(name: &str) -> Self {
        match name {
            "terminated" => NodeState::Terminated,
            "pending" | "running" | "shutting-down" | "stopping" | "stopped" => NodeState::Active,
            _ => NodeState::Unknown,
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Active => write!(f, "active"),
            NodeState::Terminated => write!(f, "terminated"),
            NodeState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Handle to the cluster node backing a compute instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub instance_id: String,
    /// Cluster member name.
    pub name: String,
}

/// Errors from node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("instance {0} not found")]
    InstanceNotFound(String),

    #[error("instance {0} has no private DNS name")]
    NoHostname(String),

    #[error("unusable inventory response: {0}")]
    Response(String),

    #[error("failed to drain node {node}: {message}")]
    Drain { node: String, message: String },

    #[error("failed to delete node {node}: {message}")]
    Delete { node: String, message: String },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Resolves instances to cluster nodes and evacuates/removes them.
///
/// Every operation must be safe to repeat: the same event can be handled
/// more than once after a partial failure.
#[async_trait]
pub trait NodeController: Send + Sync {
    /// Resolve a compute instance to its cluster node.
    async fn resolve(&self, instance_id: &str, style: HostnameStyle) -> Result<Node, NodeError>;

    /// Current state of the instance behind `node`.
    async fn state(&self, node: &Node) -> Result<NodeState, NodeError>;

    /// Evict all workloads from the node.
    async fn evacuate(&self, node: &Node) -> Result<(), NodeError>;

    /// Remove the node from cluster membership.
    async fn remove(&self, node: &Node) -> Result<(), NodeError>;
}

/// Node controller combining the compute inventory with the cluster API.
pub struct ClusterNodeController {
    inventory: Ec2Inventory,
    cluster: KubeCluster,
}

impl ClusterNodeController {
    pub fn new(inventory: Ec2Inventory, cluster: KubeCluster) -> Self {
        Self { inventory, cluster }
    }
}

#[async_trait]
impl NodeController for ClusterNodeController {
    async fn resolve(&self, instance_id: &str, style: HostnameStyle) -> Result<Node, NodeError> {
        let instance = self.inventory.describe(instance_id).await?;

        let dns_name = instance
            .private_dns_name
            .as_deref()
            .map(|n| style.node_name(n))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| NodeError::NoHostname(instance_id.to_string()))?;

        debug!(
            instance_id,
            node = %dns_name,
            state = %instance.state_name,
            "Resolved node"
        );

        Ok(Node {
            instance_id: instance_id.to_string(),
            name: dns_name,
        })
    }

    async fn state(&self, node: &Node) -> Result<NodeState, NodeError> {
        match self.inventory.describe(&node.instance_id).await {
            Ok(instance) => Ok(NodeState::from_instance_state(&instance.state_name)),
            // Instances drop out of the inventory some time after termination.
            Err(NodeError::InstanceNotFound(_)) => Ok(NodeState::Terminated),
            Err(e) => Err(e),
        }
    }

    async fn evacuate(&self, node: &Node) -> Result<(), NodeError> {
        info!(instance_id = %node.instance_id, node = %node.name, "Draining node");
        self.cluster.drain(&node.name).await
    }

    async fn remove(&self, node: &Node) -> Result<(), NodeError> {
        info!(instance_id = %node.instance_id, node = %node.name, "Deleting node");
        self.cluster.delete(&node.name).await
    }
}
