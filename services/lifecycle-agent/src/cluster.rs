//! Cluster membership operations through the Kubernetes API.
//!
//! Draining follows the usual eviction flow: cordon the node, then evict
//! every pod bound to it until none are left. Pods owned by a DaemonSet,
//! static mirror pods and pods that already finished are left alone, since
//! deleting the node removes them anyway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node as KubeNode, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use kube::Client;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::node::NodeError;

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Interval between eviction passes while pods are still terminating.
const DEFAULT_EVICTION_RETRY: Duration = Duration::from_secs(5);

/// Trait abstracting the Kubernetes calls a drain needs.
///
/// Errors are returned as-is so callers can classify them by status code.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Mark the node unschedulable.
    async fn cordon(&self, node: &str) -> Result<(), kube::Error>;

    /// Pods currently bound to the node, across all namespaces.
    async fn pods_on(&self, node: &str) -> Result<Vec<Pod>, kube::Error>;

    /// Request eviction of a single pod.
    async fn evict(&self, namespace: &str, pod: &str) -> Result<(), kube::Error>;

    /// Delete the node object.
    async fn delete_node(&self, node: &str) -> Result<(), kube::Error>;
}

/// [`ClusterApi`] backed by a live API server connection.
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeApi {
    async fn cordon(&self, node: &str) -> Result<(), kube::Error> {
        let api: Api<KubeNode> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "spec": { "unschedulable": true } });
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn pods_on(&self, node: &str) -> Result<Vec<Pod>, kube::Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        Ok(api.list(&params).await?.items)
    }

    async fn evict(&self, namespace: &str, pod: &str) -> Result<(), kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.evict(pod, &EvictParams::default()).await?;
        Ok(())
    }

    async fn delete_node(&self, node: &str) -> Result<(), kube::Error> {
        let api: Api<KubeNode> = Api::all(self.client.clone());
        api.delete(node, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// HTTP status of an API error, if the server answered.
fn status_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(ae) => Some(ae.code),
        _ => None,
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    status_code(err) == Some(404)
}

/// 429 on eviction means a disruption budget currently forbids it.
fn is_eviction_blocked(err: &kube::Error) -> bool {
    status_code(err) == Some(429)
}

/// Returns true if the pod has to be evicted before the node counts as drained.
fn needs_eviction(pod: &Pod) -> bool {
    let daemon_set_owned = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == "DaemonSet"));

    let mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION));

    let finished = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");

    !(daemon_set_owned || mirror || finished)
}

/// Drains and deletes cluster nodes.
///
/// A node that no longer exists counts as drained and deleted, so both
/// operations can be repeated after a partial failure.
pub struct KubeCluster {
    api: Arc<dyn ClusterApi>,
    drain_timeout: Duration,
    eviction_retry: Duration,
}

impl KubeCluster {
    pub fn new(api: Arc<dyn ClusterApi>, drain_timeout: Duration) -> Self {
        Self {
            api,
            drain_timeout,
            eviction_retry: DEFAULT_EVICTION_RETRY,
        }
    }

    pub fn from_config(api: Arc<dyn ClusterApi>, config: &Config) -> Self {
        Self::new(api, config.drain_timeout)
    }

    pub fn with_eviction_retry(mut self, retry: Duration) -> Self {
        self.eviction_retry = retry;
        self
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Cordon the node and evict its pods, waiting until none are left.
    pub async fn drain(&self, node: &str) -> Result<(), NodeError> {
        match self.api.cordon(node).await {
            Ok(()) => debug!(node, "Cordoned node"),
            Err(e) if is_not_found(&e) => {
                debug!(node, "Node not in cluster, nothing to drain");
                return Ok(());
            }
            Err(e) => return Err(drain_error(node, format!("failed to cordon: {e}"))),
        }

        let deadline = Instant::now() + self.drain_timeout;

        loop {
            let pods = self
                .api
                .pods_on(node)
                .await
                .map_err(|e| drain_error(node, format!("failed to list pods: {e}")))?;

            let remaining: Vec<&Pod> = pods.iter().filter(|p| needs_eviction(p)).collect();
            if remaining.is_empty() {
                info!(node, "Node drained");
                return Ok(());
            }

            for pod in &remaining {
                // Already evicted, waiting for termination.
                if pod.metadata.deletion_timestamp.is_some() {
                    continue;
                }
                self.evict(node, pod).await?;
            }

            if Instant::now() + self.eviction_retry > deadline {
                return Err(drain_error(
                    node,
                    format!(
                        "timed out after {}s with {} pods remaining",
                        self.drain_timeout.as_secs(),
                        remaining.len()
                    ),
                ));
            }
            tokio::time::sleep(self.eviction_retry).await;
        }
    }

    async fn evict(&self, node: &str, pod: &Pod) -> Result<(), NodeError> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod.metadata.name.as_deref().unwrap_or_default();

        match self.api.evict(namespace, name).await {
            Ok(()) => {
                debug!(node, namespace, pod = name, "Evicted pod");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) if is_eviction_blocked(&e) => {
                debug!(
                    node,
                    namespace,
                    pod = name,
                    "Eviction blocked by disruption budget, retrying"
                );
                Ok(())
            }
            Err(e) => Err(drain_error(
                node,
                format!("failed to evict {namespace}/{name}: {e}"),
            )),
        }
    }

    /// Delete the node object.
    pub async fn delete(&self, node: &str) -> Result<(), NodeError> {
        match self.api.delete_node(node).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(node, "Node already deleted");
                Ok(())
            }
            Err(e) => Err(NodeError::Delete {
                node: node.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

fn drain_error(node: &str, message: String) -> NodeError {
    NodeError::Drain {
        node: node.to_string(),
        message,
    }
}
