//! In-memory collaborators for testing and development.
//!
//! Each mock records every call it receives and can be told to fail a
//! specific operation, so tests can assert exactly which side effects a
//! handling cycle produced.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use drainhook_events::LifecycleAction;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::{Mutex, Notify};

use crate::channel::{ChannelError, Delivery, NotificationChannel};
use crate::cluster::ClusterApi;
use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::node::{HostnameStyle, Node, NodeController, NodeError, NodeState};
use crate::scaling::{ScalingControlPlane, ScalingError};

// =============================================================================
// Channel
// =============================================================================

/// A call made against [`MockChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    Read,
    /// Message ID of the acknowledged delivery.
    Acknowledge(String),
    /// Message ID of the extended delivery.
    ExtendVisibility(String),
}

/// Queue that hands out pushed deliveries in order.
#[derive(Default)]
pub struct MockChannel {
    pending: Mutex<VecDeque<Delivery>>,
    calls: Mutex<Vec<ChannelCall>>,
    fail_reads: AtomicBool,
    fail_acknowledge: AtomicBool,
    fail_extend: AtomicBool,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a delivery for `body`, using the message ID as receipt handle.
    pub fn delivery(message_id: &str, body: &str) -> Delivery {
        Delivery {
            message_id: message_id.to_string(),
            receipt_handle: format!("rh-{message_id}"),
            body: body.to_string(),
            receive_count: Some(1),
        }
    }

    pub async fn push(&self, delivery: Delivery) {
        self.pending.lock().await.push_back(delivery);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_acknowledge(&self, fail: bool) {
        self.fail_acknowledge.store(fail, Ordering::SeqCst);
    }

    pub fn fail_extend(&self, fail: bool) {
        self.fail_extend.store(fail, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<ChannelCall> {
        self.calls.lock().await.clone()
    }

    /// Calls other than reads.
    pub async fn message_calls(&self) -> Vec<ChannelCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| !matches!(c, ChannelCall::Read))
            .cloned()
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait]
impl NotificationChannel for MockChannel {
    async fn read(&self) -> Result<Option<Delivery>, ChannelError> {
        self.calls.lock().await.push(ChannelCall::Read);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ChannelError::Response("mock read failure".to_string()));
        }
        Ok(self.pending.lock().await.pop_front())
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        self.calls
            .lock()
            .await
            .push(ChannelCall::Acknowledge(delivery.message_id.clone()));
        if self.fail_acknowledge.load(Ordering::SeqCst) {
            return Err(ChannelError::Response(
                "mock acknowledge failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn extend_visibility(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        self.calls
            .lock()
            .await
            .push(ChannelCall::ExtendVisibility(delivery.message_id.clone()));
        if self.fail_extend.load(Ordering::SeqCst) {
            return Err(ChannelError::Response("mock extend failure".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Node controller
// =============================================================================

/// A call made against [`MockNodeController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCall {
    /// Instance ID.
    Resolve(String),
    /// Instance ID.
    State(String),
    /// Node name.
    Evacuate(String),
    /// Node name.
    Remove(String),
}

#[derive(Debug, Clone)]
struct MockInstance {
    dns_name: String,
    state: NodeState,
}

/// Node controller over a fixed set of instances.
///
/// Removing a node forgets its instance, so a replayed event sees the
/// instance as gone.
#[derive(Default)]
pub struct MockNodeController {
    instances: Mutex<HashMap<String, MockInstance>>,
    calls: Mutex<Vec<NodeCall>>,
    fail_state: AtomicBool,
    fail_evacuate: AtomicBool,
    fail_remove: AtomicBool,
    evacuate_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockNodeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_instance(&self, instance_id: &str, dns_name: &str, state: NodeState) {
        self.instances.lock().await.insert(
            instance_id.to_string(),
            MockInstance {
                dns_name: dns_name.to_string(),
                state,
            },
        );
    }

    pub fn fail_state(&self, fail: bool) {
        self.fail_state.store(fail, Ordering::SeqCst);
    }

    pub fn fail_evacuate(&self, fail: bool) {
        self.fail_evacuate.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// Make every later evacuation wait until the returned gate is notified.
    pub async fn hold_evacuations(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.evacuate_gate.lock().await = Some(gate.clone());
        gate
    }

    pub async fn calls(&self) -> Vec<NodeCall> {
        self.calls.lock().await.clone()
    }

    pub async fn count(&self, matcher: fn(&NodeCall) -> bool) -> usize {
        self.calls.lock().await.iter().filter(|c| matcher(c)).count()
    }
}

#[async_trait]
impl NodeController for MockNodeController {
    async fn resolve(&self, instance_id: &str, style: HostnameStyle) -> Result<Node, NodeError> {
        self.calls
            .lock()
            .await
            .push(NodeCall::Resolve(instance_id.to_string()));

        let instances = self.instances.lock().await;
        let instance = instances
            .get(instance_id)
            .ok_or_else(|| NodeError::InstanceNotFound(instance_id.to_string()))?;

        Ok(Node {
            instance_id: instance_id.to_string(),
            name: style.node_name(&instance.dns_name),
        })
    }

    async fn state(&self, node: &Node) -> Result<NodeState, NodeError> {
        self.calls
            .lock()
            .await
            .push(NodeCall::State(node.instance_id.clone()));

        if self.fail_state.load(Ordering::SeqCst) {
            return Err(NodeError::Response("mock state failure".to_string()));
        }

        Ok(self
            .instances
            .lock()
            .await
            .get(&node.instance_id)
            .map(|i| i.state)
            .unwrap_or(NodeState::Terminated))
    }

    async fn evacuate(&self, node: &Node) -> Result<(), NodeError> {
        self.calls
            .lock()
            .await
            .push(NodeCall::Evacuate(node.name.clone()));

        let gate = self.evacuate_gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_evacuate.load(Ordering::SeqCst) {
            return Err(NodeError::Drain {
                node: node.name.clone(),
                message: "mock drain failure".to_string(),
            });
        }
        Ok(())
    }

    async fn remove(&self, node: &Node) -> Result<(), NodeError> {
        self.calls
            .lock()
            .await
            .push(NodeCall::Remove(node.name.clone()));

        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(NodeError::Delete {
                node: node.name.clone(),
                message: "mock delete failure".to_string(),
            });
        }

        self.instances.lock().await.remove(&node.instance_id);
        Ok(())
    }
}

// =============================================================================
// Scaling control plane
// =============================================================================

/// Records completed lifecycle actions.
#[derive(Default)]
pub struct MockScaling {
    completed: Mutex<Vec<LifecycleAction>>,
    fail: AtomicBool,
}

impl MockScaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_completion(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every completion attempt, including failed ones.
    pub async fn completions(&self) -> Vec<LifecycleAction> {
        self.completed.lock().await.clone()
    }
}

#[async_trait]
impl ScalingControlPlane for MockScaling {
    async fn complete_lifecycle_action(
        &self,
        action: &LifecycleAction,
    ) -> Result<(), ScalingError> {
        self.completed.lock().await.push(action.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ScalingError::Rejected(
                "mock completion failure".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Cluster API
// =============================================================================

/// Build an API server error response with the given status code.
pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("mock {reason}"),
        reason: reason.to_string(),
        code,
    })
}

/// A bare pod in `namespace`.
pub fn pod(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A call made against [`MockClusterApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    /// Node name.
    Cordon(String),
    /// Node name.
    ListPods(String),
    /// `namespace/pod`.
    Evict(String),
    /// Node name.
    DeleteNode(String),
}

#[derive(Default)]
struct ClusterState {
    /// Node name to cordoned flag.
    nodes: HashMap<String, bool>,
    pods: HashMap<String, Vec<Pod>>,
    /// Remaining 429 answers per `namespace/pod`; `u32::MAX` never clears.
    blocked: HashMap<String, u32>,
}

/// In-memory API server holding nodes and the pods bound to them.
///
/// A successful eviction removes the pod immediately.
#[derive(Default)]
pub struct MockClusterApi {
    state: Mutex<ClusterState>,
    calls: Mutex<Vec<ClusterCall>>,
    fail_evictions: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MockClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_node(&self, node: &str) {
        self.state.lock().await.nodes.insert(node.to_string(), false);
    }

    pub async fn add_pod(&self, node: &str, pod: Pod) {
        self.state
            .lock()
            .await
            .pods
            .entry(node.to_string())
            .or_default()
            .push(pod);
    }

    /// Answer the next `times` evictions of `key` (`namespace/pod`) with 429.
    pub async fn block_eviction(&self, key: &str, times: u32) {
        self.state
            .lock()
            .await
            .blocked
            .insert(key.to_string(), times);
    }

    pub fn fail_evictions(&self, fail: bool) {
        self.fail_evictions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<ClusterCall> {
        self.calls.lock().await.clone()
    }

    pub async fn is_cordoned(&self, node: &str) -> bool {
        self.state
            .lock()
            .await
            .nodes
            .get(node)
            .copied()
            .unwrap_or(false)
    }

    pub async fn has_node(&self, node: &str) -> bool {
        self.state.lock().await.nodes.contains_key(node)
    }
}

#[async_trait]
impl ClusterApi for MockClusterApi {
    async fn cordon(&self, node: &str) -> Result<(), kube::Error> {
        self.calls
            .lock()
            .await
            .push(ClusterCall::Cordon(node.to_string()));

        match self.state.lock().await.nodes.get_mut(node) {
            Some(cordoned) => {
                *cordoned = true;
                Ok(())
            }
            None => Err(api_error(404, "NotFound")),
        }
    }

    async fn pods_on(&self, node: &str) -> Result<Vec<Pod>, kube::Error> {
        self.calls
            .lock()
            .await
            .push(ClusterCall::ListPods(node.to_string()));

        Ok(self
            .state
            .lock()
            .await
            .pods
            .get(node)
            .cloned()
            .unwrap_or_default())
    }

    async fn evict(&self, namespace: &str, pod: &str) -> Result<(), kube::Error> {
        let key = format!("{namespace}/{pod}");
        self.calls
            .lock()
            .await
            .push(ClusterCall::Evict(key.clone()));

        if self.fail_evictions.load(Ordering::SeqCst) {
            return Err(api_error(500, "InternalError"));
        }

        let mut state = self.state.lock().await;
        if let Some(remaining) = state.blocked.get_mut(&key) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(api_error(429, "TooManyRequests"));
            }
        }

        for pods in state.pods.values_mut() {
            let before = pods.len();
            pods.retain(|p| {
                p.metadata.namespace.as_deref() != Some(namespace)
                    || p.metadata.name.as_deref() != Some(pod)
            });
            if pods.len() != before {
                return Ok(());
            }
        }
        Err(api_error(404, "NotFound"))
    }

    async fn delete_node(&self, node: &str) -> Result<(), kube::Error> {
        self.calls
            .lock()
            .await
            .push(ClusterCall::DeleteNode(node.to_string()));

        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(api_error(500, "InternalError"));
        }

        let mut state = self.state.lock().await;
        state.pods.remove(node);
        match state.nodes.remove(node) {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound")),
        }
    }
}

// =============================================================================
// Command runner
// =============================================================================

/// Command runner that replays queued results in order.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<Result<CommandOutput, CommandError>>>,
    invocations: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, response: Result<CommandOutput, CommandError>) {
        self.responses.lock().await.push_back(response);
    }

    /// Program and arguments of every invocation so far.
    pub async fn invocations(&self) -> Vec<(String, Vec<String>)> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        self.invocations
            .lock()
            .await
            .push((program.to_string(), args.to_vec()));

        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Err(CommandError::Spawn {
                    program: program.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no scripted response left",
                    ),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_channel_fifo() {
        let channel = MockChannel::new();
        channel.push(MockChannel::delivery("a", "{}")).await;
        channel.push(MockChannel::delivery("b", "{}")).await;

        assert_eq!(channel.read().await.unwrap().unwrap().message_id, "a");
        assert_eq!(channel.read().await.unwrap().unwrap().message_id, "b");
        assert!(channel.read().await.unwrap().is_none());
        assert_eq!(channel.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_node_controller_forgets_removed_instances() {
        let nodes = MockNodeController::new();
        nodes
            .add_instance("i-1", "ip-10-0-0-1.ec2.internal", NodeState::Active)
            .await;

        let node = nodes.resolve("i-1", HostnameStyle::Full).await.unwrap();
        nodes.remove(&node).await.unwrap();

        assert!(matches!(
            nodes.resolve("i-1", HostnameStyle::Full).await,
            Err(NodeError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_channel_failures_are_response_errors() {
        let channel = MockChannel::new();
        channel.fail_reads(true);
        assert!(matches!(
            channel.read().await,
            Err(ChannelError::Response(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_cluster_api_missing_node() {
        let api = MockClusterApi::new();
        assert!(matches!(
            api.cordon("ip-10-0-0-9").await,
            Err(kube::Error::Api(ae)) if ae.code == 404
        ));
        assert!(api.pods_on("ip-10-0-0-9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_runner_runs_out() {
        let runner = ScriptedRunner::new();
        assert!(runner.run("aws", &[]).await.is_err());
        assert_eq!(runner.invocations().await.len(), 1);
    }
}
