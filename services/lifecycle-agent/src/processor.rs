//! Lifecycle event processor.
//!
//! Handles one delivery at a time:
//!
//! ```text
//! Received -> Filtered{drop | continue}
//!          -> NodeResolved{fail: retry later}
//!          -> Evacuated{fail: retry later | skip | success}
//!          -> Deleted (best effort)
//!          -> Acknowledged
//!          -> Completed (best effort)
//! ```
//!
//! Failures before the drain succeeds leave the message on the queue, either
//! untouched or with its visibility extended, so the channel redelivers it.
//! Once the drain succeeds (or is skipped) every later step runs regardless of
//! the outcome of the ones before it.

use std::sync::Arc;

use chrono::Utc;
use drainhook_events::{EventError, LifecycleAction, LifecycleTransition};
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{Delivery, NotificationChannel};
use crate::config::Config;
use crate::node::{HostnameStyle, NodeController, NodeState};
use crate::scaling::ScalingControlPlane;

/// What to do with a message whose body cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Acknowledge the message so it cannot loop forever.
    #[default]
    Drop,
    /// Leave the message for the queue's own redelivery and retention policy.
    Retain,
}

impl std::str::FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Ok(MalformedPolicy::Drop),
            "retain" => Ok(MalformedPolicy::Retain),
            other => Err(format!(
                "unknown malformed message policy {other:?} (expected drop or retain)"
            )),
        }
    }
}

impl std::fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedPolicy::Drop => write!(f, "drop"),
            MalformedPolicy::Retain => write!(f, "retain"),
        }
    }
}

/// Processor settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorConfig {
    pub hostname_style: HostnameStyle,
    pub malformed_policy: MalformedPolicy,
}

impl From<&Config> for ProcessorConfig {
    fn from(config: &Config) -> Self {
        Self {
            hostname_style: config.hostname_style,
            malformed_policy: config.malformed_policy,
        }
    }
}

/// Result of one side-effecting step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed(String),
}

impl StepStatus {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => StepStatus::Succeeded,
            Err(e) => StepStatus::Failed(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Succeeded)
    }
}

/// Whether the node was drained before deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evacuation {
    Drained,
    /// The instance was already terminated.
    Skipped,
}

/// How a handling cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The body could not be decoded. `acknowledgement` is `None` when the
    /// message was retained.
    Malformed {
        error: String,
        acknowledgement: Option<StepStatus>,
    },

    /// A non-actionable transition, dropped from the queue.
    Ignored {
        transition: LifecycleTransition,
        acknowledgement: StepStatus,
    },

    /// The instance could not be resolved; the message is left for redelivery.
    Unresolved { instance_id: String, error: String },

    /// The drain failed; redelivery was deferred.
    Deferred {
        instance_id: String,
        extension: StepStatus,
    },

    /// The node was evacuated and the lifecycle action completed.
    Completed {
        instance_id: String,
        evacuation: Evacuation,
        removal: StepStatus,
        acknowledgement: StepStatus,
        completion: StepStatus,
    },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Malformed { .. } => "malformed",
            Outcome::Ignored { .. } => "ignored",
            Outcome::Unresolved { .. } => "unresolved",
            Outcome::Deferred { .. } => "deferred",
            Outcome::Completed { .. } => "completed",
        }
    }

    /// Returns true if the message was removed from the queue.
    pub fn is_acknowledged(&self) -> bool {
        match self {
            Outcome::Malformed {
                acknowledgement, ..
            } => acknowledgement.as_ref().is_some_and(StepStatus::is_success),
            Outcome::Ignored {
                acknowledgement, ..
            }
            | Outcome::Completed {
                acknowledgement, ..
            } => acknowledgement.is_success(),
            Outcome::Unresolved { .. } | Outcome::Deferred { .. } => false,
        }
    }
}

/// Drives one lifecycle notification through drain, delete and completion.
pub struct LifecycleProcessor {
    channel: Arc<dyn NotificationChannel>,
    nodes: Arc<dyn NodeController>,
    scaling: Arc<dyn ScalingControlPlane>,
    config: ProcessorConfig,
}

impl LifecycleProcessor {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        nodes: Arc<dyn NodeController>,
        scaling: Arc<dyn ScalingControlPlane>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            channel,
            nodes,
            scaling,
            config,
        }
    }

    /// Handle a single delivery. Never fails; the outcome records what happened.
    #[instrument(skip_all, fields(message_id = %delivery.message_id))]
    pub async fn handle(&self, delivery: &Delivery) -> Outcome {
        let event = match delivery.decode() {
            Ok(event) => event,
            Err(e) => return self.handle_malformed(delivery, e).await,
        };

        if !event.transition.is_actionable() {
            info!(
                transition = %event.transition,
                group = %event.group_name,
                test_notification = event.is_test_notification(),
                "Received lifecycle transition, ignoring"
            );
            let acknowledgement = self.acknowledge(delivery).await;
            return Outcome::Ignored {
                transition: event.transition,
                acknowledgement,
            };
        }

        info!(
            instance_id = %event.instance_id,
            group = %event.group_name,
            hook = %event.hook_name,
            age_secs = event.origin_time.map(|t| (Utc::now() - t).num_seconds()),
            receive_count = delivery.receive_count,
            "Received lifecycle termination event"
        );

        let node = match self
            .nodes
            .resolve(&event.instance_id, self.config.hostname_style)
            .await
        {
            Ok(node) => node,
            Err(e) => {
                error!(
                    instance_id = %event.instance_id,
                    error = %e,
                    "Failed to resolve node, leaving message for redelivery"
                );
                return Outcome::Unresolved {
                    instance_id: event.instance_id,
                    error: e.to_string(),
                };
            }
        };

        let state = match self.nodes.state(&node).await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    instance_id = %node.instance_id,
                    error = %e,
                    "Failed to query instance state, assuming it may still run workloads"
                );
                NodeState::Unknown
            }
        };

        let evacuation = if state == NodeState::Terminated {
            warn!(
                instance_id = %node.instance_id,
                node = %node.name,
                "Instance has already been terminated, skipping drain"
            );
            Evacuation::Skipped
        } else {
            if let Err(e) = self.nodes.evacuate(&node).await {
                error!(
                    instance_id = %node.instance_id,
                    node = %node.name,
                    error = %e,
                    "Failed to drain node, deferring redelivery"
                );
                let extension =
                    StepStatus::from_result(self.channel.extend_visibility(delivery).await);
                if let StepStatus::Failed(reason) = &extension {
                    error!(error = %reason, "Failed to extend message visibility");
                }
                return Outcome::Deferred {
                    instance_id: node.instance_id,
                    extension,
                };
            }
            Evacuation::Drained
        };

        let removal = StepStatus::from_result(self.nodes.remove(&node).await);
        if let StepStatus::Failed(reason) = &removal {
            warn!(
                instance_id = %node.instance_id,
                node = %node.name,
                error = %reason,
                "Failed to delete node, continuing"
            );
        }

        let acknowledgement = self.acknowledge(delivery).await;

        info!(
            instance_id = %event.instance_id,
            group = %event.group_name,
            hook = %event.hook_name,
            "Completing lifecycle action"
        );
        let action = LifecycleAction::continue_for(&event);
        let completion =
            StepStatus::from_result(self.scaling.complete_lifecycle_action(&action).await);
        if let StepStatus::Failed(reason) = &completion {
            warn!(
                instance_id = %event.instance_id,
                error = %reason,
                "Failed to complete lifecycle action, continuing"
            );
        }

        Outcome::Completed {
            instance_id: event.instance_id,
            evacuation,
            removal,
            acknowledgement,
            completion,
        }
    }

    async fn handle_malformed(&self, delivery: &Delivery, err: EventError) -> Outcome {
        error!(
            error = %err,
            policy = %self.config.malformed_policy,
            receive_count = delivery.receive_count,
            "Failed to decode lifecycle notification"
        );

        let acknowledgement = match self.config.malformed_policy {
            MalformedPolicy::Drop => Some(self.acknowledge(delivery).await),
            MalformedPolicy::Retain => None,
        };

        Outcome::Malformed {
            error: err.to_string(),
            acknowledgement,
        }
    }

    async fn acknowledge(&self, delivery: &Delivery) -> StepStatus {
        let status = StepStatus::from_result(self.channel.acknowledge(delivery).await);
        match &status {
            StepStatus::Succeeded => debug!("Deleted message from queue"),
            StepStatus::Failed(reason) => {
                error!(error = %reason, "Failed to delete message from queue")
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockChannel, MockNodeController, MockScaling, NodeCall};

    fn processor(
        channel: &Arc<MockChannel>,
        nodes: &Arc<MockNodeController>,
        scaling: &Arc<MockScaling>,
        config: ProcessorConfig,
    ) -> LifecycleProcessor {
        LifecycleProcessor::new(channel.clone(), nodes.clone(), scaling.clone(), config)
    }

    #[test]
    fn test_malformed_policy_parsing() {
        assert_eq!("drop".parse::<MalformedPolicy>(), Ok(MalformedPolicy::Drop));
        assert_eq!(" RETAIN ".parse::<MalformedPolicy>(), Ok(MalformedPolicy::Retain));
        assert!("shred".parse::<MalformedPolicy>().is_err());
        assert_eq!(MalformedPolicy::Retain.to_string(), "retain");
    }

    #[test]
    fn test_outcome_acknowledged() {
        let retained = Outcome::Malformed {
            error: "bad".to_string(),
            acknowledgement: None,
        };
        assert!(!retained.is_acknowledged());

        let deferred = Outcome::Deferred {
            instance_id: "i-123".to_string(),
            extension: StepStatus::Succeeded,
        };
        assert!(!deferred.is_acknowledged());
        assert_eq!(deferred.label(), "deferred");
    }

    #[tokio::test]
    async fn test_state_failure_is_treated_as_unknown() {
        let channel = Arc::new(MockChannel::new());
        let nodes = Arc::new(MockNodeController::new());
        let scaling = Arc::new(MockScaling::new());
        nodes
            .add_instance("i-123", "ip-10-0-0-1.ec2.internal", NodeState::Active)
            .await;
        nodes.fail_state(true);

        let delivery = MockChannel::delivery(
            "msg-1",
            r#"{"transitionKind":"terminating","instanceId":"i-123","groupName":"asg-A","hookName":"hook-1","actionToken":"token-xyz"}"#,
        );

        let outcome = processor(&channel, &nodes, &scaling, ProcessorConfig::default())
            .handle(&delivery)
            .await;

        assert!(matches!(
            outcome,
            Outcome::Completed {
                evacuation: Evacuation::Drained,
                ..
            }
        ));
        assert!(nodes
            .calls()
            .await
            .contains(&NodeCall::Evacuate("ip-10-0-0-1.ec2.internal".to_string())));
    }

    #[tokio::test]
    async fn test_short_hostname_style_reaches_controller() {
        let channel = Arc::new(MockChannel::new());
        let nodes = Arc::new(MockNodeController::new());
        let scaling = Arc::new(MockScaling::new());
        nodes
            .add_instance("i-123", "ip-10-0-0-1.ec2.internal", NodeState::Active)
            .await;

        let delivery = MockChannel::delivery(
            "msg-1",
            r#"{"transitionKind":"terminating","instanceId":"i-123","groupName":"asg-A","hookName":"hook-1","actionToken":"token-xyz"}"#,
        );

        let config = ProcessorConfig {
            hostname_style: HostnameStyle::Short,
            ..ProcessorConfig::default()
        };
        processor(&channel, &nodes, &scaling, config)
            .handle(&delivery)
            .await;

        let calls = nodes.calls().await;
        assert!(calls.contains(&NodeCall::Evacuate("ip-10-0-0-1".to_string())));
        assert!(calls.contains(&NodeCall::Remove("ip-10-0-0-1".to_string())));
    }
}
