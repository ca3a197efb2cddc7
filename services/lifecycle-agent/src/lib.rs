//! drainhook Lifecycle Agent Library
//!
//! The lifecycle agent holds autoscaling scale-in until the cluster has
//! evacuated the node being removed. It consumes lifecycle hook
//! notifications from a queue, drains and deletes the matching cluster node,
//! and then tells the scaling service to continue the termination.
//!
//! ## Architecture
//!
//! ```text
//! Consumer (tick) ── NotificationChannel.read
//!   └── LifecycleProcessor.handle
//!         ├── NodeController   (resolve, state, evacuate, remove)
//!         ├── NotificationChannel (acknowledge, extend_visibility)
//!         └── ScalingControlPlane (complete_lifecycle_action)
//! ```
//!
//! ## Modules
//!
//! - `processor`: the per-notification state machine
//! - `consumer`: the polling loop and its start/stop handle
//! - `channel`, `node`, `scaling`: collaborator traits and their CLI-backed
//!   implementations (`aws`, `inventory`, `cluster`)
//! - `mock`: recording in-memory collaborators for tests

pub mod aws;
pub mod channel;
pub mod cluster;
pub mod command;
pub mod config;
pub mod consumer;
pub mod inventory;
pub mod mock;
pub mod node;
pub mod processor;
pub mod scaling;

// Re-export commonly used types
pub use channel::{Delivery, NotificationChannel, SqsChannel};
pub use consumer::{Consumer, ConsumerConfig, ConsumerHandle, PollOutcome};
pub use node::{ClusterNodeController, HostnameStyle, Node, NodeController, NodeState};
pub use processor::{LifecycleProcessor, MalformedPolicy, Outcome, ProcessorConfig};
pub use scaling::{AutoScalingClient, ScalingControlPlane};
