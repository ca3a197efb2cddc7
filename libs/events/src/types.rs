//! Lifecycle notification types.
//!
//! Field names follow the payload the scaling service publishes to the queue.
//! The camelCase names are accepted as aliases so hand-written fixtures and
//! relays that re-encode the payload decode the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EventError;

// =============================================================================
// Transition Constants
// =============================================================================

/// Transition names as published by the scaling service.
pub mod transitions {
    pub const INSTANCE_LAUNCHING: &str = "autoscaling:EC2_INSTANCE_LAUNCHING";
    pub const INSTANCE_TERMINATING: &str = "autoscaling:EC2_INSTANCE_TERMINATING";

    /// Sent once when a hook's notification target is configured.
    pub const TEST_NOTIFICATION: &str = "autoscaling:TEST_NOTIFICATION";
}

// =============================================================================
// Lifecycle Transition
// =============================================================================

/// The transition a lifecycle notification reports.
///
/// Only [`LifecycleTransition::Terminating`] requires the node to be drained;
/// everything else is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum LifecycleTransition {
    Launching,
    Terminating,
    /// Any other value, including an absent transition.
    Other(String),
    #[default]
    Unspecified,
}

impl LifecycleTransition {
    /// Returns true if this transition requires draining the node.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Terminating)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Launching => transitions::INSTANCE_LAUNCHING,
            Self::Terminating => transitions::INSTANCE_TERMINATING,
            Self::Other(raw) => raw,
            Self::Unspecified => "",
        }
    }
}

impl From<String> for LifecycleTransition {
    fn from(raw: String) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Unspecified;
        }

        if trimmed == transitions::INSTANCE_TERMINATING
            || trimmed.eq_ignore_ascii_case("terminating")
        {
            Self::Terminating
        } else if trimmed == transitions::INSTANCE_LAUNCHING
            || trimmed.eq_ignore_ascii_case("launching")
        {
            Self::Launching
        } else {
            Self::Other(raw)
        }
    }
}

impl From<LifecycleTransition> for String {
    fn from(transition: LifecycleTransition) -> Self {
        transition.as_str().to_string()
    }
}

impl std::fmt::Display for LifecycleTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

// =============================================================================
// Lifecycle Event
// =============================================================================

/// A decoded lifecycle hook notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "LifecycleTransition", alias = "transitionKind", default)]
    pub transition: LifecycleTransition,

    #[serde(rename = "EC2InstanceId", alias = "instanceId", default)]
    pub instance_id: String,

    #[serde(rename = "AutoScalingGroupName", alias = "groupName", default)]
    pub group_name: String,

    #[serde(rename = "LifecycleHookName", alias = "hookName", default)]
    pub hook_name: String,

    #[serde(rename = "LifecycleActionToken", alias = "actionToken", default)]
    pub action_token: String,

    /// When the scaling service emitted the notification.
    #[serde(
        rename = "Time",
        alias = "time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub origin_time: Option<DateTime<Utc>>,

    /// Set on service-level notifications such as the hook test message.
    #[serde(
        rename = "Event",
        alias = "event",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_event: Option<String>,
}

impl LifecycleEvent {
    /// Check that an actionable event carries everything needed to drain the
    /// node and complete the lifecycle action.
    ///
    /// Informational events are accepted as-is; they are only ever dropped.
    pub fn validate(&self) -> Result<(), EventError> {
        if !self.transition.is_actionable() {
            return Ok(());
        }

        let required = [
            ("instance id", &self.instance_id),
            ("group name", &self.group_name),
            ("hook name", &self.hook_name),
            ("action token", &self.action_token),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(EventError::MissingField {
                    transition: self.transition.to_string(),
                    field,
                });
            }
        }

        Ok(())
    }

    /// Returns true if this is the hook's configuration test message.
    pub fn is_test_notification(&self) -> bool {
        self.service_event.as_deref() == Some(transitions::TEST_NOTIFICATION)
    }
}

// =============================================================================
// Lifecycle Action Result
// =============================================================================

/// The result reported when completing a lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleActionResult {
    /// Let the scaling service proceed with the transition.
    #[default]
    Continue,
    /// Ask the scaling service to abandon the transition.
    Abandon,
}

impl LifecycleActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleActionResult::Continue => "CONTINUE",
            LifecycleActionResult::Abandon => "ABANDON",
        }
    }
}

impl std::fmt::Display for LifecycleActionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lifecycle action to complete, keyed by group, hook and token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleAction {
    pub group_name: String,
    pub hook_name: String,
    pub action_token: String,
    pub instance_id: String,
    pub result: LifecycleActionResult,
}

impl LifecycleAction {
    /// Build the action that lets termination of the event's instance proceed.
    pub fn continue_for(event: &LifecycleEvent) -> Self {
        Self {
            group_name: event.group_name.clone(),
            hook_name: event.hook_name.clone(),
            action_token: event.action_token.clone(),
            instance_id: event.instance_id.clone(),
            result: LifecycleActionResult::Continue,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn terminating_event() -> LifecycleEvent {
        LifecycleEvent {
            transition: LifecycleTransition::Terminating,
            instance_id: "i-123".to_string(),
            group_name: "asg-A".to_string(),
            hook_name: "hook-1".to_string(),
            action_token: "token-xyz".to_string(),
            origin_time: None,
            service_event: None,
        }
    }

    #[rstest]
    #[case(transitions::INSTANCE_TERMINATING, LifecycleTransition::Terminating)]
    #[case("Terminating", LifecycleTransition::Terminating)]
    #[case(transitions::INSTANCE_LAUNCHING, LifecycleTransition::Launching)]
    #[case("launching", LifecycleTransition::Launching)]
    #[case("", LifecycleTransition::Unspecified)]
    #[case(
        "autoscaling:SOMETHING_NEW",
        LifecycleTransition::Other("autoscaling:SOMETHING_NEW".to_string())
    )]
    fn test_transition_parsing(#[case] raw: &str, #[case] expected: LifecycleTransition) {
        assert_eq!(LifecycleTransition::from(raw.to_string()), expected);
    }

    #[test]
    fn test_only_terminating_is_actionable() {
        assert!(LifecycleTransition::Terminating.is_actionable());
        assert!(!LifecycleTransition::Launching.is_actionable());
        assert!(!LifecycleTransition::Unspecified.is_actionable());
        assert!(!LifecycleTransition::Other("x".to_string()).is_actionable());
    }

    #[test]
    fn test_transition_serializes_to_cloud_name() {
        let json = serde_json::to_string(&LifecycleTransition::Terminating).unwrap();
        assert_eq!(json, "\"autoscaling:EC2_INSTANCE_TERMINATING\"");
    }

    #[test]
    fn test_validate_requires_token_for_terminating() {
        let mut event = terminating_event();
        assert!(event.validate().is_ok());

        event.action_token = "  ".to_string();
        assert_eq!(
            event.validate(),
            Err(EventError::MissingField {
                transition: transitions::INSTANCE_TERMINATING.to_string(),
                field: "action token",
            })
        );
    }

    #[test]
    fn test_validate_ignores_informational_events() {
        let event = LifecycleEvent {
            transition: LifecycleTransition::Launching,
            instance_id: String::new(),
            group_name: String::new(),
            hook_name: String::new(),
            action_token: String::new(),
            origin_time: None,
            service_event: None,
        };
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_continue_action_from_event() {
        let action = LifecycleAction::continue_for(&terminating_event());
        assert_eq!(action.group_name, "asg-A");
        assert_eq!(action.hook_name, "hook-1");
        assert_eq!(action.action_token, "token-xyz");
        assert_eq!(action.instance_id, "i-123");
        assert_eq!(action.result, LifecycleActionResult::Continue);
    }

    #[test]
    fn test_action_result_serialization() {
        assert_eq!(
            serde_json::to_string(&LifecycleActionResult::Continue).unwrap(),
            "\"CONTINUE\""
        );
        assert_eq!(LifecycleActionResult::Abandon.to_string(), "ABANDON");
    }
}
