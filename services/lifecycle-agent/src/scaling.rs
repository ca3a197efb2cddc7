//! Scaling control plane client: completes lifecycle actions.

use async_trait::async_trait;
use drainhook_events::LifecycleAction;
use thiserror::Error;
use tracing::debug;

use crate::aws::AwsCli;
use crate::command::CommandError;

/// Errors from completing a lifecycle action.
#[derive(Debug, Error)]
pub enum ScalingError {
    #[error("scaling command failed: {0}")]
    Command(#[from] CommandError),

    #[error("lifecycle action rejected: {0}")]
    Rejected(String),
}

/// Accepts completion signals for paused lifecycle transitions.
#[async_trait]
pub trait ScalingControlPlane: Send + Sync {
    async fn complete_lifecycle_action(&self, action: &LifecycleAction)
        -> Result<(), ScalingError>;
}

/// Scaling control plane reached through `aws autoscaling`.
pub struct AutoScalingClient {
    cli: AwsCli,
}

impl AutoScalingClient {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl ScalingControlPlane for AutoScalingClient {
    async fn complete_lifecycle_action(
        &self,
        action: &LifecycleAction,
    ) -> Result<(), ScalingError> {
        debug!(
            group = %action.group_name,
            hook = %action.hook_name,
            instance_id = %action.instance_id,
            result = %action.result,
            "Completing lifecycle action"
        );

        let mut args = vec![
            "--auto-scaling-group-name".to_string(),
            action.group_name.clone(),
            "--lifecycle-hook-name".to_string(),
            action.hook_name.clone(),
            "--lifecycle-action-token".to_string(),
            action.action_token.clone(),
            "--lifecycle-action-result".to_string(),
            action.result.as_str().to_string(),
        ];
        if !action.instance_id.is_empty() {
            args.push("--instance-id".to_string());
            args.push(action.instance_id.clone());
        }

        let result: Result<Option<serde_json::Value>, CommandError> = self
            .cli
            .call("autoscaling", "complete-lifecycle-action", args)
            .await;

        match result {
            Ok(_) => Ok(()),
            // Raised for unknown or already-completed tokens.
            Err(e) if e.mentions("ValidationError") => Err(ScalingError::Rejected(e.to_string())),
            Err(e) => Err(ScalingError::Command(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use drainhook_events::LifecycleActionResult;

    use super::*;
    use crate::command::CommandOutput;
    use crate::mock::ScriptedRunner;

    fn action() -> LifecycleAction {
        LifecycleAction {
            group_name: "asg-A".to_string(),
            hook_name: "hook-1".to_string(),
            action_token: "token-xyz".to_string(),
            instance_id: "i-123".to_string(),
            result: LifecycleActionResult::Continue,
        }
    }

    #[tokio::test]
    async fn test_complete_arguments() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(Ok(CommandOutput::ok(""))).await;

        let client = AutoScalingClient::new(AwsCli::new(runner.clone(), "aws"));
        client.complete_lifecycle_action(&action()).await.unwrap();

        let calls = runner.invocations().await;
        assert_eq!(
            calls[0].1,
            vec![
                "autoscaling",
                "complete-lifecycle-action",
                "--auto-scaling-group-name",
                "asg-A",
                "--lifecycle-hook-name",
                "hook-1",
                "--lifecycle-action-token",
                "token-xyz",
                "--lifecycle-action-result",
                "CONTINUE",
                "--instance-id",
                "i-123",
                "--output",
                "json"
            ]
        );
    }

    #[tokio::test]
    async fn test_complete_rejected_token() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .push(Ok(CommandOutput::failed(
                254,
                "An error occurred (ValidationError) when calling the CompleteLifecycleAction operation: No active Lifecycle Action found with token token-xyz",
            )))
            .await;

        let client = AutoScalingClient::new(AwsCli::new(runner, "aws"));
        assert!(matches!(
            client.complete_lifecycle_action(&action()).await,
            Err(ScalingError::Rejected(_))
        ));
    }
}
