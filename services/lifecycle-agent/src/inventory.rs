//! Compute instance inventory lookups.

use serde::Deserialize;

use crate::aws::AwsCli;
use crate::node::NodeError;

const NOT_FOUND_CODES: [&str; 2] = ["InvalidInstanceID.NotFound", "InvalidInstanceID.Malformed"];

/// What the inventory knows about one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub private_dns_name: Option<String>,
    /// Instance state name (`running`, `terminated`, ...).
    pub state_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_id: String,
    #[serde(default)]
    private_dns_name: Option<String>,
    state: Option<InstanceStateName>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceStateName {
    name: String,
}

/// Instance lookups through `aws ec2 describe-instances`.
pub struct Ec2Inventory {
    cli: AwsCli,
}

impl Ec2Inventory {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    /// Describe a single instance.
    pub async fn describe(&self, instance_id: &str) -> Result<InstanceDescription, NodeError> {
        let output: Option<DescribeInstancesOutput> = self
            .cli
            .call(
                "ec2",
                "describe-instances",
                vec!["--instance-ids".to_string(), instance_id.to_string()],
            )
            .await
            .map_err(|e| {
                if NOT_FOUND_CODES.iter().any(|code| e.mentions(code)) {
                    NodeError::InstanceNotFound(instance_id.to_string())
                } else {
                    NodeError::Command(e)
                }
            })?;

        let instance = output
            .into_iter()
            .flat_map(|o| o.reservations)
            .flat_map(|r| r.instances)
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| NodeError::InstanceNotFound(instance_id.to_string()))?;

        let state_name = instance
            .state
            .map(|s| s.name)
            .ok_or_else(|| NodeError::Response(format!("instance {instance_id} has no state")))?;

        Ok(InstanceDescription {
            instance_id: instance.instance_id,
            private_dns_name: instance.private_dns_name.filter(|n| !n.is_empty()),
            state_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command::CommandOutput;
    use crate::mock::ScriptedRunner;

    #[tokio::test]
    async fn test_describe_running_instance() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .push(Ok(CommandOutput::ok(
                r#"{"Reservations": [{"Instances": [{
                    "InstanceId": "i-123",
                    "PrivateDnsName": "ip-10-0-0-1.ec2.internal",
                    "State": {"Code": 16, "Name": "running"}
                }]}]}"#,
            )))
            .await;

        let inventory = Ec2Inventory::new(AwsCli::new(runner.clone(), "aws"));
        let instance = inventory.describe("i-123").await.unwrap();
        assert_eq!(
            instance.private_dns_name.as_deref(),
            Some("ip-10-0-0-1.ec2.internal")
        );
        assert_eq!(instance.state_name, "running");

        let calls = runner.invocations().await;
        assert_eq!(
            &calls[0].1[..4],
            &["ec2", "describe-instances", "--instance-ids", "i-123"]
        );
    }

    #[tokio::test]
    async fn test_describe_empty_reservations() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .push(Ok(CommandOutput::ok(r#"{"Reservations": []}"#)))
            .await;

        let inventory = Ec2Inventory::new(AwsCli::new(runner, "aws"));
        assert!(matches!(
            inventory.describe("i-123").await,
            Err(NodeError::InstanceNotFound(id)) if id == "i-123"
        ));
    }

    #[tokio::test]
    async fn test_describe_not_found_error_code() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .push(Ok(CommandOutput::failed(
                254,
                "An error occurred (InvalidInstanceID.NotFound) when calling the DescribeInstances operation: The instance ID 'i-123' does not exist",
            )))
            .await;

        let inventory = Ec2Inventory::new(AwsCli::new(runner, "aws"));
        assert!(matches!(
            inventory.describe("i-123").await,
            Err(NodeError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_describe_other_failure_is_command_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .push(Ok(CommandOutput::failed(254, "An error occurred (RequestLimitExceeded)")))
            .await;

        let inventory = Ec2Inventory::new(AwsCli::new(runner, "aws"));
        assert!(matches!(
            inventory.describe("i-123").await,
            Err(NodeError::Command(_))
        ));
    }
}
