//! Thin wrapper around the `aws` command line client.
//!
//! Each call runs `aws <service> <operation> ... --output json` and returns the
//! parsed JSON document. Operations that print nothing (deletes, visibility
//! changes, lifecycle completion, an empty receive) yield `None`.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::command::{CommandError, CommandRunner};
use crate::config::Config;

/// Cloud CLI client shared by the queue, compute and scaling adapters.
#[derive(Clone)]
pub struct AwsCli {
    runner: Arc<dyn CommandRunner>,
    program: String,
    region: Option<String>,
    profile: Option<String>,
}

impl AwsCli {
    /// Create a client for the given program with no region or profile override.
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            region: None,
            profile: None,
        }
    }

    /// Create a client from the agent configuration.
    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &Config) -> Self {
        let mut cli = Self::new(runner, config.aws_cli.clone());
        cli.region = config.region.clone();
        cli.profile = config.profile.clone();
        cli
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Run an operation and decode its JSON output.
    pub async fn call<T>(
        &self,
        service: &str,
        operation: &str,
        args: Vec<String>,
    ) -> Result<Option<T>, CommandError>
    where
        T: DeserializeOwned,
    {
        let action = format!("{service} {operation}");
        let argv = self.argv(service, operation, args);

        let stdout = self
            .runner
            .run(&self.program, &argv)
            .await?
            .into_stdout(&self.program, &action)?;

        if stdout.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&stdout)
            .map(Some)
            .map_err(|e| CommandError::Output {
                program: self.program.clone(),
                action,
                message: e.to_string(),
            })
    }

    fn argv(&self, service: &str, operation: &str, args: Vec<String>) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 8);
        argv.push(service.to_string());
        argv.push(operation.to_string());
        argv.extend(args);
        argv.push("--output".to_string());
        argv.push("json".to_string());

        if let Some(region) = &self.region {
            argv.push("--region".to_string());
            argv.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            argv.push("--profile".to_string());
            argv.push(profile.clone());
        }

        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::mock::ScriptedRunner;

    #[tokio::test]
    async fn test_call_appends_common_flags() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(Ok(CommandOutput::ok(r#"{"ok": true}"#))).await;

        let cli = AwsCli::new(runner.clone(), "aws")
            .with_region("us-east-1")
            .with_profile("ops");

        let out: Option<serde_json::Value> = cli
            .call("sqs", "get-queue-url", vec!["--queue-name".into(), "q".into()])
            .await
            .unwrap();
        assert_eq!(out.unwrap()["ok"], true);

        let calls = runner.invocations().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "aws");
        assert_eq!(
            calls[0].1,
            vec![
                "sqs",
                "get-queue-url",
                "--queue-name",
                "q",
                "--output",
                "json",
                "--region",
                "us-east-1",
                "--profile",
                "ops"
            ]
        );
    }

    #[tokio::test]
    async fn test_call_empty_output_is_none() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(Ok(CommandOutput::ok("\n"))).await;

        let cli = AwsCli::new(runner, "aws");
        let out: Option<serde_json::Value> = cli.call("sqs", "delete-message", vec![]).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_call_reports_bad_json() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(Ok(CommandOutput::ok("<html>"))).await;

        let cli = AwsCli::new(runner, "aws");
        let result: Result<Option<serde_json::Value>, _> =
            cli.call("ec2", "describe-instances", vec![]).await;
        assert!(matches!(result, Err(CommandError::Output { .. })));
    }
}
