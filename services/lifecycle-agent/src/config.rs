//! Configuration for the lifecycle agent.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::node::HostnameStyle;
use crate::processor::MalformedPolicy;

/// Lifecycle agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the queue the lifecycle hook publishes to.
    pub queue_url: String,

    /// Cloud region passed to the CLI (falls back to the CLI's own resolution).
    pub region: Option<String>,

    /// Credentials profile passed to the CLI.
    pub profile: Option<String>,

    /// How cluster node names are derived from the instance's DNS name.
    pub hostname_style: HostnameStyle,

    /// Interval between queue reads.
    pub poll_interval: Duration,

    /// Long-poll wait for each queue read, in seconds.
    pub receive_wait_secs: u32,

    /// How long a message is hidden after a failed drain, in seconds.
    pub visibility_extension_secs: u32,

    /// Upper bound for a single drain.
    pub drain_timeout: Duration,

    /// Upper bound for a single `aws` CLI invocation.
    pub command_timeout: Duration,

    /// What to do with messages whose body cannot be decoded.
    pub malformed_policy: MalformedPolicy,

    /// Path to the `aws` executable.
    pub aws_cli: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let queue_url =
            get("DRAINHOOK_QUEUE_URL").context("DRAINHOOK_QUEUE_URL must be set")?;

        let region = get("DRAINHOOK_REGION");
        let profile = get("DRAINHOOK_PROFILE");

        let hostname_style = match get("DRAINHOOK_SHORT_HOSTNAME") {
            Some(v) if parse_bool(&v).context("invalid DRAINHOOK_SHORT_HOSTNAME")? => {
                HostnameStyle::Short
            }
            _ => HostnameStyle::Full,
        };

        let poll_interval_secs: u64 = parse_or(get("DRAINHOOK_POLL_INTERVAL_SECS"), 1)
            .context("invalid DRAINHOOK_POLL_INTERVAL_SECS")?;
        if poll_interval_secs == 0 {
            bail!("DRAINHOOK_POLL_INTERVAL_SECS must be greater than zero");
        }

        let receive_wait_secs: u32 = parse_or(get("DRAINHOOK_RECEIVE_WAIT_SECS"), 0)
            .context("invalid DRAINHOOK_RECEIVE_WAIT_SECS")?;
        if receive_wait_secs > 20 {
            bail!("DRAINHOOK_RECEIVE_WAIT_SECS must be at most 20");
        }

        let visibility_extension_secs: u32 =
            parse_or(get("DRAINHOOK_VISIBILITY_EXTENSION_SECS"), 60)
                .context("invalid DRAINHOOK_VISIBILITY_EXTENSION_SECS")?;

        let drain_timeout_secs: u64 = parse_or(get("DRAINHOOK_DRAIN_TIMEOUT_SECS"), 300)
            .context("invalid DRAINHOOK_DRAIN_TIMEOUT_SECS")?;
        if drain_timeout_secs == 0 {
            bail!("DRAINHOOK_DRAIN_TIMEOUT_SECS must be greater than zero");
        }

        // A long-polling receive must finish before the CLI is killed.
        let command_timeout_secs: u64 = parse_or(get("DRAINHOOK_COMMAND_TIMEOUT_SECS"), 60)
            .context("invalid DRAINHOOK_COMMAND_TIMEOUT_SECS")?;
        if command_timeout_secs <= u64::from(receive_wait_secs) {
            bail!(
                "DRAINHOOK_COMMAND_TIMEOUT_SECS ({command_timeout_secs}) must exceed \
                 DRAINHOOK_RECEIVE_WAIT_SECS ({receive_wait_secs})"
            );
        }

        let malformed_policy = match get("DRAINHOOK_MALFORMED_POLICY") {
            Some(v) => v
                .parse::<MalformedPolicy>()
                .map_err(anyhow::Error::msg)
                .context("invalid DRAINHOOK_MALFORMED_POLICY")?,
            None => MalformedPolicy::default(),
        };

        let aws_cli = get("DRAINHOOK_AWS_CLI").unwrap_or_else(|| "aws".to_string());
        let log_level = get("DRAINHOOK_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            queue_url,
            region,
            profile,
            hostname_style,
            poll_interval: Duration::from_secs(poll_interval_secs),
            receive_wait_secs,
            visibility_extension_secs,
            drain_timeout: Duration::from_secs(drain_timeout_secs),
            command_timeout: Duration::from_secs(command_timeout_secs),
            malformed_policy,
            aws_cli,
            log_level,
        })
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => Ok(v.trim().parse()?),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const QUEUE: (&str, &str) = (
        "DRAINHOOK_QUEUE_URL",
        "https://sqs.us-east-1.amazonaws.com/123456789012/lifecycle",
    );

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[QUEUE])).unwrap();
        assert_eq!(config.hostname_style, HostnameStyle::Full);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.receive_wait_secs, 0);
        assert_eq!(config.visibility_extension_secs, 60);
        assert_eq!(config.drain_timeout, Duration::from_secs(300));
        assert_eq!(config.malformed_policy, MalformedPolicy::Drop);
        assert_eq!(config.aws_cli, "aws");
        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert!(config.region.is_none());
    }

    #[test]
    fn test_queue_url_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DRAINHOOK_QUEUE_URL"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            QUEUE,
            ("DRAINHOOK_REGION", "eu-west-1"),
            ("DRAINHOOK_SHORT_HOSTNAME", "true"),
            ("DRAINHOOK_POLL_INTERVAL_SECS", "5"),
            ("DRAINHOOK_RECEIVE_WAIT_SECS", "10"),
            ("DRAINHOOK_MALFORMED_POLICY", "retain"),
        ]))
        .unwrap();

        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.hostname_style, HostnameStyle::Short);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.receive_wait_secs, 10);
        assert_eq!(config.malformed_policy, MalformedPolicy::Retain);
    }

    #[rstest]
    #[case::zero_poll_interval("DRAINHOOK_POLL_INTERVAL_SECS", "0")]
    #[case::unparseable_interval("DRAINHOOK_POLL_INTERVAL_SECS", "soon")]
    #[case::unknown_policy("DRAINHOOK_MALFORMED_POLICY", "shred")]
    #[case::bad_boolean("DRAINHOOK_SHORT_HOSTNAME", "maybe")]
    #[case::zero_drain_timeout("DRAINHOOK_DRAIN_TIMEOUT_SECS", "0")]
    fn test_rejects_invalid_values(#[case] key: &str, #[case] value: &str) {
        assert!(Config::from_lookup(lookup(&[QUEUE, (key, value)])).is_err());
    }

    #[test]
    fn test_drain_timeout_is_independent_of_command_timeout() {
        let config = Config::from_lookup(lookup(&[
            QUEUE,
            ("DRAINHOOK_DRAIN_TIMEOUT_SECS", "1200"),
            ("DRAINHOOK_COMMAND_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.drain_timeout, Duration::from_secs(1200));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_command_timeout_must_exceed_receive_wait() {
        let err = Config::from_lookup(lookup(&[
            QUEUE,
            ("DRAINHOOK_RECEIVE_WAIT_SECS", "20"),
            ("DRAINHOOK_COMMAND_TIMEOUT_SECS", "20"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DRAINHOOK_COMMAND_TIMEOUT_SECS"));

        assert!(Config::from_lookup(lookup(&[
            QUEUE,
            ("DRAINHOOK_RECEIVE_WAIT_SECS", "20"),
            ("DRAINHOOK_COMMAND_TIMEOUT_SECS", "21"),
        ]))
        .is_ok());
    }
}
