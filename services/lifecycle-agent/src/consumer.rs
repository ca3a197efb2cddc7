//! Consumer loop: reads lifecycle notifications on a fixed cadence.
//!
//! The consumer:
//! - Reads at most one message per tick
//! - Runs it through the [`LifecycleProcessor`] before the next read
//! - Checks for shutdown only between ticks, so an in-flight cycle always
//!   finishes

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channel::NotificationChannel;
use crate::config::Config;
use crate::processor::{LifecycleProcessor, Outcome};

/// Consumer loop configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Interval between queue reads.
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for ConsumerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
        }
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The queue had nothing to deliver.
    Empty,
    /// Reading from the queue failed.
    ReadFailed(String),
    /// A message was read and handled.
    Handled(Outcome),
}

/// Single-worker lifecycle notification consumer.
pub struct Consumer {
    channel: Arc<dyn NotificationChannel>,
    processor: LifecycleProcessor,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        processor: LifecycleProcessor,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            channel,
            processor,
            config,
        }
    }

    /// Perform one tick: read at most one message and handle it.
    pub async fn poll_once(&self) -> PollOutcome {
        let delivery = match self.channel.read().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                debug!("No messages in queue");
                return PollOutcome::Empty;
            }
            Err(e) => return PollOutcome::ReadFailed(e.to_string()),
        };

        let outcome = self.processor.handle(&delivery).await;
        info!(
            message_id = %delivery.message_id,
            outcome = outcome.label(),
            acknowledged = outcome.is_acknowledged(),
            "Handled lifecycle notification"
        );

        PollOutcome::Handled(outcome)
    }

    /// Run the consumer until shutdown is signaled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting lifecycle consumer"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut consecutive_failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // A dropped sender means nobody can ask us to keep running.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.poll_once().await {
                        PollOutcome::ReadFailed(e) => {
                            consecutive_failures += 1;
                            if consecutive_failures <= 3 {
                                warn!(
                                    error = %e,
                                    consecutive_failures,
                                    "Failed to read from queue"
                                );
                            } else {
                                error!(
                                    error = %e,
                                    consecutive_failures,
                                    "Failed to read from queue repeatedly"
                                );
                            }
                        }
                        PollOutcome::Empty | PollOutcome::Handled(_) => {
                            consecutive_failures = 0;
                        }
                    }
                }
            }
        }

        info!("Lifecycle consumer shutting down");
    }

    /// Spawn the consumer on the runtime and return a handle to stop it.
    pub fn start(self) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });

        ConsumerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running consumer.
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Request shutdown and wait for the worker to finish its current cycle.
    pub async fn stop(self) -> Result<(), JoinError> {
        let _ = self.shutdown.send(true);
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_default() {
        let config = ConsumerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }
}
