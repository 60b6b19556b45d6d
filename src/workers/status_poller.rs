//! Client-side status poller
//!
//! Repeats status queries for one checkout request on a fixed interval until
//! the payment settles, the attempt budget runs out, or the poll is
//! cancelled. Polling only reads; running out of attempts is reported to the
//! caller and never written back to the transaction.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::parse_or;
use crate::database::TransactionStatus;

pub const TIMEOUT_MESSAGE: &str =
    "Payment timed out. Please check your M-Pesa messages or try again.";
pub const UNVERIFIABLE_MESSAGE: &str = "Unable to verify payment status. Please contact support.";

/// What one status check observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: TransactionStatus,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
}

impl StatusSnapshot {
    pub fn pending() -> Self {
        Self {
            status: TransactionStatus::Pending,
            result_desc: None,
            mpesa_receipt_number: None,
        }
    }
}

/// Anything that can report the current status of a checkout request
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn check(&self, checkout_request_id: &str) -> anyhow::Result<StatusSnapshot>;
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Wait before the first query
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            interval: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

impl PollerConfig {
    /// `POLL_INITIAL_DELAY_SECS`, `POLL_INTERVAL_SECS` and `POLL_MAX_ATTEMPTS`
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            initial_delay: Duration::from_secs(
                parse_or(get("POLL_INITIAL_DELAY_SECS"), defaults.initial_delay.as_secs())
                    .context("POLL_INITIAL_DELAY_SECS must be a valid number")?,
            ),
            interval: Duration::from_secs(
                parse_or(get("POLL_INTERVAL_SECS"), defaults.interval.as_secs())
                    .context("POLL_INTERVAL_SECS must be a valid number")?,
            ),
            max_attempts: parse_or(get("POLL_MAX_ATTEMPTS"), defaults.max_attempts)
                .context("POLL_MAX_ATTEMPTS must be a valid number")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("POLL_MAX_ATTEMPTS must be greater than 0"));
        }
        if self.interval.is_zero() {
            return Err(anyhow!("POLL_INTERVAL_SECS must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded {
        mpesa_receipt_number: Option<String>,
        attempts: u32,
    },
    Failed {
        reason: Option<String>,
        attempts: u32,
    },
    /// Every attempt saw `pending`
    TimedOut { attempts: u32 },
    /// The final attempt could not reach the status source
    Unverifiable { attempts: u32, last_error: String },
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Succeeded { attempts, .. }
            | PollOutcome::Failed { attempts, .. }
            | PollOutcome::TimedOut { attempts }
            | PollOutcome::Unverifiable { attempts, .. }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PollOutcome::Succeeded { .. } => "Payment successful".to_string(),
            PollOutcome::Failed { reason, .. } => reason
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "Payment failed".to_string()),
            PollOutcome::TimedOut { .. } => TIMEOUT_MESSAGE.to_string(),
            PollOutcome::Unverifiable { .. } => UNVERIFIABLE_MESSAGE.to_string(),
            PollOutcome::Cancelled { .. } => "Payment status check cancelled".to_string(),
        }
    }
}

pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    config: PollerConfig,
}

impl StatusPoller {
    pub fn new(source: Arc<dyn StatusSource>, config: PollerConfig) -> Self {
        Self { source, config }
    }

    /// Poll until settled, exhausted or cancelled.
    ///
    /// Cancellation is observed while waiting between attempts; an in-flight
    /// query is allowed to finish.
    pub async fn run(
        &self,
        checkout_request_id: &str,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> PollOutcome {
        info!(
            "Polling status of {} (up to {} attempts)",
            checkout_request_id, self.config.max_attempts
        );

        let mut attempts = 0;
        let mut delay = self.config.initial_delay;
        let mut last_error = None;

        while attempts < self.config.max_attempts {
            if *cancel_rx.borrow() {
                return PollOutcome::Cancelled { attempts };
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = cancel_rx.changed() => {
                    // A dropped handle cancels as well.
                    if changed.is_err() || *cancel_rx.borrow() {
                        info!("Status poll for {} cancelled", checkout_request_id);
                        return PollOutcome::Cancelled { attempts };
                    }
                    continue;
                }
            }
            delay = self.config.interval;
            attempts += 1;

            match self.source.check(checkout_request_id).await {
                Ok(snapshot) => {
                    last_error = None;
                    match snapshot.status {
                        TransactionStatus::Success => {
                            return PollOutcome::Succeeded {
                                mpesa_receipt_number: snapshot.mpesa_receipt_number,
                                attempts,
                            }
                        }
                        TransactionStatus::Failed => {
                            return PollOutcome::Failed {
                                reason: snapshot.result_desc,
                                attempts,
                            }
                        }
                        TransactionStatus::Pending => {
                            debug!(
                                "{} still pending after attempt {}",
                                checkout_request_id, attempts
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Status check {} for {} failed: {:#}",
                        attempts, checkout_request_id, e
                    );
                    last_error = Some(format!("{:#}", e));
                }
            }
        }

        match last_error {
            Some(last_error) => PollOutcome::Unverifiable {
                attempts,
                last_error,
            },
            None => {
                info!(
                    "Gave up polling {} after {} attempts",
                    checkout_request_id, attempts
                );
                PollOutcome::TimedOut { attempts }
            }
        }
    }

    /// Run the poll on its own task
    pub fn spawn(self, checkout_request_id: impl Into<String>) -> PollHandle {
        let checkout_request_id = checkout_request_id.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(&checkout_request_id, cancel_rx).await });
        PollHandle { cancel_tx, task }
    }
}

pub struct PollHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub async fn wait(self) -> anyhow::Result<PollOutcome> {
        // Keep the sender alive until the task finishes.
        let PollHandle { cancel_tx, task } = self;
        let outcome = task.await?;
        drop(cancel_tx);
        Ok(outcome)
    }
}
