//! Bounded redelivery and dead-letter routing.
//!
//! Each external call is wrapped by [`RedeliveryPolicy::attempt`]:
//! a retryable failure is attempted again until `max_redeliveries` is used up,
//! after which the call reports [`SyncError::Exhausted`]. The pipeline runner
//! then hands the original inbound message to a [`DeadLetterChannel`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::error::{Result, SyncError};
use crate::domain::Message;
use crate::transport::MessageBus;

/// Redelivery policy for one router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeliveryPolicy {
    /// Attempts after the first one
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    /// Delay before the first redelivery in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between redeliveries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each redelivery)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_redeliveries() -> u32 {
    5
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_redeliveries: default_max_redeliveries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RedeliveryPolicy {
    /// A policy that redelivers `max_redeliveries` times without waiting
    pub fn immediate(max_redeliveries: u32) -> Self {
        Self {
            max_redeliveries,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier {} must be >= 1.0",
                self.backoff_multiplier
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("max_delay_ms must be >= initial_delay_ms".to_string());
        }
        Ok(())
    }

    /// Calculate delay before redelivery number `redelivery` (1-indexed)
    pub fn delay_for_attempt(&self, redelivery: u32) -> Duration {
        if redelivery <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((redelivery - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Total attempts a persistently failing call receives
    pub fn max_attempts(&self) -> u32 {
        self.max_redeliveries.saturating_add(1)
    }

    /// Run `call` until it succeeds, fails without being retryable, or the
    /// redelivery budget is spent.
    pub async fn attempt<T, F, Fut>(&self, call: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.max_redeliveries => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        call,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Call failed, redelivering"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(SyncError::Exhausted {
                        call: call.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Overflow routing for messages whose processing permanently failed
#[derive(Clone)]
pub struct DeadLetterChannel {
    destination: Option<String>,
    bus: Arc<dyn MessageBus>,
}

impl DeadLetterChannel {
    pub fn new(destination: Option<String>, bus: Arc<dyn MessageBus>) -> Self {
        Self { destination, bus }
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Forward the unmodified original message to the overflow destination.
    ///
    /// Returns whether the message was handed to the bus. Without a
    /// destination the failure is only logged.
    pub async fn route(&self, router: &str, original: &Message, failure: &SyncError) -> bool {
        let digest = original.digest();

        let Some(destination) = self.destination.as_deref() else {
            error!(
                router,
                %digest,
                error = %failure,
                "Processing failed permanently, no dead-letter destination; dropping message"
            );
            return false;
        };

        error!(
            router,
            destination,
            %digest,
            error = %failure,
            "Processing failed permanently, dead-lettering original message"
        );

        match self.bus.publish(destination, original.clone()).await {
            Ok(()) => true,
            Err(e) => {
                error!(router, destination, %digest, error = %e, "Failed to publish dead letter");
                false
            }
        }
    }
}
