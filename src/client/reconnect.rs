//! Reconnection with exponential backoff.
//!
//! The client never reconnects on its own. Applications watch for
//! [`ClientEvent::ConnectionLost`](super::ClientEvent::ConnectionLost) and
//! call [`connect_with_backoff`].

use std::time::Duration;

use rand::Rng;

use super::client::MqttClient;
use super::error::ClientError;
use crate::core::constants::{BASE_RECONNECT_DELAY, MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_DELAY};
use crate::transport::TransportKind;

/// Backoff schedule for repeated connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Cap on the delay before jitter.
    pub max_delay: Duration,
    /// Attempts before giving up, including the first.
    pub max_attempts: u32,
    /// Add up to 50% random extra delay.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: BASE_RECONNECT_DELAY,
            max_delay: MAX_RECONNECT_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry following failed attempt `attempt` (0-based):
    /// `base * 2^attempt`, capped at `max_delay`, plus jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .map_or(self.max_delay, |d| d.min(self.max_delay));

        if !self.jitter {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=0.5);
        delay + delay.mul_f64(extra)
    }
}

/// Call [`MqttClient::connect`] until it succeeds, a fatal error occurs or
/// the attempts run out. Returns the last error in the latter cases.
pub async fn connect_with_backoff(
    client: &MqttClient,
    policy: &ReconnectPolicy,
) -> Result<TransportKind, ClientError> {
    let mut attempt = 0;
    loop {
        let err = match client.connect().await {
            Ok(kind) => return Ok(kind),
            Err(e) => e,
        };
        if err.is_fatal() {
            tracing::error!(error = %err, "giving up: fatal connection error");
            return Err(err);
        }

        attempt += 1;
        if attempt >= policy.max_attempts {
            tracing::error!(attempts = attempt, error = %err, "giving up after repeated failures");
            return Err(err);
        }

        let delay = policy.delay_for(attempt - 1);
        tracing::info!(attempt, ?delay, error = %err, "connect failed, retrying");
        tokio::time::sleep(delay).await;
    }
}
