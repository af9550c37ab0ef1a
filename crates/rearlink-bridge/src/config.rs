//! Bridge configuration.

use std::time::Duration;

use rearlink_core::config::BrokerSettings;

/// Runtime configuration for a [`PermissionBridge`](crate::PermissionBridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Identity announced to the broker in the handshake.
    pub client_id: String,
    /// Bound on opening the link plus the handshake.
    pub connect_timeout: Duration,
    /// Bound on one invocation round-trip.
    pub invoke_timeout: Duration,
    /// Retry policy for failed writes.
    pub retry: RetryPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from(&BrokerSettings::default())
    }
}

impl From<&BrokerSettings> for BridgeConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            client_id: settings.client_id.clone(),
            connect_timeout: settings.connect_timeout(),
            invoke_timeout: settings.invoke_timeout(),
            retry: RetryPolicy {
                delay: settings.retry_delay(),
                ..RetryPolicy::default()
            },
        }
    }
}

/// Bounded retry for transient write failures on a live link.
///
/// Only failures where the request provably never reached the broker are
/// retried. Broker unavailability and refusals are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before each retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt should be made after `attempt` failures (0-indexed).
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
