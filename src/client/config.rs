//! Client configuration

use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::protocol::constants::{DEFAULT_RECONNECT_DELAY, MAX_RECONNECT_DELAY};

/// Client configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://localhost:8080/ws`
    pub url: String,

    /// Reopen the socket after it closes
    pub reconnect: bool,

    /// Delay before the first reconnect attempt; doubles on each failure
    pub reconnect_delay: Duration,

    /// Upper bound for the reconnect delay
    pub max_reconnect_delay: Duration,
}

impl ClientConfig {
    /// Create a config for the given server URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: MAX_RECONNECT_DELAY,
        }
    }

    /// Enable or disable reconnecting
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = enabled;
        self
    }

    /// Set the initial reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the maximum reconnect delay
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Check that the URL uses a WebSocket scheme
    pub fn validate(&self) -> Result<()> {
        if self.url.starts_with("ws://") || self.url.starts_with("wss://") {
            Ok(())
        } else {
            Err(ClientError::InvalidUrl(self.url.clone()).into())
        }
    }

    /// Delay to use after `current`, capped at the maximum
    pub(crate) fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_reconnect_delay)
    }
}
