use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Long-poll and delivery policies for the background watch loops
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct WatchPolicies {
    /// Fixed sleep after a failed store long-poll (unit: milliseconds)
    #[serde(default = "default_store_retry_delay_ms")]
    pub store_retry_delay_ms: u64,

    /// Upper bound of a single store long-poll (unit: seconds)
    #[serde(default = "default_store_poll_timeout_secs")]
    pub store_poll_timeout_secs: u64,

    /// Fixed sleep after a failed service query (unit: milliseconds)
    #[serde(default = "default_service_retry_delay_ms")]
    pub service_retry_delay_ms: u64,

    /// Wait time passed to a blocking service query (unit: seconds)
    #[serde(default = "default_service_wait_timeout_secs")]
    pub service_wait_timeout_secs: u64,

    /// Capacity of the delivery queues (0 means unbounded)
    #[serde(default)]
    pub delivery_buffer_size: usize,
}

impl Default for WatchPolicies {
    fn default() -> Self {
        Self {
            store_retry_delay_ms: default_store_retry_delay_ms(),
            store_poll_timeout_secs: default_store_poll_timeout_secs(),
            service_retry_delay_ms: default_service_retry_delay_ms(),
            service_wait_timeout_secs: default_service_wait_timeout_secs(),
            delivery_buffer_size: 0,
        }
    }
}

impl WatchPolicies {
    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_millis(self.store_retry_delay_ms)
    }

    pub fn store_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.store_poll_timeout_secs)
    }

    pub fn service_retry_delay(&self) -> Duration {
        Duration::from_millis(self.service_retry_delay_ms)
    }

    pub fn service_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.service_wait_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_retry_delay_ms == 0 || self.service_retry_delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "watch retry delays must be greater than 0 to avoid busy polling".into(),
            ));
        }
        if self.store_poll_timeout_secs == 0 || self.service_wait_timeout_secs == 0 {
            return Err(Error::InvalidConfig("watch poll timeouts must be greater than 0".into()));
        }
        Ok(())
    }
}

fn default_store_retry_delay_ms() -> u64 {
    3000
}
fn default_store_poll_timeout_secs() -> u64 {
    60
}
fn default_service_retry_delay_ms() -> u64 {
    5000
}
fn default_service_wait_timeout_secs() -> u64 {
    60
}
