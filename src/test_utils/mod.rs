//! Fakes shared by the unit tests of the watch loops and the dispatcher.

mod fakes;
pub use fakes::*;

use std::time::Duration;

use tokio::time::timeout;

use crate::utils::DeliveryQueue;
use crate::WatchPolicies;

/// Policies with short delays so retry paths run quickly in tests
pub fn test_policies() -> WatchPolicies {
    WatchPolicies {
        store_retry_delay_ms: 20,
        store_poll_timeout_secs: 1,
        service_retry_delay_ms: 20,
        service_wait_timeout_secs: 1,
        delivery_buffer_size: 0,
    }
}

/// Next item of the queue, or `None` if nothing arrives within `ms`
pub async fn recv_within<T>(
    queue: &mut DeliveryQueue<T>,
    ms: u64,
) -> Option<T> {
    timeout(Duration::from_millis(ms), queue.recv()).await.ok().flatten()
}

/// Polls `condition` until it holds or one second elapsed
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
