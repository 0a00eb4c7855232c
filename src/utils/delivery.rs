//! Non-blocking delivery queues between the watch loops and their consumers.
//!
//! A capacity of zero selects an unbounded queue; any other value a bounded
//! one that drops the newest item when full. Sending never awaits.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::warn;

use crate::metrics::DELIVERIES_DROPPED;

/// Producer half handed to a watch loop
#[derive(Debug)]
pub enum DeliverySink<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

/// Consumer half kept by the subscriber
#[derive(Debug)]
pub enum DeliveryQueue<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

pub fn delivery_channel<T>(capacity: usize) -> (DeliverySink<T>, DeliveryQueue<T>) {
    if capacity > 0 {
        let (tx, rx) = mpsc::channel(capacity);
        (DeliverySink::Bounded(tx), DeliveryQueue::Bounded(rx))
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        (DeliverySink::Unbounded(tx), DeliveryQueue::Unbounded(rx))
    }
}

impl<T> Clone for DeliverySink<T> {
    fn clone(&self) -> Self {
        match self {
            DeliverySink::Bounded(tx) => DeliverySink::Bounded(tx.clone()),
            DeliverySink::Unbounded(tx) => DeliverySink::Unbounded(tx.clone()),
        }
    }
}

impl<T> DeliverySink<T> {
    /// Hands `item` to the queue without waiting.
    ///
    /// Returns false when the item was dropped; `queue` labels the drop counter.
    pub fn deliver(
        &self,
        item: T,
        queue: &str,
    ) -> bool {
        match self {
            DeliverySink::Bounded(tx) => match tx.try_send(item) {
                Ok(()) => return true,
                Err(TrySendError::Full(_)) => {
                    warn!(queue, "delivery queue full, dropping newest notification")
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(queue, "delivery queue closed, notification discarded")
                }
            },
            DeliverySink::Unbounded(tx) => {
                if tx.send(item).is_ok() {
                    return true;
                }
                debug!(queue, "delivery queue closed, notification discarded");
            }
        }
        DELIVERIES_DROPPED.with_label_values(&[queue]).inc();
        false
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DeliverySink::Bounded(tx) => tx.is_closed(),
            DeliverySink::Unbounded(tx) => tx.is_closed(),
        }
    }

    /// True when both sinks feed the same queue
    pub fn same_channel(
        &self,
        other: &Self,
    ) -> bool {
        match (self, other) {
            (DeliverySink::Bounded(a), DeliverySink::Bounded(b)) => a.same_channel(b),
            (DeliverySink::Unbounded(a), DeliverySink::Unbounded(b)) => a.same_channel(b),
            _ => false,
        }
    }
}

impl<T> DeliveryQueue<T> {
    pub async fn recv(&mut self) -> Option<T> {
        match self {
            DeliveryQueue::Bounded(rx) => rx.recv().await,
            DeliveryQueue::Unbounded(rx) => rx.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Option<T> {
        match self {
            DeliveryQueue::Bounded(rx) => rx.try_recv().ok(),
            DeliveryQueue::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}
