//! Long-poll watch engine over a [`KvBackend`].
//!
//! ```text
//! Polling --change--> ProcessChange --> Polling
//!    |  \--no change (poll timeout)---> Polling
//!    |--error--> Backoff --delay--> Polling
//!    \--cancel--> Draining --> Stopped
//! ```
//!
//! One background loop per store connection. Subscriber interest is a
//! ref-counted key set behind a read/write lock: the loop only reads it,
//! `watch`/`unwatch` write it. Changes are handed to a [`DeliverySink`]
//! without awaiting, so a slow consumer never stalls the poll cursor.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::covers;
use super::normalize_path;
use super::KvBackend;
use super::Node;
use super::WatchResponse;
use crate::constants::STORE_BASE_KEY;
use crate::metrics::NODE_CHANGES_DELIVERED;
use crate::metrics::WATCH_BACKOFFS;
use crate::utils::delivery_channel;
use crate::utils::DeliveryQueue;
use crate::utils::DeliverySink;
use crate::StoreError;
use crate::WatchPolicies;

/// Label of this loop in the delivery and backoff counters
const STORE_LOOP: &str = "store";

/// States of the store poll loop
#[derive(Debug)]
pub enum WatchState {
    Polling,
    ProcessChange(WatchResponse),
    Backoff,
    Draining,
    Stopped,
}

/// Result of one poll round, before any side effect is applied
#[derive(Debug)]
pub enum PollOutcome {
    Changed(WatchResponse),
    NoChange,
    Failed(StoreError),
    Cancelled,
}

impl WatchState {
    /// Transition out of `Polling`
    pub fn after_poll(outcome: PollOutcome) -> WatchState {
        match outcome {
            PollOutcome::Changed(response) => WatchState::ProcessChange(response),
            PollOutcome::NoChange => WatchState::Polling,
            PollOutcome::Failed(_) => WatchState::Backoff,
            PollOutcome::Cancelled => WatchState::Draining,
        }
    }
}

/// Interest record of one watched key
#[derive(Debug, Default)]
pub struct WatchSubscription {
    subscribers: usize,
    last_delivered_index: AtomicU64,
}

impl WatchSubscription {
    pub fn subscribers(&self) -> usize {
        self.subscribers
    }

    pub fn last_delivered_index(&self) -> u64 {
        self.last_delivered_index.load(Ordering::Acquire)
    }
}

type InterestSet = Arc<RwLock<HashMap<String, WatchSubscription>>>;

pub struct StoreWatcher {
    backend: Arc<dyn KvBackend>,
    interest: InterestSet,
    interest_changed: Arc<Notify>,
    wait_index: Arc<AtomicU64>,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StoreWatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StoreWatcher")
            .field("watched", &self.interest.read().len())
            .field("wait_index", &self.wait_index())
            .finish()
    }
}

impl StoreWatcher {
    /// Starts the background poll loop and returns the watcher with the
    /// queue its changes are delivered to
    pub fn spawn(
        backend: Arc<dyn KvBackend>,
        policies: WatchPolicies,
    ) -> (Self, DeliveryQueue<super::NodeChange>) {
        let (sink, queue) = delivery_channel(policies.delivery_buffer_size);
        let watcher = Self {
            backend: backend.clone(),
            interest: Arc::new(RwLock::new(HashMap::new())),
            interest_changed: Arc::new(Notify::new()),
            wait_index: Arc::new(AtomicU64::new(0)),
            token: CancellationToken::new(),
            handle: Mutex::new(None),
        };

        let poll_loop = PollLoop {
            backend,
            interest: watcher.interest.clone(),
            interest_changed: watcher.interest_changed.clone(),
            wait_index: watcher.wait_index.clone(),
            token: watcher.token.clone(),
            sink,
            policies,
        };
        *watcher.handle.lock() = Some(tokio::spawn(poll_loop.run()));

        (watcher, queue)
    }

    /// Adds one subscriber to `key`; returns the subscriber count
    pub fn watch(
        &self,
        key: &str,
    ) -> usize {
        let key = normalize_path(key);
        let mut interest = self.interest.write();
        let subscription = interest.entry(key.clone()).or_default();
        subscription.subscribers += 1;
        let count = subscription.subscribers;
        drop(interest);

        if count == 1 {
            info!(%key, "watching store key");
            self.interest_changed.notify_one();
        } else {
            debug!(%key, subscribers = count, "store key already watched");
        }
        count
    }

    /// Removes one subscriber from `key`; returns the remaining count.
    /// Unknown keys are ignored.
    pub fn unwatch(
        &self,
        key: &str,
    ) -> usize {
        let key = normalize_path(key);
        let mut interest = self.interest.write();
        let Some(subscription) = interest.get_mut(&key) else {
            debug!(%key, "unwatch of a key nobody watches");
            return 0;
        };
        subscription.subscribers -= 1;
        let count = subscription.subscribers;
        if count == 0 {
            interest.remove(&key);
            info!(%key, "stopped watching store key");
        }
        count
    }

    pub fn subscribers(
        &self,
        key: &str,
    ) -> usize {
        self.interest
            .read()
            .get(&normalize_path(key))
            .map(WatchSubscription::subscribers)
            .unwrap_or(0)
    }

    pub fn last_delivered_index(
        &self,
        key: &str,
    ) -> Option<u64> {
        self.interest
            .read()
            .get(&normalize_path(key))
            .map(WatchSubscription::last_delivered_index)
    }

    pub fn watched_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.interest.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Index the next long-poll resumes from, `0` meaning a fresh baseline
    pub fn wait_index(&self) -> u64 {
        self.wait_index.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the poll loop and waits for it to finish.
    ///
    /// Nothing is delivered once this returns.
    pub async fn close(&self) {
        self.token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("store watch loop ended abnormally: {:?}", e);
            }
        }
    }

    pub async fn get(
        &self,
        path: &str,
    ) -> Result<Node, StoreError> {
        self.backend.get(&normalize_path(path), false).await
    }

    pub async fn set(
        &self,
        path: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.backend.set(&normalize_path(path), value).await
    }

    pub async fn delete(
        &self,
        path: &str,
    ) -> Result<(), StoreError> {
        self.backend.delete(&normalize_path(path)).await
    }

    pub async fn remove_path(
        &self,
        path: &str,
    ) -> Result<(), StoreError> {
        self.backend.remove_path(&normalize_path(path)).await
    }

    /// Direct children of a directory
    pub async fn list(
        &self,
        path: &str,
    ) -> Result<Vec<Node>, StoreError> {
        let path = normalize_path(path);
        let node = self.backend.get(&path, false).await?;
        if !node.dir {
            return Err(StoreError::NotADirectory(path));
        }
        Ok(node.nodes)
    }

    /// Every leaf path below `path`
    pub async fn paths(
        &self,
        path: &str,
    ) -> Result<Vec<String>, StoreError> {
        let node = self.backend.get(&normalize_path(path), true).await?;
        Ok(node.leaves())
    }
}

impl Drop for StoreWatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct PollLoop {
    backend: Arc<dyn KvBackend>,
    interest: InterestSet,
    interest_changed: Arc<Notify>,
    wait_index: Arc<AtomicU64>,
    token: CancellationToken,
    sink: DeliverySink<super::NodeChange>,
    policies: WatchPolicies,
}

impl PollLoop {
    async fn run(self) {
        debug!("store watch loop started");
        let mut state = WatchState::Polling;
        loop {
            state = match state {
                WatchState::Polling => WatchState::after_poll(self.poll().await),
                WatchState::ProcessChange(response) => self.process(response),
                WatchState::Backoff => self.backoff().await,
                WatchState::Draining => {
                    debug!("store watch loop draining");
                    WatchState::Stopped
                }
                WatchState::Stopped => break,
            };
        }
        info!("store watch loop stopped");
    }

    async fn poll(&self) -> PollOutcome {
        // Park while nothing is watched, then start over from a fresh baseline
        while self.is_idle() {
            self.wait_index.store(0, Ordering::Release);
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return PollOutcome::Cancelled,
                _ = self.interest_changed.notified() => {}
            }
        }

        let from_index = self.wait_index.load(Ordering::Acquire);
        trace!(from_index, "long-polling store");
        tokio::select! {
            biased;
            _ = self.token.cancelled() => PollOutcome::Cancelled,
            result = self.backend.watch(STORE_BASE_KEY, from_index, true) => match result {
                Ok(Some(response)) => PollOutcome::Changed(response),
                Ok(None) => PollOutcome::NoChange,
                Err(e) => {
                    warn!(from_index, "store long-poll failed: {}", e);
                    PollOutcome::Failed(e)
                }
            },
        }
    }

    fn is_idle(&self) -> bool {
        self.interest.read().is_empty()
    }

    fn process(
        &self,
        response: WatchResponse,
    ) -> WatchState {
        // Advance even when nobody watches the key, otherwise the same change
        // would be replayed on every round.
        self.wait_index.store(response.index + 1, Ordering::Release);

        if self.token.is_cancelled() {
            return WatchState::Draining;
        }

        let matched = self
            .interest
            .read()
            .keys()
            .any(|key| covers(key, &response.node.key));
        if !matched {
            trace!(path = %response.node.key, "change on an unwatched key");
            return WatchState::Polling;
        }

        let change = response.to_change();
        debug!(
            path = %change.path,
            operation = %change.operation,
            index = response.index,
            "delivering store change"
        );
        if !self.sink.deliver(change, STORE_LOOP) {
            return WatchState::Polling;
        }
        NODE_CHANGES_DELIVERED
            .with_label_values(&[response.operation.as_str()])
            .inc();
        for (key, subscription) in self.interest.read().iter() {
            if covers(key, &response.node.key) {
                subscription
                    .last_delivered_index
                    .store(response.index, Ordering::Release);
            }
        }
        WatchState::Polling
    }

    async fn backoff(&self) -> WatchState {
        WATCH_BACKOFFS.with_label_values(&[STORE_LOOP]).inc();
        self.wait_index.store(0, Ordering::Release);
        tokio::select! {
            biased;
            _ = self.token.cancelled() => WatchState::Draining,
            _ = tokio::time::sleep(self.policies.store_retry_delay()) => WatchState::Polling,
        }
    }
}
