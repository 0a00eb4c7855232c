use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::DiscoveryBackend;
use super::Endpoint;
use super::Service;
use super::ServiceEvent;
use super::ServiceQuery;
use crate::metrics::SERVICE_EVENTS;
use crate::metrics::WATCH_BACKOFFS;
use crate::utils::DeliverySink;
use crate::DiscoveryError;
use crate::WatchPolicies;

const SERVICE_LOOP: &str = "service";

/// One subscriber queue and the number of watches it holds
struct Listener {
    sink: DeliverySink<ServiceEvent>,
    watches: usize,
}

type Sinks = Arc<RwLock<Vec<Listener>>>;

/// Ref-counted watch on one service, owning its long-poll cursor
struct ServiceWatcher {
    service: Service,
    wait_index: Arc<AtomicU64>,
    token: CancellationToken,
    sinks: Sinks,
}

/// Resolves services and multiplexes their watchers.
///
/// At most one long-poll loop runs per service id, whatever the number of
/// listeners.
pub struct DiscoveryAgent {
    backend: Arc<dyn DiscoveryBackend>,
    policies: WatchPolicies,
    watchers: Mutex<HashMap<String, ServiceWatcher>>,
}

impl std::fmt::Debug for DiscoveryAgent {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DiscoveryAgent")
            .field("watchers", &self.watchers.lock().len())
            .finish()
    }
}

impl ServiceWatcher {
    fn listeners(&self) -> usize {
        self.sinks.read().iter().map(|l| l.watches).sum()
    }
}

impl DiscoveryAgent {
    pub fn new(
        backend: Arc<dyn DiscoveryBackend>,
        policies: WatchPolicies,
    ) -> Self {
        Self {
            backend,
            policies,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a listener to `service`, starting its poll loop on first use.
    ///
    /// Returns the listener count. Events go to every distinct `updates`
    /// sink registered for the service, once per sink.
    pub fn watch(
        &self,
        service: Service,
        updates: DeliverySink<ServiceEvent>,
    ) -> usize {
        let mut watchers = self.watchers.lock();
        if let Some(watcher) = watchers.get_mut(&service.id) {
            {
                let mut sinks = watcher.sinks.write();
                match sinks.iter_mut().find(|l| l.sink.same_channel(&updates)) {
                    Some(listener) => listener.watches += 1,
                    None => sinks.push(Listener {
                        sink: updates,
                        watches: 1,
                    }),
                }
            }
            let listeners = watcher.listeners();
            debug!(service = %service.id, listeners, "service already watched");
            return listeners;
        }

        info!(service = %service.id, "watching service");
        let watcher = ServiceWatcher {
            service: service.clone(),
            wait_index: Arc::new(AtomicU64::new(0)),
            token: CancellationToken::new(),
            sinks: Arc::new(RwLock::new(vec![Listener {
                sink: updates,
                watches: 1,
            }])),
        };
        let poll_loop = ServiceLoop {
            backend: self.backend.clone(),
            service: service.clone(),
            wait_index: watcher.wait_index.clone(),
            token: watcher.token.clone(),
            sinks: watcher.sinks.clone(),
            policies: self.policies,
        };
        tokio::spawn(poll_loop.run());
        watchers.insert(service.id, watcher);
        1
    }

    /// Drops one watch held by `updates`; the sink stops receiving events
    /// once its last watch is gone and the loop stops with the last sink.
    /// Returns the remaining listener count.
    pub fn unwatch(
        &self,
        service_id: &str,
        updates: &DeliverySink<ServiceEvent>,
    ) -> usize {
        let mut watchers = self.watchers.lock();
        let Some(watcher) = watchers.get_mut(service_id) else {
            debug!(service = %service_id, "unwatch of a service nobody watches");
            return 0;
        };
        {
            let mut sinks = watcher.sinks.write();
            match sinks.iter().position(|l| l.sink.same_channel(updates)) {
                Some(at) => {
                    sinks[at].watches -= 1;
                    if sinks[at].watches == 0 {
                        sinks.remove(at);
                    }
                }
                None => debug!(service = %service_id, "unwatch from a sink that holds no watch"),
            }
        }
        let remaining = watcher.listeners();
        if remaining == 0 {
            if let Some(watcher) = watchers.remove(service_id) {
                watcher.token.cancel();
                info!(service = %watcher.service.id, "stopped watching service");
            }
        }
        remaining
    }

    pub fn listeners(
        &self,
        service_id: &str,
    ) -> usize {
        self.watchers.lock().get(service_id).map_or(0, |w| w.listeners())
    }

    /// Long-poll cursor of a watched service
    pub fn wait_index(
        &self,
        service_id: &str,
    ) -> Option<u64> {
        self.watchers
            .lock()
            .get(service_id)
            .map(|w| w.wait_index.load(Ordering::Acquire))
    }

    pub fn watched_services(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.watchers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current endpoints of the named service.
    ///
    /// Documents without a usable address or port are skipped with a warning.
    pub async fn endpoints(
        &self,
        name: &str,
    ) -> Result<Vec<Endpoint>, DiscoveryError> {
        let documents = self.backend.documents(name).await?;
        let mut endpoints = Vec::with_capacity(documents.len());
        for document in documents {
            match document.endpoint() {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(e) => warn!(service = %name, "skipping service document: {}", e),
            }
        }
        Ok(endpoints)
    }

    pub async fn services(
        &self,
        query: &ServiceQuery,
    ) -> Result<Vec<Service>, DiscoveryError> {
        let services = self.backend.services().await?;
        Ok(services.into_iter().filter(|s| query.matches(s)).collect())
    }

    /// Stops every service loop
    pub fn close(&self) {
        let mut watchers = self.watchers.lock();
        for (_, watcher) in watchers.drain() {
            watcher.token.cancel();
        }
        debug!("discovery agent closed");
    }
}

impl Drop for DiscoveryAgent {
    fn drop(&mut self) {
        self.close();
    }
}

struct ServiceLoop {
    backend: Arc<dyn DiscoveryBackend>,
    service: Service,
    wait_index: Arc<AtomicU64>,
    token: CancellationToken,
    sinks: Sinks,
    policies: WatchPolicies,
}

impl ServiceLoop {
    async fn run(self) {
        let wait = self.policies.service_wait_timeout();
        loop {
            let index = self.wait_index.load(Ordering::Acquire);
            let result = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                result = self.backend.wait_for_change(&self.service, index, wait) => result,
            };

            match result {
                Ok(0) => self.backoff(DiscoveryError::MissingIndex).await,
                Ok(observed) if index == 0 => {
                    debug!(service = %self.service.id, index = observed, "service baseline");
                    self.wait_index.store(observed, Ordering::Release);
                }
                Ok(observed) if observed == index => {
                    trace!(service = %self.service.id, index, "service unchanged");
                }
                // a lower index means the backend was reset, which is a change too
                Ok(observed) => {
                    self.wait_index.store(observed, Ordering::Release);
                    self.emit(observed);
                }
                Err(e) => self.backoff(e).await,
            }

            if self.token.is_cancelled() {
                break;
            }
        }
        debug!(service = %self.service.id, "service watch loop stopped");
    }

    fn emit(
        &self,
        index: u64,
    ) {
        if self.token.is_cancelled() {
            return;
        }
        debug!(service = %self.service.id, index, "service changed");
        SERVICE_EVENTS.with_label_values(&[&self.service.name]).inc();
        let event = ServiceEvent {
            service: self.service.clone(),
            index,
        };
        let mut sinks = self.sinks.write();
        sinks.retain(|l| {
            if l.sink.is_closed() {
                debug!(service = %self.service.id, "pruning closed service listener");
                return false;
            }
            true
        });
        for listener in sinks.iter() {
            listener.sink.deliver(event.clone(), SERVICE_LOOP);
        }
    }

    async fn backoff(
        &self,
        error: DiscoveryError,
    ) {
        warn!(service = %self.service.id, "service query failed: {}", error);
        WATCH_BACKOFFS.with_label_values(&[SERVICE_LOOP]).inc();
        self.wait_index.store(0, Ordering::Release);
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep(self.policies.service_retry_delay()) => {}
        }
    }
}
