//! Single control loop reconciling container hook registries.
//!
//! The dispatcher is the only writer of [`HookRegistries`] and of the watch
//! interest it registers. Background loops (container events, store changes,
//! service changes) only enqueue; the dispatcher handles one event at a time.
//! Actions are spawned so a slow hook never holds the loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::HookRegistries;
use crate::action::ActionRequest;
use crate::action::ActionRunner;
use crate::action::Trigger;
use crate::containers::ContainerEventKind;
use crate::containers::ContainerRuntime;
use crate::discovery::DiscoveryAgent;
use crate::discovery::DiscoveryBackend;
use crate::discovery::Service;
use crate::discovery::ServiceEvent;
use crate::hook::HookDeclaration;
use crate::hook::HookParser;
use crate::hook::HookRegistry;
use crate::store::KvBackend;
use crate::store::NodeChange;
use crate::store::StoreWatcher;
use crate::utils::async_task::spawn_task;
use crate::utils::delivery_channel;
use crate::utils::DeliveryQueue;
use crate::utils::DeliverySink;
use crate::ContainerError;
use crate::Result;
use crate::WatchPolicies;

/// Collaborators the dispatcher drives
pub struct DispatcherHandles {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub store: Arc<dyn KvBackend>,
    pub discovery: Option<Arc<dyn DiscoveryBackend>>,
    pub runner: Arc<dyn ActionRunner>,
}

pub struct Dispatcher {
    parser: HookParser,
    registries: Arc<HookRegistries>,

    runtime: Arc<dyn ContainerRuntime>,
    runner: Arc<dyn ActionRunner>,

    store: Arc<StoreWatcher>,
    changes: DeliveryQueue<NodeChange>,

    discovery: Option<Arc<DiscoveryAgent>>,
    service_tx: DeliverySink<ServiceEvent>,
    service_events: DeliveryQueue<ServiceEvent>,

    created_tx: DeliverySink<String>,
    created: DeliveryQueue<String>,
    destroyed_tx: DeliverySink<String>,
    destroyed: DeliveryQueue<String>,

    shutdown_signal: watch::Receiver<()>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("prefix", &self.parser.prefix())
            .field("registries", &self.registries.len())
            .field("store", &self.store)
            .field("discovery", &self.discovery)
            .finish()
    }
}

impl Dispatcher {
    /// Wires the dispatcher and starts the store and discovery watch loops.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        parser: HookParser,
        handles: DispatcherHandles,
        policies: WatchPolicies,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        let (store, changes) = StoreWatcher::spawn(handles.store, policies);
        let discovery = handles
            .discovery
            .map(|backend| Arc::new(DiscoveryAgent::new(backend, policies)));

        let (service_tx, service_events) = delivery_channel(policies.delivery_buffer_size);
        // container events are never dropped, losing one would leak a registry
        let (created_tx, created) = delivery_channel(0);
        let (destroyed_tx, destroyed) = delivery_channel(0);

        Self {
            parser,
            registries: Arc::new(HookRegistries::new()),
            runtime: handles.runtime,
            runner: handles.runner,
            store: Arc::new(store),
            changes,
            discovery,
            service_tx,
            service_events,
            created_tx,
            created,
            destroyed_tx,
            destroyed,
            shutdown_signal,
        }
    }

    pub fn registries(&self) -> Arc<HookRegistries> {
        self.registries.clone()
    }

    pub fn store(&self) -> Arc<StoreWatcher> {
        self.store.clone()
    }

    pub fn discovery(&self) -> Option<Arc<DiscoveryAgent>> {
        self.discovery.clone()
    }

    /// Runs until the shutdown signal fires.
    ///
    /// Containers already running are reconciled before the first event is
    /// taken from the queues.
    pub async fn run(mut self) -> Result<()> {
        self.runtime
            .watch(self.created_tx.clone(), ContainerEventKind::Created);
        self.runtime
            .watch(self.destroyed_tx.clone(), ContainerEventKind::Destroyed);

        self.reconcile_running().await;
        info!(registries = self.registries.len(), "dispatcher started");

        loop {
            tokio::select! {
                biased;
                // P0: shutdown
                _ = self.shutdown_signal.changed() => {
                    warn!("dispatcher shutdown signal received");
                    self.shutdown().await;
                    return Ok(());
                }
                Some(container_id) = self.created.recv() => {
                    self.handle_created(&container_id).await;
                }
                Some(container_id) = self.destroyed.recv() => {
                    self.handle_destroyed(&container_id);
                }
                Some(change) = self.changes.recv() => {
                    self.handle_change(change);
                }
                Some(event) = self.service_events.recv() => {
                    self.handle_service_event(event);
                }
            }
        }
    }

    /// Treats every running container as freshly created
    async fn reconcile_running(&self) {
        match self.runtime.list().await {
            Ok(container_ids) => {
                debug!(count = container_ids.len(), "reconciling running containers");
                for container_id in container_ids {
                    self.handle_created(&container_id).await;
                }
            }
            Err(e) => error!("failed to list running containers: {}", e),
        }
    }

    pub(crate) async fn handle_created(
        &self,
        container_id: &str,
    ) {
        if self.registries.contains(container_id) {
            debug!(container = %container_id, "container already registered");
            return;
        }

        let environment = match self.runtime.environment(container_id).await {
            Ok(environment) => environment,
            Err(ContainerError::NotFound(_)) => {
                debug!(container = %container_id, "container gone before inspection");
                return;
            }
            Err(e) => {
                error!(container = %container_id, "failed to read container environment: {}", e);
                return;
            }
        };

        let mut registry = HookRegistry::new(container_id, self.parser.clone());
        registry.observe(&environment);
        registry.validate();
        if !registry.has_hooks() {
            debug!(container = %container_id, "no config hooks");
            return;
        }

        for key in registry.watched_keys() {
            self.store.watch(&key);
        }
        for service in registry.watched_services() {
            match &self.discovery {
                Some(agent) => {
                    agent.watch(Service::named(service), self.service_tx.clone());
                }
                None => warn!(
                    container = %container_id,
                    %service,
                    "service watch requested but no discovery backend is configured"
                ),
            }
        }

        info!(%registry, "hook registry stored");
        let registry = self.registries.insert(registry);
        for hook in registry.declarations() {
            self.dispatch(container_id, hook, Trigger::Created);
        }
    }

    pub(crate) fn handle_destroyed(
        &self,
        container_id: &str,
    ) {
        let Some(registry) = self.registries.remove(container_id) else {
            debug!(container = %container_id, "destroyed container held no hooks");
            return;
        };

        for key in registry.watched_keys() {
            self.store.unwatch(&key);
        }
        if let Some(agent) = &self.discovery {
            for service in registry.watched_services() {
                agent.unwatch(&service, &self.service_tx);
            }
        }
        info!(%registry, "hook registry released");
    }

    pub(crate) fn handle_change(
        &self,
        change: NodeChange,
    ) {
        let owners = self.registries.owners_of_path(&change.path);
        if owners.is_empty() {
            debug!(path = %change.path, "store change without owner");
            return;
        }
        for (container_id, hook) in owners {
            self.dispatch(
                &container_id,
                HookDeclaration::File(hook),
                Trigger::NodeChanged {
                    path: change.path.clone(),
                },
            );
        }
    }

    pub(crate) fn handle_service_event(
        &self,
        event: ServiceEvent,
    ) {
        let owners = self.registries.owners_of_service(&event.service.name);
        debug!(service = %event.service.id, index = event.index, owners = owners.len(), "service changed");
        for (container_id, hook) in owners {
            self.dispatch(
                &container_id,
                HookDeclaration::File(hook),
                Trigger::ServiceChanged {
                    service: event.service.name.clone(),
                },
            );
        }
    }

    fn dispatch(
        &self,
        container_id: &str,
        hook: HookDeclaration,
        trigger: Trigger,
    ) {
        debug!(container = %container_id, hook = %hook.id(), %trigger, "dispatching action");
        let runner = self.runner.clone();
        let request = ActionRequest {
            container_id: container_id.to_string(),
            hook,
            trigger,
        };
        spawn_task("action", move || async move { runner.run(request).await }, None);
    }

    async fn shutdown(&self) {
        self.runtime.close().await;
        self.store.close().await;
        if let Some(agent) = &self.discovery {
            agent.close();
        }
        info!(registries = self.registries.len(), "dispatcher stopped");
    }
}
