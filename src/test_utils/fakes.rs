use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::action::ActionRequest;
use crate::action::ActionRunner;
use crate::containers::ContainerEventKind;
use crate::containers::ContainerRuntime;
use crate::containers::Environment;
use crate::discovery::DiscoveryBackend;
use crate::discovery::Service;
use crate::discovery::ServiceDocument;
use crate::store::KvBackend;
use crate::store::Node;
use crate::store::Operation;
use crate::store::WatchResponse;
use crate::utils::DeliverySink;
use crate::ContainerError;
use crate::DiscoveryError;
use crate::Result;
use crate::StoreError;

type Scripted<T> = tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>;

/// Store whose long-poll answers are pushed by the test
pub struct ScriptedStore {
    script: Scripted<std::result::Result<Option<WatchResponse>, StoreError>>,
    from_indexes: Mutex<Vec<u64>>,
}

pub type StoreScript = mpsc::UnboundedSender<std::result::Result<Option<WatchResponse>, StoreError>>;

impl ScriptedStore {
    pub fn new() -> (Arc<Self>, StoreScript) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            script: tokio::sync::Mutex::new(rx),
            from_indexes: Mutex::new(Vec::new()),
        });
        (store, tx)
    }

    /// Indexes the long-polls were issued with, in order
    pub fn from_indexes(&self) -> Vec<u64> {
        self.from_indexes.lock().clone()
    }

    pub fn polls(&self) -> usize {
        self.from_indexes.lock().len()
    }
}

pub fn changed(
    path: &str,
    index: u64,
) -> std::result::Result<Option<WatchResponse>, StoreError> {
    Ok(Some(WatchResponse {
        operation: Operation::Changed,
        node: Node {
            key: path.to_string(),
            value: format!("value@{index}"),
            modified_index: index,
            ..Default::default()
        },
        index,
    }))
}

#[async_trait]
impl KvBackend for ScriptedStore {
    async fn get(
        &self,
        path: &str,
        _recursive: bool,
    ) -> std::result::Result<Node, StoreError> {
        Err(StoreError::NotFound(path.to_string()))
    }

    async fn set(
        &self,
        _path: &str,
        _value: &str,
    ) -> std::result::Result<(), StoreError> {
        Ok(())
    }

    async fn delete(
        &self,
        _path: &str,
    ) -> std::result::Result<(), StoreError> {
        Ok(())
    }

    async fn remove_path(
        &self,
        _path: &str,
    ) -> std::result::Result<(), StoreError> {
        Ok(())
    }

    async fn watch(
        &self,
        _path: &str,
        from_index: u64,
        _recursive: bool,
    ) -> std::result::Result<Option<WatchResponse>, StoreError> {
        self.from_indexes.lock().push(from_index);
        let next = self.script.lock().await.recv().await;
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

/// Container runtime driven by the test
#[derive(Default)]
pub struct FakeRuntime {
    running: Mutex<HashMap<String, Environment>>,
    listeners: Mutex<Vec<(ContainerEventKind, DeliverySink<String>)>>,
    closed: Mutex<bool>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a container without announcing it
    pub fn insert(
        &self,
        id: &str,
        env: &[(&str, &str)],
    ) {
        let env = env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.running.lock().insert(id.to_string(), env);
    }

    pub fn start(
        &self,
        id: &str,
        env: &[(&str, &str)],
    ) {
        self.insert(id, env);
        self.announce(ContainerEventKind::Created, id);
    }

    pub fn stop(
        &self,
        id: &str,
    ) {
        self.running.lock().remove(id);
        self.announce(ContainerEventKind::Destroyed, id);
    }

    pub fn announce(
        &self,
        kind: ContainerEventKind,
        id: &str,
    ) {
        for (listening_for, sink) in self.listeners.lock().iter() {
            if *listening_for == kind {
                sink.deliver(id.to_string(), "fake-runtime");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self) -> std::result::Result<Vec<String>, ContainerError> {
        let mut ids: Vec<String> = self.running.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn environment(
        &self,
        container_id: &str,
    ) -> std::result::Result<Environment, ContainerError> {
        self.running
            .lock()
            .get(container_id)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound(container_id.to_string()))
    }

    fn watch(
        &self,
        events: DeliverySink<String>,
        kind: ContainerEventKind,
    ) {
        self.listeners.lock().push((kind, events));
    }

    async fn close(&self) {
        *self.closed.lock() = true;
        self.listeners.lock().clear();
    }
}

/// Action runner forwarding every request to the test
pub struct RecordingRunner {
    tx: mpsc::UnboundedSender<ActionRequest>,
}

impl RecordingRunner {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ActionRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl ActionRunner for RecordingRunner {
    async fn run(
        &self,
        request: ActionRequest,
    ) -> Result<()> {
        let _ = self.tx.send(request);
        Ok(())
    }
}

/// Discovery backend whose index moves are pushed by the test
pub struct ScriptedDiscovery {
    baseline: u64,
    script: Scripted<std::result::Result<u64, DiscoveryError>>,
    calls: Mutex<Vec<(String, u64)>>,
    documents: Mutex<HashMap<String, Vec<ServiceDocument>>>,
    services: Mutex<Vec<Service>>,
}

pub type DiscoveryScript = mpsc::UnboundedSender<std::result::Result<u64, DiscoveryError>>;

impl ScriptedDiscovery {
    pub fn new(baseline: u64) -> (Arc<Self>, DiscoveryScript) {
        let (tx, rx) = mpsc::unbounded_channel();
        let discovery = Arc::new(Self {
            baseline,
            script: tokio::sync::Mutex::new(rx),
            calls: Mutex::new(Vec::new()),
            documents: Mutex::new(HashMap::new()),
            services: Mutex::new(Vec::new()),
        });
        (discovery, tx)
    }

    pub fn set_documents(
        &self,
        name: &str,
        documents: Vec<ServiceDocument>,
    ) {
        self.documents.lock().insert(name.to_string(), documents);
    }

    pub fn set_services(
        &self,
        services: Vec<Service>,
    ) {
        *self.services.lock() = services;
    }

    /// `(service id, index)` of every query issued
    pub fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().clone()
    }

    /// Number of queries issued for one service
    pub fn calls_for(
        &self,
        service_id: &str,
    ) -> usize {
        self.calls.lock().iter().filter(|(id, _)| id == service_id).count()
    }
}

#[async_trait]
impl DiscoveryBackend for ScriptedDiscovery {
    async fn wait_for_change(
        &self,
        service: &Service,
        index: u64,
        _wait: Duration,
    ) -> std::result::Result<u64, DiscoveryError> {
        self.calls.lock().push((service.id.clone(), index));
        if index == 0 {
            return Ok(self.baseline);
        }
        let next = self.script.lock().await.recv().await;
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn documents(
        &self,
        name: &str,
    ) -> std::result::Result<Vec<ServiceDocument>, DiscoveryError> {
        Ok(self.documents.lock().get(name).cloned().unwrap_or_default())
    }

    async fn services(&self) -> std::result::Result<Vec<Service>, DiscoveryError> {
        Ok(self.services.lock().clone())
    }
}
