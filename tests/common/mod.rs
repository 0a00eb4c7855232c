use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config_hook::action::ActionRequest;
use config_hook::action::ActionRunner;
use config_hook::containers::ContainerEventKind;
use config_hook::containers::ContainerRuntime;
use config_hook::containers::Environment;
use config_hook::discovery::DiscoveryBackend;
use config_hook::hook::HookParser;
use config_hook::store::covers;
use config_hook::store::KvBackend;
use config_hook::store::Node;
use config_hook::store::Operation;
use config_hook::store::WatchResponse;
use config_hook::utils::DeliverySink;
use config_hook::ContainerError;
use config_hook::Dispatcher;
use config_hook::DispatcherHandles;
use config_hook::StoreError;
use config_hook::WatchPolicies;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Long-poll bound of the in-memory store
pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a test waits for an action that must not happen
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

pub fn fast_policies() -> WatchPolicies {
    WatchPolicies {
        store_retry_delay_ms: 20,
        store_poll_timeout_secs: 1,
        service_retry_delay_ms: 20,
        service_wait_timeout_secs: 1,
        delivery_buffer_size: 0,
    }
}

#[derive(Default)]
struct StoreState {
    index: u64,
    values: BTreeMap<String, (String, u64)>,
    history: Vec<WatchResponse>,
}

/// Versioned in-memory store with etcd-like long-poll semantics
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    changed: Notify,
    polls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of long-polls started so far
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn put(
        &self,
        path: &str,
        value: &str,
    ) -> u64 {
        let mut state = self.state.lock();
        state.index += 1;
        let index = state.index;
        state.values.insert(path.to_string(), (value.to_string(), index));
        state.history.push(WatchResponse {
            operation: Operation::Changed,
            node: leaf(path, value, index),
            index,
        });
        drop(state);
        self.changed.notify_waiters();
        index
    }

    pub fn remove(
        &self,
        path: &str,
    ) -> u64 {
        let mut state = self.state.lock();
        state.index += 1;
        let index = state.index;
        state.values.remove(path);
        state.history.push(WatchResponse {
            operation: Operation::Deleted,
            node: leaf(path, "", index),
            index,
        });
        drop(state);
        self.changed.notify_waiters();
        index
    }

    fn first_change(
        &self,
        path: &str,
        from_index: u64,
    ) -> Option<WatchResponse> {
        self.state
            .lock()
            .history
            .iter()
            .find(|change| change.index >= from_index && covers(path, &change.node.key))
            .cloned()
    }

    fn tree(
        &self,
        path: &str,
    ) -> Option<Node> {
        let state = self.state.lock();
        if let Some((value, index)) = state.values.get(path) {
            return Some(leaf(path, value, *index));
        }
        let children: Vec<Node> = state
            .values
            .iter()
            .filter(|(key, _)| covers(path, key))
            .map(|(key, (value, index))| leaf(key, value, *index))
            .collect();
        if children.is_empty() {
            return None;
        }
        Some(Node {
            key: path.to_string(),
            dir: true,
            nodes: children,
            ..Default::default()
        })
    }
}

fn leaf(
    key: &str,
    value: &str,
    index: u64,
) -> Node {
    Node {
        key: key.to_string(),
        value: value.to_string(),
        modified_index: index,
        ..Default::default()
    }
}

#[async_trait]
impl KvBackend for MemoryStore {
    async fn get(
        &self,
        path: &str,
        _recursive: bool,
    ) -> Result<Node, StoreError> {
        self.tree(path).ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn set(
        &self,
        path: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.put(path, value);
        Ok(())
    }

    async fn delete(
        &self,
        path: &str,
    ) -> Result<(), StoreError> {
        self.remove(path);
        Ok(())
    }

    async fn remove_path(
        &self,
        path: &str,
    ) -> Result<(), StoreError> {
        let keys: Vec<String> = self
            .state
            .lock()
            .values
            .keys()
            .filter(|key| covers(path, key))
            .cloned()
            .collect();
        for key in keys {
            self.remove(&key);
        }
        Ok(())
    }

    async fn watch(
        &self,
        path: &str,
        from_index: u64,
        _recursive: bool,
    ) -> Result<Option<WatchResponse>, StoreError> {
        let from_index = if from_index == 0 {
            self.state.lock().index + 1
        } else {
            from_index
        };
        self.polls.fetch_add(1, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
        loop {
            let notified = self.changed.notified();
            if let Some(change) = self.first_change(path, from_index) {
                return Ok(Some(change));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

/// Container runtime whose containers are started and stopped by the test
#[derive(Default)]
pub struct MemoryRuntime {
    running: Mutex<HashMap<String, Environment>>,
    listeners: Mutex<Vec<(ContainerEventKind, DeliverySink<String>)>>,
}

impl MemoryRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

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

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn announce(
        &self,
        kind: ContainerEventKind,
        id: &str,
    ) {
        for (listening_for, sink) in self.listeners.lock().iter() {
            if *listening_for == kind {
                sink.deliver(id.to_string(), "memory-runtime");
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn list(&self) -> Result<Vec<String>, ContainerError> {
        Ok(self.running.lock().keys().cloned().collect())
    }

    async fn environment(
        &self,
        container_id: &str,
    ) -> Result<Environment, ContainerError> {
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
        self.listeners.lock().clear();
    }
}

pub struct RecordingRunner {
    tx: mpsc::UnboundedSender<ActionRequest>,
}

#[async_trait]
impl ActionRunner for RecordingRunner {
    async fn run(
        &self,
        request: ActionRequest,
    ) -> config_hook::Result<()> {
        let _ = self.tx.send(request);
        Ok(())
    }
}

/// A dispatcher running over in-memory collaborators
pub struct TestService {
    pub store: Arc<MemoryStore>,
    pub runtime: Arc<MemoryRuntime>,
    pub dispatcher: Option<Dispatcher>,
    actions: mpsc::UnboundedReceiver<ActionRequest>,
    shutdown_tx: watch::Sender<()>,
    task: Option<JoinHandle<config_hook::Result<()>>>,
}

impl TestService {
    pub fn new(discovery: Option<Arc<dyn DiscoveryBackend>>) -> Self {
        Self::with_store(MemoryStore::new(), discovery)
    }

    pub fn with_store(
        store: Arc<MemoryStore>,
        discovery: Option<Arc<dyn DiscoveryBackend>>,
    ) -> Self {
        let runtime = MemoryRuntime::new();
        let (tx, actions) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let dispatcher = Dispatcher::new(
            HookParser::new("CONFIG_HOOK_"),
            DispatcherHandles {
                runtime: runtime.clone(),
                store: store.clone(),
                discovery,
                runner: Arc::new(RecordingRunner { tx }),
            },
            fast_policies(),
            shutdown_rx,
        );
        Self {
            store,
            runtime,
            dispatcher: Some(dispatcher),
            actions,
            shutdown_tx,
            task: None,
        }
    }

    /// Spawns the dispatcher loop; returns a handle on its registries and watcher
    pub fn start(&mut self) -> Started {
        let dispatcher = self.dispatcher.take().expect("dispatcher already started");
        let started = Started {
            registries: dispatcher.registries(),
            watcher: dispatcher.store(),
        };
        self.task = Some(tokio::spawn(dispatcher.run()));
        started
    }

    pub async fn next_action(&mut self) -> Option<ActionRequest> {
        timeout(Duration::from_secs(2), self.actions.recv()).await.ok().flatten()
    }

    pub async fn no_action(&mut self) -> bool {
        timeout(QUIET_PERIOD, self.actions.recv()).await.is_err()
    }

    pub async fn shutdown(mut self) {
        self.shutdown_tx.send(()).unwrap();
        if let Some(task) = self.task.take() {
            timeout(Duration::from_secs(2), task).await.unwrap().unwrap().unwrap();
        }
    }
}

pub struct Started {
    pub registries: Arc<config_hook::HookRegistries>,
    pub watcher: Arc<config_hook::store::StoreWatcher>,
}

/// Polls `condition` until it holds or two seconds elapsed
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
