use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bollard::container::InspectContainerOptions;
use bollard::container::ListContainersOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use bollard::API_DEFAULT_VERSION;
use futures::StreamExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::parse_environment;
use super::ContainerEventKind;
use super::ContainerRuntime;
use super::Environment;
use crate::constants::DOCKER_EVENT_DESTROY;
use crate::constants::DOCKER_EVENT_DIE;
use crate::constants::DOCKER_EVENT_START;
use crate::utils::net::ensure_unix_socket;
use crate::utils::DeliverySink;
use crate::ContainerError;
use crate::DockerConfig;

const EVENTS_QUEUE: &str = "containers";
/// Pause before re-subscribing after the event stream broke
const EVENTS_RETRY_DELAY: Duration = Duration::from_secs(1);

type Listeners = Arc<RwLock<Vec<(ContainerEventKind, DeliverySink<String>)>>>;

/// Maps a docker event action onto a lifecycle transition
pub(crate) fn event_kind(action: &str) -> Option<ContainerEventKind> {
    match action {
        DOCKER_EVENT_START => Some(ContainerEventKind::Created),
        DOCKER_EVENT_DIE | DOCKER_EVENT_DESTROY => Some(ContainerEventKind::Destroyed),
        _ => None,
    }
}

pub(crate) fn map_error(
    error: bollard::errors::Error,
    container_id: &str,
) -> ContainerError {
    match error {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
            ContainerError::NotFound(container_id.to_string())
        }
        e => ContainerError::Docker(e),
    }
}

/// Resume point after an event, in the `<seconds>.<nanoseconds>` form the
/// events endpoint takes for `since`; one nanosecond past the event.
pub(crate) fn event_cursor(
    time: Option<i64>,
    time_nano: Option<i64>,
) -> Option<String> {
    match (time_nano, time) {
        (Some(nanos), _) => {
            let next = nanos + 1;
            Some(format!("{}.{:09}", next / 1_000_000_000, next % 1_000_000_000))
        }
        (None, Some(seconds)) => Some(seconds.to_string()),
        (None, None) => None,
    }
}

fn now_cursor() -> Option<String> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    Some(format!("{}.{:09}", now.as_secs(), now.subsec_nanos()))
}

/// Hands `container_id` to every listener registered for `kind`
pub(crate) fn fan_out(
    listeners: &Listeners,
    kind: ContainerEventKind,
    container_id: &str,
) {
    for (listening_for, sink) in listeners.read().iter() {
        if *listening_for == kind {
            sink.deliver(container_id.to_string(), EVENTS_QUEUE);
        }
    }
}

/// Container lifecycle source backed by the docker engine API
pub struct DockerRuntime {
    docker: Docker,
    listeners: Listeners,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DockerRuntime")
            .field("listeners", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}

impl DockerRuntime {
    pub fn connect(config: &DockerConfig) -> Result<Self, ContainerError> {
        ensure_unix_socket(&config.socket)?;
        let docker =
            Docker::connect_with_socket(&config.socket, config.timeout_secs, API_DEFAULT_VERSION)?;
        info!(socket = %config.socket, "connected to docker");
        Ok(Self {
            docker,
            listeners: Arc::new(RwLock::new(Vec::new())),
            token: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    fn start_listener(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.token.is_cancelled() {
            return;
        }
        let event_loop = EventLoop {
            docker: self.docker.clone(),
            listeners: self.listeners.clone(),
            token: self.token.clone(),
        };
        *handle = Some(tokio::spawn(event_loop.run()));
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list(&self) -> Result<Vec<String>, ContainerError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn environment(
        &self,
        container_id: &str,
    ) -> Result<Environment, ContainerError> {
        let inspected = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(e, container_id))?;
        let entries = inspected
            .config
            .and_then(|config| config.env)
            .unwrap_or_default();
        Ok(parse_environment(entries))
    }

    fn watch(
        &self,
        events: DeliverySink<String>,
        kind: ContainerEventKind,
    ) {
        debug!(%kind, "registering container event listener");
        self.listeners.write().push((kind, events));
        self.start_listener();
    }

    async fn close(&self) {
        self.token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("docker event loop ended abnormally: {:?}", e);
            }
        }
        self.listeners.write().clear();
        info!("docker event source closed");
    }
}

impl Drop for DockerRuntime {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct EventLoop {
    docker: Docker,
    listeners: Listeners,
    token: CancellationToken,
}

impl EventLoop {
    async fn run(self) {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            vec![
                DOCKER_EVENT_START.to_string(),
                DOCKER_EVENT_DIE.to_string(),
                DOCKER_EVENT_DESTROY.to_string(),
            ],
        );

        // last event seen; a resubscription replays everything after it
        let mut since = now_cursor();
        while !self.token.is_cancelled() {
            let mut stream = Box::pin(self.docker.events(Some(EventsOptions::<String> {
                since: since.clone(),
                filters: filters.clone(),
                ..Default::default()
            })));
            debug!(since = ?since, "listening for docker events");

            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(message)) => {
                        if let Some(cursor) = event_cursor(message.time, message.time_nano) {
                            since = Some(cursor);
                        }
                        let action = message.action.unwrap_or_default();
                        let id = message.actor.and_then(|actor| actor.id).unwrap_or_default();
                        match event_kind(&action) {
                            Some(kind) if !id.is_empty() => {
                                trace!(container = %id, %kind, "docker event");
                                fan_out(&self.listeners, kind, &id);
                            }
                            _ => trace!(%action, "ignoring docker event"),
                        }
                    }
                    Some(Err(e)) => {
                        warn!("docker event stream failed: {}", e);
                        break;
                    }
                    None => {
                        debug!("docker event stream ended");
                        break;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(EVENTS_RETRY_DELAY) => {}
            }
        }
    }
}
