//! A builder assembling a [`Dispatcher`] and its collaborators.
//!
//! Every collaborator has a production default derived from [`Settings`]
//! (docker runtime, etcd store, discovery backend chosen by scheme, shell
//! action runner) and can be overridden with a setter before `build()`.
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let dispatcher = ServiceBuilder::new(None, shutdown_rx)?
//!     .runner(custom_runner) // Optional override
//!     .build()?
//!     .start_metrics_server(shutdown_tx.subscribe())
//!     .ready()?;
//! dispatcher.run().await?;
//! ```
//!
//! Construction failures (unreachable docker socket, malformed or
//! unsupported store location) are returned from `build()`, the only place
//! errors reach the process boundary.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use tracing::info;

use super::Dispatcher;
use super::DispatcherHandles;
use crate::action::ActionRunner;
use crate::action::ExecActionRunner;
use crate::containers::ContainerRuntime;
use crate::containers::DockerRuntime;
use crate::discovery::ConsulDiscovery;
use crate::discovery::DiscoveryBackend;
use crate::discovery::EtcdDiscovery;
use crate::hook::HookParser;
use crate::metrics;
use crate::store::EtcdStore;
use crate::store::KvBackend;
use crate::DiscoveryError;
use crate::Error;
use crate::Result;
use crate::Settings;

pub struct ServiceBuilder {
    pub(super) settings: Arc<Settings>,
    pub(super) runtime: Option<Arc<dyn ContainerRuntime>>,
    pub(super) store: Option<Arc<dyn KvBackend>>,
    pub(super) discovery: Option<Arc<dyn DiscoveryBackend>>,
    pub(super) runner: Option<Arc<dyn ActionRunner>>,
    pub(super) shutdown_signal: watch::Receiver<()>,

    pub(super) dispatcher: Option<Dispatcher>,
}

impl ServiceBuilder {
    /// Loads and validates settings, layering the optional override file
    pub fn new(
        config_path: Option<&str>,
        shutdown_signal: watch::Receiver<()>,
    ) -> Result<Self> {
        let mut settings = Settings::new()?;
        if let Some(p) = config_path {
            info!("with_override_config from: {}", &p);
            settings = settings.with_override_config(p)?;
        }
        Ok(Self::init(settings.validate()?, shutdown_signal))
    }

    /// Core initialization logic shared by all construction paths
    pub fn init(
        settings: Settings,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            runtime: None,
            store: None,
            discovery: None,
            runner: None,
            shutdown_signal,
            dispatcher: None,
        }
    }

    /// Sets a custom container runtime
    pub fn runtime(
        mut self,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Sets a custom key/value store backend
    pub fn store(
        mut self,
        store: Arc<dyn KvBackend>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets a custom discovery backend, replacing the one `discovery.url` names
    pub fn discovery(
        mut self,
        discovery: Arc<dyn DiscoveryBackend>,
    ) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Sets a custom action runner
    pub fn runner(
        mut self,
        runner: Arc<dyn ActionRunner>,
    ) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.clone()
    }

    /// Connects the default collaborators that were not overridden and wires
    /// the dispatcher. Spawns the watch loops, so it needs a tokio runtime.
    pub fn build(mut self) -> Result<Self> {
        let settings = self.settings.clone();

        let runtime: Arc<dyn ContainerRuntime> = match self.runtime.take() {
            Some(runtime) => runtime,
            None => Arc::new(DockerRuntime::connect(&settings.docker)?),
        };

        let store: Arc<dyn KvBackend> = match self.store.take() {
            Some(store) => store,
            None => {
                let location = settings.store.location()?;
                debug!(%location, "connecting to store");
                Arc::new(EtcdStore::connect(
                    &location,
                    &settings.store.tls,
                    settings.watch.store_poll_timeout(),
                )?)
            }
        };

        let discovery = match self.discovery.take() {
            Some(discovery) => Some(discovery),
            None => default_discovery(&settings)?,
        };

        let runner: Arc<dyn ActionRunner> = self
            .runner
            .take()
            .unwrap_or_else(|| Arc::new(ExecActionRunner::default()));

        let dispatcher = Dispatcher::new(
            HookParser::new(settings.hook.prefix.clone()),
            DispatcherHandles {
                runtime,
                store,
                discovery,
                runner,
            },
            settings.watch,
            self.shutdown_signal.clone(),
        );
        info!(?settings, "dispatcher built");

        self.dispatcher = Some(dispatcher);
        Ok(self)
    }

    /// Serves prometheus metrics when monitoring is enabled
    pub fn start_metrics_server(
        self,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        if !self.settings.monitoring.prometheus_enabled {
            debug!("metrics server disabled");
            return self;
        }
        let addr = self.settings.monitoring.listen_addr();
        info!(%addr, "starting metrics server");
        tokio::spawn(async move {
            metrics::start_server(addr, shutdown_signal).await;
        });
        self
    }

    /// Returns the dispatcher once `build()` completed
    pub fn ready(self) -> Result<Dispatcher> {
        self.dispatcher
            .ok_or_else(|| Error::Fatal("dispatcher was not built".to_string()))
    }
}

/// Discovery backend named by `discovery.url`, if any
fn default_discovery(settings: &Settings) -> Result<Option<Arc<dyn DiscoveryBackend>>> {
    let Some(location) = settings.discovery.location()? else {
        return Ok(None);
    };
    debug!(%location, "connecting to discovery backend");
    let backend: Arc<dyn DiscoveryBackend> = match location.scheme.as_str() {
        "consul" => Arc::new(ConsulDiscovery::connect(&location)?),
        "etcd" => {
            let kv = EtcdStore::connect(
                &location,
                &settings.discovery.tls,
                settings.watch.store_poll_timeout(),
            )
            .map_err(DiscoveryError::from)?;
            Arc::new(EtcdDiscovery::new(Arc::new(kv)))
        }
        other => return Err(DiscoveryError::UnsupportedScheme(other.to_string()).into()),
    };
    Ok(Some(backend))
}
