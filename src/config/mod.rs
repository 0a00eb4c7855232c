//! Configuration management for the config hook service.
//!
//! Provides hierarchical configuration loading from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. Config file named by the `CONFIG_PATH` environment variable
//! 3. Environment variables prefixed `CONFIG_HOOKD__` (e.g. `CONFIG_HOOKD__STORE__URL`)
//! 4. Explicit override file (`with_override_config`)
//! 5. Command line flags, applied by the binary before `validate()`
//!
//! The validated [`Settings`] is shared behind an `Arc` and handed to every
//! component constructor; nothing reads process-wide state after startup.

mod location;
mod monitoring;
mod store;
mod tls;
mod watch;
pub use location::*;
pub use monitoring::*;
pub use store::*;
pub use tls::*;
pub use watch::*;


//---
use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_DOCKER_SOCKET;
use crate::constants::DEFAULT_HOOK_PREFIX;
use crate::constants::SETTINGS_ENV_PREFIX;
use crate::Error;
use crate::Result;

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Hook grammar settings
    #[serde(default)]
    pub hook: HookConfig,
    /// Container runtime connection
    #[serde(default)]
    pub docker: DockerConfig,
    /// Remote key/value store connection
    #[serde(default)]
    pub store: StoreConfig,
    /// Optional service discovery backend
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Long-poll and delivery policies
    #[serde(default)]
    pub watch: WatchPolicies,
    /// Metrics endpoint
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Debug for Settings {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("prefix", &self.hook.prefix)
            .field("docker", &self.docker.socket)
            .field("store", &self.store.url)
            .field("discovery", &self.discovery.url)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Loads configuration from defaults, `CONFIG_PATH` and the environment.
    ///
    /// # Note
    /// No validation happens here so callers can keep layering overrides
    /// (`with_override_config`, command line flags). Call `validate()` last.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(Self::environment());

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies an override file on top of the current values.
    ///
    /// Environment variables are re-applied afterwards so they keep the
    /// highest priority among file based sources.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validates every section and returns the validated instance.
    ///
    /// # Errors
    /// - empty hook prefix
    /// - malformed store or discovery location, unsupported scheme
    /// - partial client TLS material
    /// - unusable metrics port
    pub fn validate(self) -> Result<Self> {
        self.hook.validate()?;
        self.docker.validate()?;
        self.store.validate()?;
        self.discovery.validate()?;
        self.watch.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }

    fn environment() -> Environment {
        Environment::with_prefix(SETTINGS_ENV_PREFIX)
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HookConfig {
    /// Environment variable prefix marking config hooks
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

impl HookConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(Error::InvalidConfig("hook prefix cannot be empty".into()));
        }
        if self.prefix.contains('=') {
            return Err(Error::InvalidConfig(format!(
                "hook prefix {} cannot contain '='",
                self.prefix
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DockerConfig {
    /// Path of the docker unix socket
    #[serde(default = "default_docker_socket")]
    pub socket: String,

    /// Request timeout against the docker API (unit: seconds)
    #[serde(default = "default_docker_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            timeout_secs: default_docker_timeout_secs(),
        }
    }
}

impl DockerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.socket.is_empty() {
            return Err(Error::InvalidConfig("docker socket cannot be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::InvalidConfig("docker timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }
}

fn default_prefix() -> String {
    DEFAULT_HOOK_PREFIX.into()
}
fn default_docker_socket() -> String {
    DEFAULT_DOCKER_SOCKET.into()
}
fn default_docker_timeout_secs() -> u64 {
    120
}
