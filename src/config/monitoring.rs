use std::net::SocketAddr;
use std::net::TcpListener;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Prometheus endpoint served next to the dispatcher
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default = "default_prometheus_enabled")]
    pub prometheus_enabled: bool,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: default_prometheus_enabled(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

impl MonitoringConfig {
    /// Address the `/metrics` endpoint listens on
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.prometheus_port))
    }

    /// Fails with `Error::InvalidConfig` when metrics are enabled on port 0,
    /// a privileged port or a port some other process already holds.
    pub fn validate(&self) -> Result<()> {
        if !self.prometheus_enabled {
            if self.prometheus_port != default_prometheus_port() {
                warn!(
                    "prometheus_port configured to {} but monitoring is disabled",
                    self.prometheus_port
                );
            }
            return Ok(());
        }

        match self.prometheus_port {
            0 => Err(Error::InvalidConfig("prometheus_port cannot be 0 when enabled".into())),
            port if port < 1024 => Err(Error::InvalidConfig(format!(
                "prometheus_port {port} is a privileged port (requires root)"
            ))),
            port => match TcpListener::bind(self.listen_addr()) {
                // released right away; the metrics server binds it again
                Ok(_) => Ok(()),
                Err(e) => Err(Error::InvalidConfig(format!("prometheus_port {port} unavailable: {e}"))),
            },
        }
    }
}

fn default_prometheus_enabled() -> bool {
    false
}

fn default_prometheus_port() -> u16 {
    9180
}
