//! Service discovery.
//!
//! A [`DiscoveryBackend`] resolves service names to documents and offers a
//! blocking query keyed by a wait index; [`DiscoveryAgent`] multiplexes
//! watchers onto one long-poll loop per service.

mod agent;
mod consul;
mod etcd;
pub use agent::*;
pub use consul::*;
pub use etcd::*;


use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use crate::DiscoveryError;

/// A network endpoint of a service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Identity of a service; two services are the same when their ids are
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
}

impl Service {
    /// A service addressed by name only
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            tags: Vec::new(),
        }
    }
}

/// Raw registration of one service instance.
///
/// Fields are optional here; [`ServiceDocument::endpoint`] decides whether
/// the document is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceDocument {
    pub ipaddress: Option<String>,
    pub port: Option<u16>,
    pub host_port: Option<u16>,
    pub tags: Vec<String>,
}

impl ServiceDocument {
    /// Resolves the document, a published host port wins over the container port
    pub fn endpoint(&self) -> Result<Endpoint, DiscoveryError> {
        let address = self
            .ipaddress
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| DiscoveryError::InvalidDocument("missing ipaddress".into()))?;
        let port = self
            .host_port
            .filter(|p| *p > 0)
            .or(self.port.filter(|p| *p > 0))
            .ok_or_else(|| DiscoveryError::InvalidDocument(format!("missing port for {address}")))?;
        Ok(Endpoint {
            address: address.to_string(),
            port,
        })
    }
}

/// Criteria for [`DiscoveryAgent::services`]; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct ServiceQuery {
    pub name: Option<String>,
    pub tag: Option<String>,
}

impl ServiceQuery {
    pub fn matches(
        &self,
        service: &Service,
    ) -> bool {
        let name_matches = self.name.as_ref().map_or(true, |name| &service.name == name);
        let tag_matches = self.tag.as_ref().map_or(true, |tag| service.tags.contains(tag));
        name_matches && tag_matches
    }
}

/// Emitted once per observed change of a service's endpoint set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub service: Service,
    pub index: u64,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiscoveryBackend: Send + Sync + 'static {
    /// Returns the current wait index of `service`.
    ///
    /// With `index == 0` the call answers immediately (baseline); otherwise it
    /// blocks until the index moves past `index` or `wait` elapses, in which
    /// case the unchanged index is returned.
    async fn wait_for_change(
        &self,
        service: &Service,
        index: u64,
        wait: Duration,
    ) -> Result<u64, DiscoveryError>;

    /// Registrations of every instance of the named service.
    /// Undecodable registrations are skipped by the backend.
    async fn documents(
        &self,
        name: &str,
    ) -> Result<Vec<ServiceDocument>, DiscoveryError>;

    async fn services(&self) -> Result<Vec<Service>, DiscoveryError>;
}
