//! consul catalog and health HTTP API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::Response;
use serde::Deserialize;
use tracing::debug;

use super::DiscoveryBackend;
use super::Service;
use super::ServiceDocument;
use crate::DiscoveryError;
use crate::Location;

const CONSUL_SCHEME: &str = "consul";
const INDEX_HEADER: &str = "X-Consul-Index";
/// Extra time granted on top of the blocking query wait
const WAIT_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthEntry {
    #[serde(default)]
    pub node: HealthNode,
    pub service: HealthService,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthNode {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthService {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl From<HealthEntry> for ServiceDocument {
    fn from(entry: HealthEntry) -> Self {
        let address = if entry.service.address.is_empty() {
            entry.node.address
        } else {
            entry.service.address
        };
        ServiceDocument {
            ipaddress: Some(address).filter(|a| !a.is_empty()),
            port: Some(entry.service.port).filter(|p| *p > 0),
            host_port: None,
            tags: entry.service.tags.unwrap_or_default(),
        }
    }
}

/// Discovery backend reading the consul catalog
#[derive(Debug, Clone)]
pub struct ConsulDiscovery {
    client: Client,
    endpoint: String,
}

impl ConsulDiscovery {
    pub fn connect(location: &Location) -> Result<Self, DiscoveryError> {
        if location.scheme != CONSUL_SCHEME {
            return Err(DiscoveryError::UnsupportedScheme(location.scheme.clone()));
        }
        let endpoint = location
            .endpoints("http")
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::InvalidLocation(location.to_string()))?;
        debug!(%endpoint, "connecting to consul");
        Ok(Self {
            client: Client::builder().build()?,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(
        &self,
        path: &str,
    ) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

#[async_trait]
impl DiscoveryBackend for ConsulDiscovery {
    async fn wait_for_change(
        &self,
        service: &Service,
        index: u64,
        wait: Duration,
    ) -> Result<u64, DiscoveryError> {
        let mut request = self
            .client
            .get(self.url(&format!("/v1/catalog/service/{}", service.name)));
        if index > 0 {
            request = request
                .query(&[("index", index.to_string()), ("wait", format!("{}s", wait.as_secs()))])
                .timeout(wait + WAIT_SLACK);
        }
        let response = request.send().await?.error_for_status()?;
        wait_index(&response)
    }

    async fn documents(
        &self,
        name: &str,
    ) -> Result<Vec<ServiceDocument>, DiscoveryError> {
        let entries: Vec<HealthEntry> = self
            .client
            .get(self.url(&format!("/v1/health/service/{name}")))
            .query(&[("passing", "true")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entries.into_iter().map(ServiceDocument::from).collect())
    }

    async fn services(&self) -> Result<Vec<Service>, DiscoveryError> {
        let catalog: HashMap<String, Vec<String>> = self
            .client
            .get(self.url("/v1/catalog/services"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let mut services: Vec<Service> = catalog
            .into_iter()
            .map(|(name, tags)| Service {
                id: name.clone(),
                name,
                tags,
            })
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }
}

pub(crate) fn wait_index(response: &Response) -> Result<u64, DiscoveryError> {
    response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or(DiscoveryError::MissingIndex)
}
