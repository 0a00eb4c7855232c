//! Services registered as JSON documents in etcd.
//!
//! ```text
//! /services/<name>/<instance>  {"ipaddress": "10.0.0.3", "port": 80, "host_port": 49153, "tags": []}
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::DiscoveryBackend;
use super::Service;
use super::ServiceDocument;
use crate::constants::ETCD_SERVICES_NAMESPACE;
use crate::store::KvBackend;
use crate::store::Node;
use crate::DiscoveryError;

pub struct EtcdDiscovery {
    kv: Arc<dyn KvBackend>,
}

impl std::fmt::Debug for EtcdDiscovery {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EtcdDiscovery").finish_non_exhaustive()
    }
}

impl EtcdDiscovery {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }
}

pub(crate) fn service_path(name: &str) -> String {
    format!("{ETCD_SERVICES_NAMESPACE}/{name}")
}

/// Highest modification index in a tree
pub(crate) fn latest_index(node: &Node) -> u64 {
    node.nodes
        .iter()
        .map(latest_index)
        .fold(node.modified_index, u64::max)
}

fn collect_values<'a>(
    node: &'a Node,
    out: &mut Vec<&'a Node>,
) {
    if node.dir {
        for child in &node.nodes {
            collect_values(child, out);
        }
    } else {
        out.push(node);
    }
}

#[async_trait]
impl DiscoveryBackend for EtcdDiscovery {
    async fn wait_for_change(
        &self,
        service: &Service,
        index: u64,
        _wait: Duration,
    ) -> Result<u64, DiscoveryError> {
        let path = service_path(&service.name);
        if index == 0 {
            let node = self.kv.get(&path, true).await?;
            return Ok(latest_index(&node));
        }
        // the store bounds the long-poll itself
        match self.kv.watch(&path, index + 1, true).await? {
            Some(response) => Ok(response.index),
            None => Ok(index),
        }
    }

    async fn documents(
        &self,
        name: &str,
    ) -> Result<Vec<ServiceDocument>, DiscoveryError> {
        let root = self.kv.get(&service_path(name), true).await?;
        let mut leaves = Vec::new();
        collect_values(&root, &mut leaves);

        let mut documents = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            match serde_json::from_str::<ServiceDocument>(&leaf.value) {
                Ok(document) => documents.push(document),
                Err(e) => warn!(key = %leaf.key, "skipping undecodable service document: {}", e),
            }
        }
        Ok(documents)
    }

    async fn services(&self) -> Result<Vec<Service>, DiscoveryError> {
        let root = self.kv.get(ETCD_SERVICES_NAMESPACE, false).await?;
        Ok(root
            .nodes
            .iter()
            .filter(|n| n.dir)
            .filter_map(|n| n.key.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map(Service::named)
            .collect())
    }
}
