//! Remote hierarchical key/value store.
//!
//! [`KvBackend`] is the wire seam towards a concrete store, [`StoreWatcher`]
//! the long-poll engine built on top of it.

mod etcd;
mod watcher;
pub use etcd::*;
pub use watcher::*;


use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use crate::StoreError;

/// One node of the store tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Node {
    pub key: String,
    pub value: String,
    pub dir: bool,
    pub modified_index: u64,
    pub nodes: Vec<Node>,
}

impl Node {
    /// Paths of every leaf below (and including) this node
    pub fn leaves(&self) -> Vec<String> {
        if !self.dir {
            return vec![self.key.clone()];
        }
        self.nodes.iter().flat_map(Node::leaves).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Changed,
    Deleted,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Changed => "changed",
            Operation::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change observed by the watch loop, consumed once by its subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChange {
    pub path: String,
    pub value: String,
    pub is_directory: bool,
    pub operation: Operation,
}

/// Answer of one long-poll round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    pub operation: Operation,
    pub node: Node,
    /// Store index the change happened at
    pub index: u64,
}

impl WatchResponse {
    pub fn to_change(&self) -> NodeChange {
        NodeChange {
            path: self.node.key.clone(),
            value: self.node.value.clone(),
            is_directory: self.node.dir,
            operation: self.operation,
        }
    }
}

/// Operations a concrete store must offer.
///
/// Paths handed to the backend are already normalised.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    async fn get(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<Node, StoreError>;

    async fn set(
        &self,
        path: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    async fn delete(
        &self,
        path: &str,
    ) -> Result<(), StoreError>;

    /// Removes a directory and everything below it
    async fn remove_path(
        &self,
        path: &str,
    ) -> Result<(), StoreError>;

    /// Blocks until a change at or below `path` happens after `from_index`.
    ///
    /// `from_index == 0` waits for the next change from now on. A long-poll
    /// that ends without a change yields `Ok(None)`.
    async fn watch(
        &self,
        path: &str,
        from_index: u64,
        recursive: bool,
    ) -> Result<Option<WatchResponse>, StoreError>;
}

/// Enforces a leading slash and strips trailing ones, `""` becomes `/`
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// True when a watch on `key` is interested in a change at `path`.
///
/// Matching is by path prefix on segment boundaries: `/a/b` covers `/a/b`
/// and `/a/b/c` but not `/a/bc`.
pub fn covers(
    key: &str,
    path: &str,
) -> bool {
    if key == "/" {
        return true;
    }
    match path.strip_prefix(key) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
