//! Container lifecycle source.

mod docker;
pub use docker::*;


use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::utils::DeliverySink;
use crate::ContainerError;

/// Environment snapshot of one container
pub type Environment = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerEventKind {
    Created,
    Destroyed,
}

impl fmt::Display for ContainerEventKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ContainerEventKind::Created => write!(f, "created"),
            ContainerEventKind::Destroyed => write!(f, "destroyed"),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Ids of the running containers
    async fn list(&self) -> Result<Vec<String>, ContainerError>;

    /// Fails with [`ContainerError::NotFound`] once the container is gone
    async fn environment(
        &self,
        container_id: &str,
    ) -> Result<Environment, ContainerError>;

    /// Registers `events` to receive the ids of containers going through `kind`
    fn watch(
        &self,
        events: DeliverySink<String>,
        kind: ContainerEventKind,
    );

    async fn close(&self);
}

/// Splits `NAME=VALUE` entries on the first `=`; entries without one are skipped
pub fn parse_environment<I, S>(entries: I) -> Environment
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .filter_map(|entry| {
            entry
                .as_ref()
                .split_once('=')
                .map(|(name, value)| (name.to_string(), value.to_string()))
        })
        .collect()
}
