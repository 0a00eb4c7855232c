use std::future::Future;

use tokio::task::JoinHandle;
use tracing::error;

use crate::Result;

/// Spawns a detached task, logging its error instead of propagating it.
///
/// The handle is pushed into `handles` when the caller wants to join later.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {}", e);
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
