//! Actions run on behalf of a hook once its content changed.


use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::hook::FileHook;
use crate::hook::HookDeclaration;
use crate::hook::KeyHook;
use crate::Error;
use crate::Result;

/// What caused an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The owning container was registered
    Created,
    /// A watched store key changed
    NodeChanged { path: String },
    /// A flagged service changed its endpoints
    ServiceChanged { service: String },
}

impl fmt::Display for Trigger {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Trigger::Created => write!(f, "created"),
            Trigger::NodeChanged { path } => write!(f, "node changed: {path}"),
            Trigger::ServiceChanged { service } => write!(f, "service changed: {service}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub container_id: String,
    pub hook: HookDeclaration,
    pub trigger: Trigger,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ActionRunner: Send + Sync + 'static {
    async fn run(
        &self,
        request: ActionRequest,
    ) -> Result<()>;
}

/// Runs a file hook's commands through `sh -c`.
///
/// The check command, when set, must succeed before the exec command runs.
#[derive(Debug, Clone)]
pub struct ExecActionRunner {
    shell: String,
}

impl Default for ExecActionRunner {
    fn default() -> Self {
        Self { shell: "sh".into() }
    }
}

impl ExecActionRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }

    async fn run_file_hook(
        &self,
        container_id: &str,
        hook: &FileHook,
        trigger: &Trigger,
    ) -> Result<()> {
        if !hook.exec.check.is_empty() {
            self.execute(&hook.id, &hook.exec.check).await?;
        }
        if hook.exec.command.is_empty() {
            debug!(container = %container_id, hook = %hook.id, %trigger, "no exec command");
            return Ok(());
        }
        self.execute(&hook.id, &hook.exec.command).await?;
        info!(container = %container_id, hook = %hook.id, %trigger, "hook executed");
        Ok(())
    }

    fn run_key_hook(
        &self,
        container_id: &str,
        hook: &KeyHook,
        trigger: &Trigger,
    ) {
        info!(
            container = %container_id,
            hook = %hook.id,
            file = %hook.file,
            %trigger,
            "keys hook synced"
        );
    }

    async fn execute(
        &self,
        hook_id: &str,
        command: &str,
    ) -> Result<()> {
        debug!(hook = %hook_id, %command, "running hook command");
        let output = Command::new(&self.shell).arg("-c").arg(command).output().await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            hook = %hook_id,
            %command,
            status = %output.status,
            "hook command failed: {}",
            stderr.trim()
        );
        Err(Error::ActionFailed {
            hook: hook_id.to_string(),
            reason: format!("`{command}` exited with {}", output.status),
        })
    }
}

#[async_trait]
impl ActionRunner for ExecActionRunner {
    async fn run(
        &self,
        request: ActionRequest,
    ) -> Result<()> {
        match &request.hook {
            HookDeclaration::File(hook) => {
                self.run_file_hook(&request.container_id, hook, &request.trigger)
                    .await
            }
            HookDeclaration::Keys(hook) => {
                self.run_key_hook(&request.container_id, hook, &request.trigger);
                Ok(())
            }
        }
    }
}
