//! Lifecycle of the resource the processing loop drives
//!
//! An environment is started once before the first item, reset (closed and
//! started again) after every process fault, and closed exactly once when
//! the processing phase ends.

use async_trait::async_trait;
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    ExitStatus {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Environment: Send {
    async fn startup(&mut self) -> Result<(), EnvironmentError>;

    async fn soft_shutdown(&mut self) -> Result<(), EnvironmentError>;

    async fn hard_shutdown(&mut self) -> Result<(), EnvironmentError>;

    /// Soft shutdown, falling back to a hard shutdown when it fails
    async fn close(&mut self) -> Result<(), EnvironmentError> {
        match self.soft_shutdown().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Soft shutdown failed, forcing hard shutdown");
                self.hard_shutdown().await
            }
        }
    }

    /// Close then start again
    async fn reset(&mut self) -> Result<(), EnvironmentError> {
        self.close().await?;
        self.startup().await
    }
}

/// Environment driven by optional shell commands
///
/// Each command runs through `sh -c`; a missing command is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CommandEnvironment {
    startup: Option<String>,
    soft_shutdown: Option<String>,
    hard_shutdown: Option<String>,
}

impl CommandEnvironment {
    pub fn new(
        startup: Option<String>,
        soft_shutdown: Option<String>,
        hard_shutdown: Option<String>,
    ) -> Self {
        Self {
            startup,
            soft_shutdown,
            hard_shutdown,
        }
    }

    async fn run(stage: &str, command: Option<&str>) -> Result<(), EnvironmentError> {
        let Some(command) = command else {
            debug!(stage, "No command configured, skipping");
            return Ok(());
        };

        info!(stage, command, "Running environment command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EnvironmentError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(EnvironmentError::ExitStatus {
                command: command.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Environment for CommandEnvironment {
    async fn startup(&mut self) -> Result<(), EnvironmentError> {
        Self::run("startup", self.startup.as_deref()).await
    }

    async fn soft_shutdown(&mut self) -> Result<(), EnvironmentError> {
        Self::run("soft_shutdown", self.soft_shutdown.as_deref()).await
    }

    async fn hard_shutdown(&mut self) -> Result<(), EnvironmentError> {
        Self::run("hard_shutdown", self.hard_shutdown.as_deref()).await
    }
}
