//! Desktop screenshot capture for notifications

use super::NotifyError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::process::Command;

#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Raw PNG bytes
    async fn capture_png(&self) -> Result<Vec<u8>, NotifyError>;
}

pub fn encode_png(png: &[u8]) -> String {
    STANDARD.encode(png)
}

/// Runs a command that writes a PNG to stdout (e.g. `import -window root png:-`)
#[derive(Debug, Clone)]
pub struct CommandScreenCapture {
    command: String,
}

impl CommandScreenCapture {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ScreenCapture for CommandScreenCapture {
    async fn capture_png(&self) -> Result<Vec<u8>, NotifyError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| NotifyError::Capture(format!("failed to run `{}`: {e}", self.command)))?;

        if !output.status.success() {
            return Err(NotifyError::Capture(format!(
                "`{}` exited with {}",
                self.command, output.status
            )));
        }
        if output.stdout.is_empty() {
            return Err(NotifyError::Capture(format!(
                "`{}` produced no image data",
                self.command
            )));
        }
        Ok(output.stdout)
    }
}
