//! Loopback connector: runs commands and writes files on this machine
//!
//! Behaves like a host that is always reachable. Useful as a `--local` target
//! and for exercising the fan-out pipeline without an SSH server.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::ExecError;
use crate::result::CommandOutput;
use crate::traits::{Connector, FileClient, RemoteSession, RemoteWriter};

/// Local connector
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

impl LocalConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn open(&self, hostname: &str) -> Result<Box<dyn RemoteSession>, ExecError> {
        Ok(Box::new(LocalSession {
            hostname: hostname.to_string(),
        }))
    }

    fn connector_type(&self) -> &'static str {
        "local"
    }
}

/// Session on the local machine
#[derive(Debug)]
pub struct LocalSession {
    hostname: String,
}

#[async_trait]
impl RemoteSession for LocalSession {
    #[instrument(skip(self), level = "debug")]
    async fn run_command(&mut self, command: &str) -> Result<CommandOutput, ExecError> {
        // Use shell to support pipes, redirections, etc.
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecError::ConnectionFailed(format!("failed to spawn shell: {e}")))?;

        let exit_status = output.status.code().and_then(|c| u32::try_from(c).ok());

        debug!(exit_status = ?exit_status, "local command completed");

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_status,
        })
    }

    async fn file_client(&mut self) -> Result<Box<dyn FileClient>, ExecError> {
        Ok(Box::new(LocalFileClient))
    }

    async fn close(self: Box<Self>) {
        debug!(host = %self.hostname, "local session closed");
    }
}

/// Writes files straight to the local filesystem
#[derive(Debug)]
pub struct LocalFileClient;

#[async_trait]
impl FileClient for LocalFileClient {
    async fn create(&mut self, path: &str) -> Result<RemoteWriter, ExecError> {
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| ExecError::Transfer(format!("cannot create {path}: {e}")))?;
        Ok(Box::pin(file))
    }

    async fn close(self: Box<Self>) {}
}
