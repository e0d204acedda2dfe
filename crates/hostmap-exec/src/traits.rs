//! Connector, session and file client traits

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::ExecError;
use crate::result::CommandOutput;

/// Writable handle to a freshly created remote file
pub type RemoteWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Opens one session to one host
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate
    ///
    /// A failed open yields no session, so there is nothing to release.
    async fn open(&self, hostname: &str) -> Result<Box<dyn RemoteSession>, ExecError>;

    fn connector_type(&self) -> &'static str;
}

/// Live session to one host, owned by exactly one task
#[async_trait]
pub trait RemoteSession: Send {
    /// Run a command non-interactively and capture stdout
    ///
    /// A command that fails remotely still returns its (possibly empty) output.
    async fn run_command(&mut self, command: &str) -> Result<CommandOutput, ExecError>;

    /// Open a file client on top of the existing connection
    async fn file_client(&mut self) -> Result<Box<dyn FileClient>, ExecError>;

    /// Release whatever sub-resources were acquired, then the connection
    async fn close(self: Box<Self>);
}

/// File transfer handle bound to a session
#[async_trait]
pub trait FileClient: Send {
    /// Create or truncate a remote file for writing
    async fn create(&mut self, path: &str) -> Result<RemoteWriter, ExecError>;

    async fn close(self: Box<Self>);
}
