//! SSH dialer, session and SFTP client using the russh crates

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::ssh_key;
use russh::{Channel, ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::credential::{Credential, UserEnv};
use crate::error::ExecError;
use crate::result::CommandOutput;
use crate::traits::{Connector, FileClient, RemoteSession, RemoteWriter};

/// Standard SSH port
pub const DEFAULT_PORT: u16 = 22;

/// SSH client handler for russh
#[derive(Debug)]
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not verified (StrictHostKeyChecking=no)
        debug!(algorithm = ?server_public_key.algorithm(), "accepting server host key");
        Ok(true)
    }
}

/// Port selection: explicit value, then environment override, then 22
#[derive(Debug, Clone, Default)]
pub struct PortSpec {
    explicit: String,
    env_override: Option<String>,
}

impl PortSpec {
    /// Combine an explicit port string with the environment override from `env`
    pub fn new(explicit: impl Into<String>, env: &UserEnv) -> Self {
        Self {
            explicit: explicit.into(),
            env_override: env.port_override.clone(),
        }
    }

    /// Resolve to a port number
    ///
    /// # Errors
    /// Returns `ExecError::ConnectionFailed` if the chosen value is not a valid port
    pub fn resolve(&self) -> Result<u16, ExecError> {
        let raw = if self.explicit.is_empty() {
            match self.env_override.as_deref() {
                Some(port) if !port.is_empty() => port,
                _ => return Ok(DEFAULT_PORT),
            }
        } else {
            self.explicit.as_str()
        };

        match raw.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(ExecError::ConnectionFailed(format!("invalid port {raw:?}"))),
            Ok(port) => Ok(port),
        }
    }
}

/// Transport-level timeouts; none are applied unless set
#[derive(Debug, Clone, Copy, Default)]
pub struct DialOptions {
    /// Limit on TCP connect plus key exchange
    pub connect_timeout: Option<Duration>,
    /// Drop the connection after this much silence
    pub inactivity_timeout: Option<Duration>,
}

impl DialOptions {
    #[must_use]
    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = Some(limit);
        self
    }

    #[must_use]
    pub fn with_inactivity_timeout(mut self, limit: Duration) -> Self {
        self.inactivity_timeout = Some(limit);
        self
    }
}

/// Open an authenticated SSH connection to one host
///
/// DNS, TCP and authentication failures all surface as `ExecError::ConnectionFailed`.
///
/// # Errors
/// Returns `ExecError::ConnectionFailed` if the host cannot be reached or rejects the key
#[instrument(skip(port, credential, options), fields(host = %hostname))]
pub async fn dial(
    hostname: &str,
    port: &PortSpec,
    credential: &Credential,
    options: &DialOptions,
) -> Result<client::Handle<SshClientHandler>, ExecError> {
    let port = port.resolve()?;

    info!(port, user = %credential.username(), "connecting to SSH");

    let mut config = client::Config::default();
    config.inactivity_timeout = options.inactivity_timeout;
    let config = Arc::new(config);

    let connect = client::connect(config, (hostname, port), SshClientHandler);
    let connected = match options.connect_timeout {
        Some(limit) => timeout(limit, connect).await.map_err(|_| {
            ExecError::ConnectionFailed(format!("{hostname}:{port}: timed out after {limit:?}"))
        })?,
        None => connect.await,
    };
    let mut handle =
        connected.map_err(|e| ExecError::ConnectionFailed(format!("{hostname}:{port}: {e}")))?;

    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .ok()
        .flatten()
        .flatten();
    let auth_res = handle
        .authenticate_publickey(
            credential.username(),
            PrivateKeyWithHashAlg::new(credential.key(), hash_alg),
        )
        .await
        .map_err(|e| ExecError::ConnectionFailed(format!("authentication error: {e}")))?;

    if !auth_res.success() {
        return Err(ExecError::ConnectionFailed(format!(
            "public key authentication rejected for {}",
            credential.username()
        )));
    }

    info!("SSH connected and authenticated");

    Ok(handle)
}

/// Connector that dials real hosts over SSH with one shared credential
#[derive(Debug, Clone)]
pub struct SshConnector {
    credential: Arc<Credential>,
    port: PortSpec,
    options: DialOptions,
}

impl SshConnector {
    pub fn new(credential: Credential, port: PortSpec) -> Self {
        Self {
            credential: Arc::new(credential),
            port,
            options: DialOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: DialOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn open(&self, hostname: &str) -> Result<Box<dyn RemoteSession>, ExecError> {
        let handle = dial(hostname, &self.port, &self.credential, &self.options).await?;

        Ok(Box::new(SshSession {
            hostname: hostname.to_string(),
            handle,
            shell: None,
        }))
    }

    fn connector_type(&self) -> &'static str {
        "ssh"
    }
}

/// One SSH connection plus the exec channel opened on it, if any
pub struct SshSession {
    hostname: String,
    handle: client::Handle<SshClientHandler>,
    shell: Option<Channel<client::Msg>>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("hostname", &self.hostname)
            .field("shell_open", &self.shell.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    #[instrument(skip(self, command), fields(host = %self.hostname))]
    async fn run_command(&mut self, command: &str) -> Result<CommandOutput, ExecError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::ConnectionFailed(format!("failed to open channel: {e}")))?;
        if let Some(previous) = self.shell.take() {
            if let Err(e) = previous.close().await {
                debug!(error = %e, "previous exec channel already closed");
            }
        }
        let channel = self.shell.insert(channel);

        debug!(command = %command, "executing remote command");

        let mut output = CommandOutput::default();
        if let Err(e) = channel.exec(true, command).await {
            warn!(error = %e, "exec request failed");
            return Ok(output);
        }

        let mut stdout = Vec::new();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                _ => {}
            }
        }
        output.stdout = String::from_utf8_lossy(&stdout).into_owned();

        debug!(exit_status = ?output.exit_status, bytes = stdout.len(), "remote command completed");

        Ok(output)
    }

    #[instrument(skip(self), fields(host = %self.hostname))]
    async fn file_client(&mut self) -> Result<Box<dyn FileClient>, ExecError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::FileSubsystem(format!("failed to open channel: {e}")))?;

        if let Err(e) = channel.request_subsystem(true, "sftp").await {
            channel.close().await.ok();
            return Err(ExecError::FileSubsystem(format!(
                "failed to request SFTP subsystem: {e}"
            )));
        }

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ExecError::FileSubsystem(format!("failed to start SFTP session: {e}")))?;

        debug!("SFTP session ready");

        Ok(Box::new(SftpFileClient::new(sftp)))
    }

    #[instrument(skip(self), fields(host = %self.hostname))]
    async fn close(self: Box<Self>) {
        let SshSession { handle, shell, .. } = *self;

        if let Some(channel) = shell {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "exec channel already closed");
            }
        }

        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(error = %e, "disconnect failed");
        }

        info!("SSH disconnected");
    }
}

/// SFTP client bound to an SSH session
pub struct SftpFileClient {
    sftp: SftpSession,
}

impl SftpFileClient {
    /// Wrap an SFTP session that has already completed its handshake
    pub fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }
}

#[async_trait]
impl FileClient for SftpFileClient {
    async fn create(&mut self, path: &str) -> Result<RemoteWriter, ExecError> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| ExecError::Transfer(format!("cannot create remote file {path}: {e}")))?;
        Ok(Box::pin(file))
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.sftp.close().await {
            debug!(error = %e, "SFTP session close failed");
        }
    }
}
