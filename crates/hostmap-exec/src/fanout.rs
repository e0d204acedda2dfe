//! Fan-out dispatchers: one task per host, one outcome record per host

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Semaphore, mpsc};
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::credential::{Credential, CredentialInputs, UserEnv};
use crate::error::ExecError;
use crate::result::{HostGroup, OutcomeRecord, Payload};
use crate::ssh::{DialOptions, PortSpec, SshConnector};
use crate::traits::{Connector, FileClient, RemoteSession};

/// Chunk size used when streaming a file to a host
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Sender half of the result channel
pub type OutcomeSender = mpsc::Sender<OutcomeRecord>;

/// Receiver half of the result channel
pub type OutcomeReceiver = mpsc::Receiver<OutcomeRecord>;

/// Dispatch settings
#[derive(Debug, Clone, Copy)]
pub struct FanoutOptions {
    /// Maximum hosts in flight; `None` dispatches every host at once
    pub concurrency_limit: Option<usize>,
    /// Bytes per read/write during transfers
    pub chunk_size: usize,
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl FanoutOptions {
    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit.max(1));
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

/// Fans commands and file transfers out over a connector
///
/// Both entry points return right after spawning the per-host tasks; callers
/// observe completion by draining exactly `hosts.len()` records. Must be called
/// from within a Tokio runtime.
#[derive(Clone)]
pub struct Fanout {
    connector: Arc<dyn Connector>,
    limiter: Option<Arc<Semaphore>>,
    chunk_size: usize,
}

impl std::fmt::Debug for Fanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("connector", &self.connector.connector_type())
            .field("limited", &self.limiter.is_some())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl Fanout {
    /// Create a dispatcher over any connector
    pub fn new(connector: Arc<dyn Connector>, options: FanoutOptions) -> Self {
        Self {
            connector,
            limiter: options
                .concurrency_limit
                .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
            chunk_size: options.chunk_size.max(1),
        }
    }

    /// Create an SSH dispatcher, loading the shared credential first
    ///
    /// # Errors
    /// Returns `ExecError::Credential` or `ExecError::KeyLoad` if the credential
    /// cannot be built; no host is contacted in that case
    pub fn ssh(
        inputs: &CredentialInputs,
        port: &str,
        env: &UserEnv,
        dial: DialOptions,
        options: FanoutOptions,
    ) -> Result<Self, ExecError> {
        let credential = Credential::build(inputs, env)?;
        let connector = SshConnector::new(credential, PortSpec::new(port, env)).with_options(dial);
        Ok(Self::new(Arc::new(connector), options))
    }

    /// Run `command` on every host
    #[instrument(skip(self, hosts, results), fields(hosts = hosts.len()))]
    pub fn map_command(&self, hosts: &HostGroup, command: &str, results: &OutcomeSender) {
        info!(connector = self.connector.connector_type(), "dispatching command");

        let command: Arc<str> = Arc::from(command);
        self.dispatch(hosts, results, move |connector, host| {
            let command = Arc::clone(&command);
            async move { command_outcome(connector.as_ref(), &host, &command).await }
        });
    }

    /// Copy `local_path` into `remote_dir` on every host
    #[instrument(skip(self, hosts, local_path, results), fields(hosts = hosts.len()))]
    pub fn map_transfer(
        &self,
        hosts: &HostGroup,
        local_path: impl AsRef<Path>,
        remote_dir: &str,
        results: &OutcomeSender,
    ) {
        info!(connector = self.connector.connector_type(), "dispatching transfer");

        let plan = Arc::new(TransferPlan {
            local_path: local_path.as_ref().to_path_buf(),
            remote_dir: remote_dir.to_string(),
            chunk_size: self.chunk_size,
        });
        self.dispatch(hosts, results, move |connector, host| {
            let plan = Arc::clone(&plan);
            async move { transfer_outcome(connector.as_ref(), &host, &plan).await }
        });
    }

    fn dispatch<F, Fut>(&self, hosts: &HostGroup, results: &OutcomeSender, op: F)
    where
        F: Fn(Arc<dyn Connector>, String) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = OutcomeRecord> + Send + 'static,
    {
        for host in hosts {
            let host = host.clone();
            let worker_host = host.clone();
            let connector = Arc::clone(&self.connector);
            let limiter = self.limiter.clone();
            let results = results.clone();
            let op = op.clone();
            let span = info_span!("host", host = %host);

            tokio::spawn(
                async move {
                    let started = Instant::now();
                    // Inner task so a panic still leaves a record to publish
                    let worker = tokio::spawn(
                        async move {
                            let _permit = match limiter {
                                Some(sem) => sem.acquire_owned().await.ok(),
                                None => None,
                            };
                            op(connector, worker_host).await
                        }
                        .in_current_span(),
                    );

                    let record = match worker.await {
                        Ok(record) => record,
                        Err(e) => OutcomeRecord::failure(
                            host,
                            ExecError::Aborted(e.to_string()),
                            started.elapsed(),
                        ),
                    };
                    publish(&results, record).await;
                }
                .instrument(span),
            );
        }
    }
}

async fn publish(results: &OutcomeSender, record: OutcomeRecord) {
    if let Some(e) = &record.error {
        warn!(error = %e, "host failed");
    } else {
        debug!("host succeeded");
    }

    if results.send(record).await.is_err() {
        warn!("result receiver dropped, outcome discarded");
    }
}

async fn command_outcome(connector: &dyn Connector, host: &str, command: &str) -> OutcomeRecord {
    let started = Instant::now();

    let mut session = match connector.open(host).await {
        Ok(session) => session,
        Err(e) => return OutcomeRecord::failure(host, e, started.elapsed()),
    };

    let result = session.run_command(command).await.map(Payload::Output);
    session.close().await;

    OutcomeRecord::from_result(host, result, started.elapsed())
}

/// What to copy and where
#[derive(Debug)]
struct TransferPlan {
    local_path: PathBuf,
    remote_dir: String,
    chunk_size: usize,
}

async fn transfer_outcome(
    connector: &dyn Connector,
    host: &str,
    plan: &TransferPlan,
) -> OutcomeRecord {
    let started = Instant::now();

    let mut session = match connector.open(host).await {
        Ok(session) => session,
        Err(e) => return OutcomeRecord::failure(host, e, started.elapsed()),
    };

    let result = transfer_over(session.as_mut(), plan).await;
    session.close().await;

    OutcomeRecord::from_result(host, result, started.elapsed())
}

async fn transfer_over(
    session: &mut dyn RemoteSession,
    plan: &TransferPlan,
) -> Result<Payload, ExecError> {
    let mut client = session.file_client().await?;
    let result = stream_file(client.as_mut(), plan).await;
    client.close().await;
    result
}

async fn stream_file(
    client: &mut dyn FileClient,
    plan: &TransferPlan,
) -> Result<Payload, ExecError> {
    let remote_path = remote_file_path(&plan.remote_dir, &plan.local_path)?;

    let mut local = File::open(&plan.local_path).await.map_err(|e| {
        ExecError::Transfer(format!(
            "cannot open local file {}: {e}",
            plan.local_path.display()
        ))
    })?;

    let mut writer = client.create(&remote_path).await?;

    debug!(remote_path = %remote_path, "streaming file");

    let mut buf = vec![0u8; plan.chunk_size];
    let mut bytes: u64 = 0;
    loop {
        let n = local
            .read(&mut buf)
            .await
            .map_err(|e| ExecError::Transfer(format!("local read failed: {e}")))?;
        if n == 0 {
            break;
        }

        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| ExecError::Transfer(format!("write to {remote_path} failed: {e}")))?;
        bytes += n as u64;
    }

    writer
        .shutdown()
        .await
        .map_err(|e| ExecError::Transfer(format!("closing {remote_path} failed: {e}")))?;

    debug!(remote_path = %remote_path, bytes, "transfer complete");

    Ok(Payload::Transfer { remote_path, bytes })
}

/// Join `remote_dir` with the base name of `local_path`
///
/// # Errors
/// Returns `ExecError::Transfer` if `local_path` has no file name
pub fn remote_file_path(remote_dir: &str, local_path: &Path) -> Result<String, ExecError> {
    let name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ExecError::Transfer(format!(
                "local path {} has no file name",
                local_path.display()
            ))
        })?;

    Ok(if remote_dir.is_empty() {
        name.to_string()
    } else if remote_dir.ends_with('/') {
        format!("{remote_dir}{name}")
    } else {
        format!("{remote_dir}/{name}")
    })
}

/// Drain up to `expected` records, stopping early only if every sender is gone
pub async fn collect(results: &mut OutcomeReceiver, expected: usize) -> Vec<OutcomeRecord> {
    let mut records = Vec::with_capacity(expected);
    while records.len() < expected {
        match results.recv().await {
            Some(record) => records.push(record),
            None => break,
        }
    }
    records
}

/// Run `command` over SSH on every host
///
/// # Errors
/// Returns a credential error if the shared key cannot be loaded; per-host
/// failures are reported through `results`
pub fn map_command(
    hosts: &HostGroup,
    inputs: &CredentialInputs,
    port: &str,
    env: &UserEnv,
    command: &str,
    results: &OutcomeSender,
) -> Result<(), ExecError> {
    let fanout = Fanout::ssh(
        inputs,
        port,
        env,
        DialOptions::default(),
        FanoutOptions::default(),
    )?;
    fanout.map_command(hosts, command, results);
    Ok(())
}

/// Copy `local_path` into `remote_dir` over SFTP on every host
///
/// # Errors
/// Returns a credential error if the shared key cannot be loaded; per-host
/// failures are reported through `results`
pub fn map_transfer(
    hosts: &HostGroup,
    inputs: &CredentialInputs,
    port: &str,
    env: &UserEnv,
    local_path: impl AsRef<Path>,
    remote_dir: &str,
    results: &OutcomeSender,
) -> Result<(), ExecError> {
    let fanout = Fanout::ssh(
        inputs,
        port,
        env,
        DialOptions::default(),
        FanoutOptions::default(),
    )?;
    fanout.map_transfer(hosts, local_path, remote_dir, results);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_file_path() {
        let local = Path::new("/home/ops/build/app.tar.gz");
        assert_eq!(remote_file_path("/srv", local).unwrap(), "/srv/app.tar.gz");
        assert_eq!(remote_file_path("/srv/", local).unwrap(), "/srv/app.tar.gz");
        assert_eq!(remote_file_path("", local).unwrap(), "app.tar.gz");
    }

    #[test]
    fn test_remote_file_path_without_name() {
        let err = remote_file_path("/srv", Path::new("/")).unwrap_err();
        assert!(matches!(err, ExecError::Transfer(_)));
    }

    #[test]
    fn test_options_clamp() {
        let options = FanoutOptions::default()
            .with_concurrency_limit(0)
            .with_chunk_size(0);
        assert_eq!(options.concurrency_limit, Some(1));
        assert_eq!(options.chunk_size, 1);
    }

    #[tokio::test]
    async fn test_fatal_credential_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = CredentialInputs::new("ops", dir.path().join("missing").to_string_lossy());
        let (tx, mut rx) = mpsc::channel(4);

        let err = map_command(
            &HostGroup::new(["a", "b"]),
            &inputs,
            "",
            &UserEnv::default(),
            "uptime",
            &tx,
        )
        .unwrap_err();
        drop(tx);

        assert!(err.is_fatal());
        assert!(rx.recv().await.is_none());
    }
}
