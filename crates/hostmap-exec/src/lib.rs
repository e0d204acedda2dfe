//! hostmap-exec: Fan-out execution over SSH
//!
//! Runs one command, or copies one file, on a group of hosts concurrently and
//! reports exactly one [`OutcomeRecord`] per host, whatever happens to the others.

pub mod credential;
pub mod error;
pub mod fanout;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;

pub use credential::{Credential, CredentialInputs, UserEnv};
pub use error::ExecError;
pub use fanout::{
    DEFAULT_CHUNK_SIZE, Fanout, FanoutOptions, OutcomeReceiver, OutcomeSender, collect,
    map_command, map_transfer, remote_file_path,
};
pub use local::LocalConnector;
pub use result::{CommandOutput, HostGroup, OutcomeRecord, Payload};
pub use ssh::{
    DEFAULT_PORT, DialOptions, PortSpec, SftpFileClient, SshConnector, SshSession, dial,
};
pub use traits::{Connector, FileClient, RemoteSession, RemoteWriter};
