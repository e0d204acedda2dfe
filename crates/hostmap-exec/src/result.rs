//! Host groups and per-host outcome records

use std::time::Duration;

use serde::Serialize;

use crate::error::ExecError;

/// Ordered list of host addresses
///
/// Duplicates are kept; each entry is dispatched on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostGroup(Vec<String>);

impl HostGroup {
    /// Create a host group from addresses
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(hosts.into_iter().map(Into::into).collect())
    }

    /// Number of hosts, duplicates included
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for HostGroup {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a HostGroup {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Captured output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// stdout output
    pub stdout: String,
    /// Exit status if the remote side reported one
    ///
    /// Informational only: a non-zero status does not make the outcome an error.
    pub exit_status: Option<u32>,
}

/// What a host produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Nothing, the host failed before producing anything
    #[default]
    None,
    /// Command output
    Output(CommandOutput),
    /// File transfer status
    Transfer {
        /// Remote path that was written
        remote_path: String,
        /// Bytes streamed to the remote file
        bytes: u64,
    },
}

/// Result of one host in one fan-out call
///
/// Exactly one is published per host entry, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    /// Host address as given in the host group
    pub hostname: String,
    /// Result payload
    pub result: Payload,
    /// Error, if the host failed
    pub error: Option<ExecError>,
    /// Time from task start to record construction
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl OutcomeRecord {
    /// Successful record
    pub fn success(hostname: impl Into<String>, result: Payload, duration: Duration) -> Self {
        Self {
            hostname: hostname.into(),
            result,
            error: None,
            duration,
        }
    }

    /// Failed record with an empty payload
    pub fn failure(hostname: impl Into<String>, error: ExecError, duration: Duration) -> Self {
        Self {
            hostname: hostname.into(),
            result: Payload::None,
            error: Some(error),
            duration,
        }
    }

    /// Build from an operation result
    pub fn from_result(
        hostname: impl Into<String>,
        result: Result<Payload, ExecError>,
        duration: Duration,
    ) -> Self {
        match result {
            Ok(payload) => Self::success(hostname, payload, duration),
            Err(e) => Self::failure(hostname, e, duration),
        }
    }

    /// Check if the host succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Command stdout, empty for anything else
    #[must_use]
    pub fn output(&self) -> &str {
        match &self.result {
            Payload::Output(out) => &out.stdout,
            _ => "",
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
