//! Error taxonomy for command execution on hosts.

use std::io;

use thiserror::Error as ThisError;

/// Errors returned by [`crate::Executor::run`].
///
/// None of these are retried. Transport failures carry the host so that a caller iterating
/// over the inventory can tell which machine failed.
#[derive(Debug, ThisError)]
pub enum ExecError {
    /// The remote side asked for an escalation password and the host has none configured.
    #[error("{host} asked for a sudo password, but none is configured")]
    MissingCredential { host: String },
    /// The remote process wrote to its error stream, or no interactive session could be obtained.
    #[error("command on {host} failed: {message}")]
    RemoteCommand { host: String, message: String },
    /// The connection to the host could not be established or broke down.
    #[error("ssh transport to {host} failed: {reason}")]
    Transport { host: String, reason: String },
    /// Spawning or talking to a local process failed.
    #[error("i/o failure while executing on {host}")]
    Io {
        host: String,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    /// Name of the host the failure belongs to.
    #[must_use]
    pub fn host(&self) -> &str {
        match *self {
            Self::MissingCredential { ref host }
            | Self::RemoteCommand { ref host, .. }
            | Self::Transport { ref host, .. }
            | Self::Io { ref host, .. } => host,
        }
    }

    pub(crate) fn io(host: &str, source: io::Error) -> Self {
        Self::Io {
            host: host.to_owned(),
            source,
        }
    }
}
