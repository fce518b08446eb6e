//! Command execution backends.
//!
//! [`LocalExecutor`] runs commands in a local `sh`, [`SshExecutor`] runs them through a
//! cached OpenSSH control session on an interactive channel so that `sudo` can prompt.

mod channel;
mod local;
mod ssh;

pub use channel::{Channel, ChannelEvent, PASSWORD_PROMPT, drive};
pub use local::LocalExecutor;
pub use ssh::{SshExecutor, SshTarget};

use crate::error::ExecError;

/// Something that can run a shell command line on one machine.
pub trait Executor {
    /// Runs `command` and blocks until it completed.
    ///
    /// There is no timeout: a command that never terminates blocks the caller forever.
    ///
    /// # Errors
    ///
    /// See [`ExecError`].
    fn run(&self, command: &str) -> Result<Option<String>, ExecError>;
}

/// Turns an accumulated output buffer into the result of [`Executor::run`].
///
/// Trailing line terminators are dropped; a buffer that was never written yields `None`.
pub(crate) fn finish_output(buffer: Option<String>) -> Option<String> {
    buffer.map(|mut output| {
        let kept = output.trim_end_matches(['\r', '\n']).len();
        output.truncate(kept);
        output
    })
}
