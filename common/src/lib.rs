//! Host identity and command execution for fleetshift.
//!
//! This crate provides:
//! - [`Host`]: a managed machine and the executor bound to it
//! - local execution through `sh`, remote execution through a cached OpenSSH session
//! - the interactive prompt handling that lets `sudo` work over a non-interactive channel
#![cfg_attr(
    test,
    expect(clippy::unwrap_used, reason = "Tests may panic on unexpected results")
)]

extern crate alloc;
extern crate core;

mod error;
pub mod exec;
mod host;
pub mod mock;

pub use error::ExecError;
pub use exec::Executor;
pub use host::{DEFAULT_SSH_PORT, Host, HostSpec, current_login};
