//! Host identity and the executor bound to it.

use core::fmt;

use nix::unistd::{self, User};
use secrecy::SecretString;
use tracing::debug;

use crate::error::ExecError;
use crate::exec::{Executor, LocalExecutor, SshExecutor, SshTarget};

/// Default ssh port used when a host does not configure one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Connection identity of a managed host.
#[derive(Debug, Clone)]
pub struct HostSpec {
    /// Hostname (or address) the host is reached at.
    pub hostname: String,
    /// Login user; also the user `sudo` asks the password for.
    pub user: String,
    /// Used for ssh login and to answer escalation prompts.
    pub password: Option<SecretString>,
    /// ssh port, defaults to [`DEFAULT_SSH_PORT`].
    pub port: Option<u16>,
    /// This host's node number within a cluster-IP hash ring.
    pub local_node: Option<u32>,
}

impl HostSpec {
    /// Builds a spec from `user@hostname` or plain `hostname` notation.
    ///
    /// An explicit `user` wins over the user part of `host`. Without either the
    /// login name of the current process owner is used.
    #[must_use]
    pub fn parse(host: &str, user: Option<&str>) -> Self {
        let (embedded_user, hostname) = match host.rsplit_once('@') {
            Some((login, hostname)) => (Some(login), hostname),
            None => (None, host),
        };
        let user = user
            .or(embedded_user)
            .map_or_else(current_login, ToOwned::to_owned);
        Self {
            hostname: hostname.to_owned(),
            user,
            password: None,
            port: None,
            local_node: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: Option<SecretString>) -> Self {
        self.password = password;
        self
    }

    #[must_use]
    pub const fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_local_node(mut self, local_node: Option<u32>) -> Self {
        self.local_node = local_node;
        self
    }

    /// Whether commands for this host bypass ssh.
    ///
    /// True for `localhost` and for the machine's own hostname.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.hostname == "localhost"
            || system_hostname().is_some_and(|own| own == self.hostname)
    }

    fn ssh_target(&self) -> SshTarget {
        SshTarget::new(
            &self.hostname,
            &self.user,
            self.port.unwrap_or(DEFAULT_SSH_PORT),
        )
    }
}

/// A managed machine together with the executor that runs commands on it.
///
/// Remote hosts open their ssh session lazily on the first command and reuse it for
/// every later command. A `Host` is not meant to be shared between threads.
pub struct Host {
    spec: HostSpec,
    executor: Box<dyn Executor>,
}

impl Host {
    /// Creates a host that executes locally or over ssh, depending on [`HostSpec::is_local`].
    #[must_use]
    pub fn new(spec: HostSpec) -> Self {
        let executor: Box<dyn Executor> = if spec.is_local() {
            Box::new(LocalExecutor::new(&spec.hostname))
        } else {
            Box::new(SshExecutor::new(spec.ssh_target(), spec.password.clone()))
        };
        Self { spec, executor }
    }

    /// Creates a host backed by an arbitrary executor, e.g. [`crate::mock::MockExecutor`].
    #[must_use]
    pub fn with_executor(spec: HostSpec, executor: impl Executor + 'static) -> Self {
        Self {
            spec,
            executor: Box::new(executor),
        }
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.spec.hostname
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.spec.user
    }

    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.spec.port
    }

    #[must_use]
    pub const fn local_node(&self) -> Option<u32> {
        self.spec.local_node
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.spec.is_local()
    }

    #[must_use]
    pub const fn spec(&self) -> &HostSpec {
        &self.spec
    }

    /// Runs a shell command on this host and waits for it to finish.
    ///
    /// Returns the output with trailing line terminators removed, or `None` when the
    /// command printed nothing.
    ///
    /// # Errors
    ///
    /// See [`ExecError`].
    pub fn run(&self, command: &str) -> Result<Option<String>, ExecError> {
        debug!(host = %self.spec.hostname, %command, "executing");
        self.executor.run(command)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec.hostname)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Login name of the user owning this process, falling back to `$USER`.
#[must_use]
pub fn current_login() -> String {
    match User::from_uid(unistd::getuid()) {
        Ok(Some(user)) => user.name,
        _ => std::env::var("USER").unwrap_or_else(|_| "root".to_owned()),
    }
}

fn system_hostname() -> Option<String> {
    unistd::gethostname().ok()?.into_string().ok()
}
