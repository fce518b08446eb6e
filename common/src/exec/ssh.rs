//! OpenSSH transport.
//!
//! Each host gets one control master connection, opened on first use and torn down when
//! the executor is dropped. Commands are multiplexed over it with a forced pseudo terminal,
//! which is what makes `sudo` prompt on the channel instead of failing.
//!
//! The control socket, the master's log and the askpass helper live in a private
//! directory that is created per session and removed together with it. An idle master
//! exits on its own after a minute, so a session that outlived its master is
//! transparently reopened.

use core::cell::RefCell;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write as _},
    os::unix::fs::OpenOptionsExt as _,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, ExitStatus, Stdio},
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

use secrecy::{ExposeSecret as _, SecretString};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::ExecError;
use crate::exec::{Channel, ChannelEvent, Executor, drive};

const SSH: &str = "ssh";
/// Exit status `ssh` itself uses for connection and authentication failures.
const SSH_FAILURE_STATUS: i32 = 255;
/// Idle time after which a control master shuts itself down.
const CONTROL_PERSIST_SECS: u32 = 60;
const CONTROL_SOCKET: &str = "ctl";
const MASTER_LOG: &str = "log";
const ASKPASS_SCRIPT: &str = "askpass";
const PASSWORD_FILE: &str = "pass";
const READ_CHUNK: usize = 4096;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    hostname: String,
    user: String,
    port: u16,
    program: String,
    program_args: Vec<String>,
}

impl SshTarget {
    #[must_use]
    pub fn new(hostname: &str, user: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_owned(),
            user: user.to_owned(),
            port,
            program: SSH.to_owned(),
            program_args: Vec::new(),
        }
    }

    /// Replaces the `ssh` binary with `program`, invoked with `args` before the usual ones.
    #[must_use]
    pub fn with_ssh_command(mut self, program: &str, args: &[&str]) -> Self {
        program.clone_into(&mut self.program);
        self.program_args = args.iter().map(|&arg| arg.to_owned()).collect();
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.program_args);
        command
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.hostname)
    }

    fn master_args(&self, control_path: &Path, log_path: &Path, batch: bool) -> Vec<String> {
        vec![
            "-o".to_owned(),
            "ControlMaster=yes".to_owned(),
            "-o".to_owned(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_owned(),
            format!("ControlPersist={CONTROL_PERSIST_SECS}"),
            "-o".to_owned(),
            format!("BatchMode={}", if batch { "yes" } else { "no" }),
            "-E".to_owned(),
            log_path.display().to_string(),
            "-p".to_owned(),
            self.port.to_string(),
            "-N".to_owned(),
            "-f".to_owned(),
            self.destination(),
        ]
    }

    /// Arguments for one command on an established master.
    ///
    /// `-tt` forces the pty request before the command is executed.
    fn exec_args(&self, control_path: &Path, command: &str) -> Vec<String> {
        vec![
            "-tt".to_owned(),
            "-o".to_owned(),
            "LogLevel=ERROR".to_owned(),
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-o".to_owned(),
            "ControlMaster=no".to_owned(),
            "-o".to_owned(),
            format!("ControlPath={}", control_path.display()),
            "-p".to_owned(),
            self.port.to_string(),
            self.destination(),
            "--".to_owned(),
            command.to_owned(),
        ]
    }

    fn exit_args(&self, control_path: &Path) -> Vec<String> {
        vec![
            "-q".to_owned(),
            "-o".to_owned(),
            format!("ControlPath={}", control_path.display()),
            "-O".to_owned(),
            "exit".to_owned(),
            self.destination(),
        ]
    }
}

/// A live control master connection.
#[derive(Debug)]
struct SshSession {
    target: SshTarget,
    control_path: PathBuf,
    log_path: PathBuf,
    /// Owns the socket and the log; removed when the session is dropped.
    dir: TempDir,
}

impl SshSession {
    fn open(target: &SshTarget, password: Option<&SecretString>) -> Result<Self, ExecError> {
        let host = target.hostname.as_str();
        let io_error = |e: io::Error| ExecError::io(host, e);
        info!(%host, port = target.port, user = %target.user, "opening ssh session");

        let dir = tempfile::Builder::new()
            .prefix("fleetshift-")
            .tempdir()
            .map_err(io_error)?;
        let session = Self {
            target: target.clone(),
            control_path: dir.path().join(CONTROL_SOCKET),
            log_path: dir.path().join(MASTER_LOG),
            dir,
        };

        let mut command = target.command();
        command
            .args(target.master_args(
                &session.control_path,
                &session.log_path,
                password.is_none(),
            ))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(secret) = password {
            let script = write_askpass(session.dir.path(), secret).map_err(io_error)?;
            command
                .env("SSH_ASKPASS", script)
                .env("SSH_ASKPASS_REQUIRE", "force");
        }

        // `-f` backgrounds the master only after authentication, so the password is
        // no longer needed once the foreground process returned.
        let status = command.status();
        session.forget_password();
        let status = status.map_err(io_error)?;

        if status.success() {
            Ok(session)
        } else {
            Err(ExecError::Transport {
                host: host.to_owned(),
                reason: session.failure_reason(status),
            })
        }
    }

    /// Whether the master still accepts connections.
    fn is_alive(&self) -> bool {
        self.control_path.exists()
    }

    fn forget_password(&self) {
        for name in [PASSWORD_FILE, ASKPASS_SCRIPT] {
            let path = self.dir.path().join(name);
            let failed = fs::remove_file(&path)
                .err()
                .filter(|e| e.kind() != io::ErrorKind::NotFound);
            if let Some(e) = failed {
                debug!(host = %self.target.hostname, error = %e, ?path, "failed to remove");
            }
        }
    }

    fn failure_reason(&self, status: ExitStatus) -> String {
        fs::read_to_string(&self.log_path)
            .ok()
            .map(|log| log.trim().to_owned())
            .filter(|log| !log.is_empty())
            .unwrap_or_else(|| format!("ssh exited with {status}"))
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if !self.is_alive() {
            return;
        }
        debug!(host = %self.target.hostname, "closing ssh session");
        let closed = self
            .target
            .command()
            .args(self.target.exit_args(&self.control_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = closed {
            debug!(host = %self.target.hostname, error = %e, "failed to close ssh session");
        }
    }
}

/// Writes the password and an `SSH_ASKPASS` helper printing it into the session directory.
///
/// Both files are created exclusively and readable by the owner only.
fn write_askpass(dir: &Path, password: &SecretString) -> io::Result<PathBuf> {
    let mut secret = create_private(&dir.join(PASSWORD_FILE), 0o600)?;
    writeln!(secret, "{}", password.expose_secret())?;

    let script = dir.join(ASKPASS_SCRIPT);
    let mut helper = create_private(&script, 0o700)?;
    write!(helper, "#!/bin/sh\nexec cat \"$(dirname \"$0\")/{PASSWORD_FILE}\"\n")?;
    Ok(script)
}

fn create_private(path: &Path, mode: u32) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Out,
    Err,
}

#[derive(Debug)]
enum StreamEvent {
    Chunk(Stream, String),
    Eof,
    Failed(io::Error),
}

fn spawn_reader(mut reader: impl Read + Send + 'static, stream: Stream, tx: Sender<StreamEvent>) {
    thread::spawn(move || {
        let mut buf = [0_u8; READ_CHUNK];
        loop {
            let event = match reader.read(&mut buf) {
                Ok(0) => StreamEvent::Eof,
                Ok(n) => StreamEvent::Chunk(
                    stream,
                    String::from_utf8_lossy(buf.get(..n).unwrap_or_default()).into_owned(),
                ),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => StreamEvent::Failed(e),
            };
            let last = !matches!(event, StreamEvent::Chunk(..));
            if tx.send(event).is_err() || last {
                break;
            }
        }
    });
}

/// One command running on a control master.
struct SshChannel {
    host: String,
    child: Child,
    stdin: Option<ChildStdin>,
    events: Receiver<StreamEvent>,
    open_streams: usize,
}

impl SshChannel {
    fn open(session: &SshSession, command: &str) -> Result<Self, ExecError> {
        let host = session.target.hostname.clone();
        let mut child = session
            .target
            .command()
            .args(session.target.exec_args(&session.control_path, command))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::io(&host, e))?;

        let (tx, events) = mpsc::channel();
        let mut open_streams = 0;
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Stream::Out, tx.clone());
            open_streams += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Stream::Err, tx);
            open_streams += 1;
        }

        Ok(Self {
            host,
            stdin: child.stdin.take(),
            child,
            events,
            open_streams,
        })
    }

    fn finish(&mut self) -> Result<ChannelEvent, ExecError> {
        drop(self.stdin.take());
        let status = self.child.wait().map_err(|e| ExecError::io(&self.host, e))?;
        if status.code() == Some(SSH_FAILURE_STATUS) {
            return Err(ExecError::Transport {
                host: self.host.clone(),
                reason: format!("ssh exited with {status}"),
            });
        }
        Ok(ChannelEvent::Closed)
    }
}

impl Channel for SshChannel {
    fn next_event(&mut self) -> Result<ChannelEvent, ExecError> {
        loop {
            if self.open_streams == 0 {
                return self.finish();
            }
            let event = self.events.recv().map_err(|_| ExecError::Transport {
                host: self.host.clone(),
                reason: "output readers disconnected".to_owned(),
            })?;
            match event {
                StreamEvent::Chunk(Stream::Out, data) => return Ok(ChannelEvent::Data(data)),
                StreamEvent::Chunk(Stream::Err, data) => return Ok(ChannelEvent::ErrorData(data)),
                StreamEvent::Eof => self.open_streams = self.open_streams.saturating_sub(1),
                StreamEvent::Failed(e) => return Err(ExecError::io(&self.host, e)),
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), ExecError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ExecError::RemoteCommand {
                host: self.host.clone(),
                message: "input of the interactive session is closed".to_owned(),
            });
        };
        stdin
            .write_all(data)
            .and_then(|()| stdin.flush())
            .map_err(|e| ExecError::io(&self.host, e))
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if matches!(self.child.try_wait(), Ok(None)) {
            drop(self.child.kill());
            drop(self.child.wait());
        }
    }
}

impl Drop for SshChannel {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Executes commands on a remote host over a lazily opened, cached ssh session.
#[derive(Debug)]
pub struct SshExecutor {
    target: SshTarget,
    password: Option<SecretString>,
    session: RefCell<Option<SshSession>>,
}

impl SshExecutor {
    #[must_use]
    pub const fn new(target: SshTarget, password: Option<SecretString>) -> Self {
        Self {
            target,
            password,
            session: RefCell::new(None),
        }
    }
}

impl Executor for SshExecutor {
    fn run(&self, command: &str) -> Result<Option<String>, ExecError> {
        let mut slot = self.session.borrow_mut();
        if let Some(expired) = slot.take_if(|session| !session.is_alive()) {
            info!(host = %self.target.hostname, "ssh control master went away, reconnecting");
            drop(expired);
        }
        let session = match slot.take() {
            Some(session) => session,
            None => SshSession::open(&self.target, self.password.as_ref())?,
        };
        let session = slot.insert(session);
        let mut channel = SshChannel::open(session, command)?;
        drive(&mut channel, &self.target.hostname, self.password.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt as _;

    use super::*;

    /// Stands in for `ssh`: keeps the control socket as a plain file, runs commands
    /// locally and logs every invocation mode next to itself.
    const FAKE_SSH: &str = r#"
here="$(dirname "$0")"
mode=""
for arg in "$@"; do
    case "$arg" in
        ControlPath=*) ctl="${arg#ControlPath=}" ;;
        ControlMaster=yes) mode=master ;;
        -tt) mode=exec ;;
        -O) mode=exit ;;
    esac
    last="$arg"
done
echo "$mode" >> "$here/calls"
case "$mode" in
    master)
        if [ -n "$SSH_ASKPASS" ]; then
            sh "$SSH_ASKPASS" > "$here/answer"
            env > "$here/master-env"
        fi
        : > "$ctl"
        ;;
    exit) rm -f "$ctl" ;;
    exec)
        [ -e "$ctl" ] || exit 255
        exec sh -c "$last"
        ;;
esac
"#;

    fn target() -> SshTarget {
        SshTarget::new("10.0.0.2", "woody", 2222)
    }

    /// Returns the directory holding the fake binary and an executor that uses it.
    fn fake_executor(password: Option<&str>) -> (TempDir, SshExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ssh");
        fs::write(&script, FAKE_SSH).unwrap();
        // Run through `sh` so the freshly written file is never executed directly.
        let target = target().with_ssh_command("sh", &[script.to_str().unwrap()]);
        let executor = SshExecutor::new(target, password.map(SecretString::from));
        (dir, executor)
    }

    fn calls(dir: &TempDir) -> Vec<String> {
        fs::read_to_string(dir.path().join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn control_path(executor: &SshExecutor) -> PathBuf {
        let slot = executor.session.borrow();
        slot.as_ref().unwrap().control_path.clone()
    }

    #[test]
    fn exec_requests_pty_before_command() {
        let args = target().exec_args(Path::new("/tmp/ctl"), "sudo cat /etc/shadow");
        let pty = args.iter().position(|a| a == "-tt").unwrap();
        let separator = args.iter().position(|a| a == "--").unwrap();
        assert!(pty < separator, "pty must be requested before the command");
        assert_eq!(args.last().map(String::as_str), Some("sudo cat /etc/shadow"));
        assert!(args.contains(&"woody@10.0.0.2".to_owned()));
        assert!(args.contains(&"ControlPath=/tmp/ctl".to_owned()));
        assert!(args.contains(&"2222".to_owned()));
    }

    #[test]
    fn master_uses_batch_mode_without_password() {
        let args = target().master_args(Path::new("/tmp/ctl"), Path::new("/tmp/log"), true);
        assert!(args.contains(&"BatchMode=yes".to_owned()));
        assert!(args.contains(&"ControlMaster=yes".to_owned()));
        let with_password =
            target().master_args(Path::new("/tmp/ctl"), Path::new("/tmp/log"), false);
        assert!(with_password.contains(&"BatchMode=no".to_owned()));
    }

    #[test]
    fn master_expires_when_idle() {
        let args = target().master_args(Path::new("/tmp/ctl"), Path::new("/tmp/log"), true);
        assert!(
            args.contains(&format!("ControlPersist={CONTROL_PERSIST_SECS}")),
            "args were: {args:?}"
        );
        assert!(!args.contains(&"ControlPersist=yes".to_owned()));
    }

    #[test]
    fn exit_targets_same_control_path() {
        let args = target().exit_args(Path::new("/tmp/ctl"));
        assert_eq!(
            args,
            ["-q", "-o", "ControlPath=/tmp/ctl", "-O", "exit", "woody@10.0.0.2"]
        );
    }

    #[test]
    fn askpass_files_are_private_and_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_askpass(dir.path(), &SecretString::from("hunter2")).unwrap();

        let helper = fs::read_to_string(&script).unwrap();
        assert!(!helper.contains("hunter2"), "helper was: {helper}");
        for name in [ASKPASS_SCRIPT, PASSWORD_FILE] {
            let mode = fs::metadata(dir.path().join(name)).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0, "{name} is accessible to others: {mode:o}");
        }
        assert_eq!(
            write_askpass(dir.path(), &SecretString::from("other"))
                .unwrap_err()
                .kind(),
            io::ErrorKind::AlreadyExists
        );
    }

    #[test]
    fn control_socket_lives_in_private_directory() {
        let (_fake, executor) = fake_executor(None);
        executor.run("true").unwrap();

        let socket = control_path(&executor);
        let dir = socket.parent().unwrap();
        let mode = fs::metadata(dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0, "session directory mode was {mode:o}");
        assert_eq!(socket.file_name().unwrap(), CONTROL_SOCKET);

        let dir = dir.to_owned();
        drop(executor);
        assert!(!dir.exists(), "session directory survived the executor");
    }

    #[test]
    fn one_master_serves_every_command() {
        let (fake, executor) = fake_executor(None);
        assert_eq!(executor.run("echo one").unwrap().as_deref(), Some("one"));
        assert_eq!(executor.run("echo two").unwrap().as_deref(), Some("two"));
        assert_eq!(calls(&fake), ["master", "exec", "exec"]);

        drop(executor);
        assert_eq!(calls(&fake), ["master", "exec", "exec", "exit"]);
    }

    #[test]
    fn vanished_master_is_reopened() {
        let (fake, executor) = fake_executor(None);
        executor.run("true").unwrap();
        let first = control_path(&executor);
        fs::remove_file(&first).unwrap();

        assert_eq!(executor.run("echo again").unwrap().as_deref(), Some("again"));
        assert_eq!(calls(&fake), ["master", "exec", "master", "exec"]);
        assert_ne!(control_path(&executor), first);
    }

    #[test]
    fn password_reaches_askpass_but_not_master_environment() {
        let (fake, executor) = fake_executor(Some("hunter2"));
        executor.run("true").unwrap();

        let answer = fs::read_to_string(fake.path().join("answer")).unwrap();
        assert_eq!(answer, "hunter2\n");
        let env = fs::read_to_string(fake.path().join("master-env")).unwrap();
        assert!(!env.contains("hunter2"), "password leaked into the environment");

        let session_dir = control_path(&executor).parent().unwrap().to_owned();
        assert!(!session_dir.join(PASSWORD_FILE).exists());
        assert!(!session_dir.join(ASKPASS_SCRIPT).exists());
    }

    #[test]
    fn error_output_fails_the_command() {
        let (_fake, executor) = fake_executor(None);
        let err = executor.run("echo 'disk full' >&2").unwrap_err();
        let ExecError::RemoteCommand { host, message } = err else {
            panic!("expected a remote command failure");
        };
        assert_eq!(host, "10.0.0.2");
        assert_eq!(message, "disk full");
    }

    #[test]
    fn ssh_failure_status_is_a_transport_error() {
        let (_fake, executor) = fake_executor(None);
        let err = executor.run("exit 255").unwrap_err();
        assert!(
            matches!(err, ExecError::Transport { ref host, .. } if host == "10.0.0.2"),
            "got {err:?}"
        );
    }

    #[test]
    fn failed_master_reports_transport_error() {
        let target = target().with_ssh_command("false", &[]);
        let executor = SshExecutor::new(target, None);
        let err = executor.run("true").unwrap_err();
        assert!(matches!(err, ExecError::Transport { .. }), "got {err:?}");
        assert!(executor.session.borrow().is_none());
    }
}
