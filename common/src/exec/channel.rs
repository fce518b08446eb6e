//! Interactive channel handling for privileged commands.
//!
//! Once a command has been sent, every piece of data coming back is classified as normal
//! output, error output or an escalation prompt. Prompts are answered synchronously with
//! the configured password, error output aborts the command, and everything else is
//! collected until the channel closes.

use secrecy::{ExposeSecret as _, SecretString};
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::exec::finish_output;

/// The exact prompt text that is answered with the host's password.
pub const PASSWORD_PROMPT: &str = "Password:";

/// Raw events produced by a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A chunk of the remote process' output.
    Data(String),
    /// A chunk written to the error stream.
    ErrorData(String),
    /// The remote process finished and all output was delivered.
    Closed,
}

/// A bidirectional, already executing command session.
pub trait Channel {
    /// Blocks until the next event is available.
    ///
    /// # Errors
    ///
    /// Returns transport level failures.
    fn next_event(&mut self) -> Result<ChannelEvent, ExecError>;

    /// Writes data to the remote process' input.
    ///
    /// # Errors
    ///
    /// Returns transport level failures.
    fn send(&mut self, data: &[u8]) -> Result<(), ExecError>;

    /// Tears the session down without waiting for the remote process.
    fn abort(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Command issued, nothing received yet.
    Sent,
    AwaitingEvent,
    Done,
}

#[derive(Debug, PartialEq, Eq)]
enum Event<'event> {
    DataChunk(&'event str),
    PromptDetected,
    ErrorChunk(&'event str),
    Closed,
}

impl<'event> From<&'event ChannelEvent> for Event<'event> {
    fn from(event: &'event ChannelEvent) -> Self {
        match *event {
            ChannelEvent::Data(ref data) if data.trim_end() == PASSWORD_PROMPT => {
                Self::PromptDetected
            }
            ChannelEvent::Data(ref data) => Self::DataChunk(data),
            ChannelEvent::ErrorData(ref data) => Self::ErrorChunk(data),
            ChannelEvent::Closed => Self::Closed,
        }
    }
}

#[derive(Debug)]
enum Step {
    Continue,
    SendCredential,
    Finished(Option<String>),
    Failed(ExecError),
}

/// Transition table of a single command execution.
#[derive(Debug)]
struct Interaction<'host> {
    host: &'host str,
    has_credential: bool,
    state: State,
    buffer: Option<String>,
}

impl<'host> Interaction<'host> {
    const fn new(host: &'host str, has_credential: bool) -> Self {
        Self {
            host,
            has_credential,
            state: State::Sent,
            buffer: None,
        }
    }

    fn on_event(&mut self, event: Event<'_>) -> Step {
        if self.state == State::Done {
            return Step::Failed(ExecError::RemoteCommand {
                host: self.host.to_owned(),
                message: "event received after the channel completed".to_owned(),
            });
        }
        self.state = State::AwaitingEvent;

        match event {
            Event::DataChunk(data) => {
                self.buffer.get_or_insert_with(String::new).push_str(data);
                Step::Continue
            }
            Event::PromptDetected if self.has_credential => Step::SendCredential,
            Event::PromptDetected => {
                self.state = State::Done;
                Step::Failed(ExecError::MissingCredential {
                    host: self.host.to_owned(),
                })
            }
            Event::ErrorChunk(data) => {
                self.state = State::Done;
                Step::Failed(ExecError::RemoteCommand {
                    host: self.host.to_owned(),
                    message: data.trim_end().to_owned(),
                })
            }
            Event::Closed => {
                self.state = State::Done;
                Step::Finished(finish_output(self.buffer.take()))
            }
        }
    }
}

/// Runs the prompt/output protocol on an executing channel until it terminates.
///
/// On failure the channel is aborted and nothing further is written to it.
///
/// # Errors
///
/// * [`ExecError::MissingCredential`] if a password prompt shows up and `password` is `None`
/// * [`ExecError::RemoteCommand`] as soon as anything arrives on the error stream
/// * whatever the channel itself reports
pub fn drive<C: Channel + ?Sized>(
    channel: &mut C,
    host: &str,
    password: Option<&SecretString>,
) -> Result<Option<String>, ExecError> {
    let mut interaction = Interaction::new(host, password.is_some());
    loop {
        let event = match channel.next_event() {
            Ok(event) => event,
            Err(e) => {
                channel.abort();
                return Err(e);
            }
        };
        match interaction.on_event(Event::from(&event)) {
            Step::Continue => {}
            Step::SendCredential => {
                debug!(%host, "answering password prompt");
                if let Some(secret) = password {
                    let sent = channel
                        .send(secret.expose_secret().as_bytes())
                        .and_then(|()| channel.send(b"\n"));
                    if let Err(e) = sent {
                        channel.abort();
                        return Err(e);
                    }
                }
            }
            Step::Finished(output) => return Ok(output),
            Step::Failed(e) => {
                warn!(%host, error = %e, "aborting remote command");
                channel.abort();
                return Err(e);
            }
        }
    }
}
