//! Recording executor for tests.

use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;

use crate::error::ExecError;
use crate::exec::Executor;

type Responder = Box<dyn FnMut(&str) -> Result<Option<String>, ExecError>>;

struct MockState {
    commands: Vec<String>,
    responder: Responder,
}

/// Test double that records every command and answers through a closure.
///
/// Clones share the recorded commands, so a clone can be handed to a
/// [`crate::Host`] while the test keeps the other one for assertions.
#[derive(Clone)]
pub struct MockExecutor {
    state: Rc<RefCell<MockState>>,
}

impl MockExecutor {
    /// Every command succeeds without output.
    #[must_use]
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(None))
    }

    /// Commands are answered by `responder`.
    #[must_use]
    pub fn with_responder(
        responder: impl FnMut(&str) -> Result<Option<String>, ExecError> + 'static,
    ) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                commands: Vec::new(),
                responder: Box::new(responder),
            })),
        }
    }

    /// Commands matching one of the given command lines exactly return its output,
    /// everything else returns no output.
    #[must_use]
    pub fn with_responses<'resp>(
        responses: impl IntoIterator<Item = (&'resp str, &'resp str)>,
    ) -> Self {
        let responses: Vec<(String, String)> = responses
            .into_iter()
            .map(|(command, output)| (command.to_owned(), output.to_owned()))
            .collect();
        Self::with_responder(move |command| {
            Ok(responses
                .iter()
                .find(|&&(ref known, _)| known == command)
                .map(|&(_, ref output)| output.clone()))
        })
    }

    /// All command lines executed so far, oldest first.
    #[must_use]
    pub fn executed_commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockExecutor")
            .field("commands", &self.state.borrow().commands)
            .finish_non_exhaustive()
    }
}

impl Executor for MockExecutor {
    fn run(&self, command: &str) -> Result<Option<String>, ExecError> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(command.to_owned());
        (state.responder)(command)
    }
}
