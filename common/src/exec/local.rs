use std::process::{Command, Stdio};

use crate::error::ExecError;
use crate::exec::{Executor, finish_output};

/// Runs commands through `sh -c` on this machine.
///
/// Standard error is passed through to the operator's terminal, only standard output
/// is captured.
#[derive(Debug)]
pub struct LocalExecutor {
    host: String,
}

impl LocalExecutor {
    #[must_use]
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_owned(),
        }
    }
}

impl Executor for LocalExecutor {
    fn run(&self, command: &str) -> Result<Option<String>, ExecError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| ExecError::io(&self.host, e))?;

        let buffer = (!output.stdout.is_empty())
            .then(|| String::from_utf8_lossy(&output.stdout).into_owned());
        Ok(finish_output(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_stdout_without_trailing_newline() {
        let executor = LocalExecutor::new("localhost");
        let output = executor.run("echo 'hello'").unwrap();
        assert_eq!(output.as_deref(), Some("hello"));
    }

    #[test]
    fn silent_command_yields_none() {
        let executor = LocalExecutor::new("localhost");
        assert_eq!(executor.run("true").unwrap(), None);
    }

    #[test]
    fn missing_path_listing_is_not_an_error() {
        let executor = LocalExecutor::new("localhost");
        let output = executor
            .run("ls /definitely/not/a/fleetshift/path/ 2>/dev/null")
            .unwrap();
        assert_eq!(output, None);
    }
}
