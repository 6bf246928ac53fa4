//! External CAS backend.
//!
//! Each evaluation spawns the configured program, writes the expression plus
//! a newline to its stdin and takes the first non-empty stdout line as the
//! answer.  One process per call keeps calls independent: no session state
//! leaks from one script line to the next.

use std::io::{self, Write};
use std::process::{Command, Stdio};

use super::{error_text, Backend, BackendError};

/// Runs `program args…` once per evaluation.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    fn run(&self, expr: &str) -> io::Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let written = match child.stdin.take() {
            Some(mut stdin) => writeln!(stdin, "{expr}"),
            None => Ok(()),
        };
        // Reap the child even when it closed stdin early.
        let out = child.wait_with_output()?;
        written?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(line) => Ok(line.to_owned()),
            None => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                Ok(error_text(format!("no answer ({}) {}", out.status, stderr.trim())))
            }
        }
    }
}

impl Backend for ProcessBackend {
    fn evaluate(&self, expr: &str) -> String {
        self.run(expr).unwrap_or_else(|e| {
            tracing::warn!(program = %self.program, error = %e, "backend call failed");
            error_text(e)
        })
    }

    fn name(&self) -> &str {
        &self.program
    }

    fn probe(&self) -> Result<(), BackendError> {
        const PROBE: &str = "1+1";
        let got = self.run(PROBE).map_err(|source| BackendError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        if got == "2" {
            Ok(())
        } else {
            Err(BackendError::Unexpected {
                name: self.program.clone(),
                probe: PROBE.to_owned(),
                got,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_fails_probe() {
        let b = ProcessBackend::new("rj-no-such-cas-program", vec![]);
        assert!(matches!(b.probe(), Err(BackendError::Spawn { .. })));
        assert!(crate::backend::is_error(&b.evaluate("1+1")));
    }

    #[cfg(unix)]
    #[test]
    fn answer_is_first_stdout_line() {
        let cat = ProcessBackend::new("cat", vec![]);
        assert_eq!(cat.evaluate("3/2"), "3/2");
        assert!(matches!(cat.probe(), Err(BackendError::Unexpected { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn closed_stdin_is_reaped_and_reported() {
        let t = ProcessBackend::new("true", vec![]);
        let big = "1+".repeat(1 << 20) + "1";
        let err = t.run(&big).expect_err("stdin write should fail");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(crate::backend::is_error(&t.evaluate(&big)));
    }

    #[cfg(unix)]
    #[test]
    fn silent_program_is_an_error() {
        let t = ProcessBackend::new("true", vec![]);
        assert!(crate::backend::is_error(&t.evaluate("1")));
    }
}
