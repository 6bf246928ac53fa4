//! Symbolic-computation backends.
//!
//! The engine never does algebra itself: every operator and most built-in
//! functions are forwarded to a [`Backend`] as a line of algebraic text
//! (`(3)+(1/2)`, `latex([1,2])`, `simplify(2*x+x)`) and get text back.
//!
//! A failed evaluation is not an `Err`: the backend answers with text
//! containing [`ERROR_MARKER`] and each call site degrades to its documented
//! neutral value.  Whether a backend is usable at all is a separate question,
//! answered once at startup by [`Backend::probe`].
//!
//! | Backend | Where it computes |
//! |---------|-------------------|
//! | [`ExactBackend`] | in-process, exact rationals and matrices |
//! | [`ProcessBackend`] | an external CAS program, one call per process |

pub mod exact;
pub mod process;

pub use exact::ExactBackend;
pub use process::ProcessBackend;

use thiserror::Error;

/// Reserved substring marking a failed evaluation.
pub const ERROR_MARKER: &str = "ERROR:";

/// Returns `true` if a backend answer denotes failure.
pub fn is_error(result: &str) -> bool {
    result.contains(ERROR_MARKER)
}

/// Returns `true` if a `simplify(…)` answer denotes failure.
pub fn is_undefined(result: &str) -> bool {
    is_error(result) || result == "undef" || result == "nde"
}

/// Format an error answer.
pub fn error_text(message: impl std::fmt::Display) -> String {
    format!("{ERROR_MARKER} {message}")
}

/// Why a backend is unusable.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cannot start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("backend `{name}` answered `{got}` to `{probe}`")]
    Unexpected {
        name: String,
        probe: String,
        got: String,
    },
}

/// Text-in, text-out symbolic evaluator.
pub trait Backend {
    /// Evaluate one expression.  Failures are reported in-band with
    /// [`ERROR_MARKER`].
    fn evaluate(&self, expr: &str) -> String;

    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Check the backend answers sensibly before any script runs.
    fn probe(&self) -> Result<(), BackendError> {
        const PROBE: &str = "1+1";
        let got = self.evaluate(PROBE);
        if got.trim() == "2" {
            Ok(())
        } else {
            Err(BackendError::Unexpected {
                name: self.name().to_owned(),
                probe: PROBE.to_owned(),
                got,
            })
        }
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn evaluate(&self, expr: &str) -> String {
        (**self).evaluate(expr)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn probe(&self) -> Result<(), BackendError> {
        (**self).probe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Backend for Echo {
        fn evaluate(&self, expr: &str) -> String {
            expr.to_owned()
        }
        fn name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn markers() {
        assert!(is_error("ERROR: bad"));
        assert!(!is_error("3/2"));
        assert!(is_undefined("undef"));
        assert!(is_undefined("nde"));
        assert!(is_undefined(&error_text("x")));
        assert!(!is_undefined("2*x"));
    }

    #[test]
    fn default_probe_reports_answer() {
        let err = Echo.probe().unwrap_err();
        assert!(err.to_string().contains("`1+1`"));
        assert!(ExactBackend::new().probe().is_ok());
    }
}
