//! The Red Juice exercise language.
//!
//! A script mixes `;`-terminated statements with free-text output lines:
//!
//! - `VAR name[i]… = expr;` assigns (optionally one cell of an array)
//! - `IF` / `ELIF` / `ELSE` / `ENDIF` and `WHILE` / `ENDWHILE` control flow
//! - `START name;` / `END name;` open and close named output blocks
//! - `TIME seconds;` attaches a timer to the current block
//! - text lines are templated (`{name}`, `{guard:text}`, `{simplify:expr}`)
//!
//! Values are opaque text in the backend's algebraic syntax; every operator
//! and most functions are evaluated by a [`Backend`].
//!
//! # Quick start
//!
//! ```rust
//! use rj::script::Engine;
//!
//! let mut engine = Engine::default();
//! let src = "VAR a = 6 * 7;\nthe answer is {a}";
//! assert!(engine.verify(src).is_empty());
//! let out = engine.eval(src);
//! assert_eq!(out.content.get("").map(String::as_str), Some("the answer is 42\n"));
//! ```

pub mod array;
pub mod cond;
pub mod env;
pub mod expand;
pub mod expr;
pub mod interp;
pub mod output;
pub mod registry;
pub mod stmt;
pub mod token;
pub mod value;
pub mod verify;

// Re-exports for convenience.
pub use output::{sort_keys, BlockMap, EvalOutput, Seconds, TimerMap};
pub use registry::CallContext;
pub use verify::Diagnostic;

use crate::backend::{Backend, ExactBackend};
use crate::random::{Random, SineRandom};

/// Run-time switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Render substituted values as LaTeX through the backend.
    pub presentation: bool,
    /// Number of executed lines after which `eval` gives up.
    pub line_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings { presentation: true, line_limit: 10_000 }
    }
}

/// Verifies and evaluates scripts.
///
/// Each call works on its own environment and stacks; only the settings,
/// the backend and the random generator's seed carry over between calls.
pub struct Engine {
    pub settings: Settings,
    backend: Box<dyn Backend>,
    random: Box<dyn Random>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(Settings::default(), Box::new(ExactBackend::new()), Box::new(SineRandom::from_entropy()))
    }
}

impl Engine {
    pub fn new(settings: Settings, backend: Box<dyn Backend>, random: Box<dyn Random>) -> Self {
        Engine { settings, backend, random }
    }

    pub fn seed(&self) -> f64 {
        self.random.seed()
    }

    pub fn set_seed(&mut self, seed: f64) {
        self.random.set_seed(seed);
    }

    /// Check a script; an empty list means it may be evaluated.
    pub fn verify(&self, src: &str) -> Vec<Diagnostic> {
        verify::verify(src)
    }

    /// Run a verified script.
    pub fn eval(&mut self, src: &str) -> EvalOutput {
        let settings = self.settings;
        interp::execute(self, settings, src)
    }
}

impl CallContext for Engine {
    fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    fn random(&mut self) -> &mut dyn Random {
        self.random.as_mut()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(seed: f64) -> Engine {
        Engine::new(Settings::default(), Box::new(ExactBackend::new()), Box::new(SineRandom::new(seed)))
    }

    #[test]
    fn verify_then_eval() {
        let mut e = engine(46.0);
        let src = "VAR a = RAND(10,20)/RAND(1000,2000);\n${a}$\n";
        assert!(e.verify(src).is_empty());
        let out = e.eval(src);
        assert_eq!(out.content.get("").map(String::as_str), Some("$\\frac{19}{1731}$\n"));
        assert_eq!(e.seed(), 48.0);
    }

    #[test]
    fn seed_is_settable() {
        let mut e = engine(1.0);
        e.set_seed(46.0);
        let first = e.eval("VAR a = RAND(10,20);\n{a}");
        e.set_seed(46.0);
        let second = e.eval("VAR a = RAND(10,20);\n{a}");
        assert_eq!(first, second);
        assert_eq!(first.content.get("").map(String::as_str), Some("19\n"));
    }

    #[test]
    fn calls_do_not_share_variables() {
        let mut e = engine(46.0);
        e.eval("VAR a = 5;");
        let out = e.eval("{a}");
        assert_eq!(out.content.get("").map(String::as_str), Some("{a}\n"));
        assert_eq!(e.verify("VAR b = a;").len(), 1);
    }

    #[test]
    fn output_serializes_to_json() {
        let mut e = engine(46.0);
        let out = e.eval("START ex;\nTIME 30;\nhello\nEND ex;");
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r##"{"content":{"#ex":"hello\n"},"timers":{"#ex":30}}"##
        );
    }

    #[test]
    fn presentation_can_be_disabled() {
        let mut e = engine(46.0);
        e.settings.presentation = false;
        let out = e.eval("VAR a = 1/2;\n{a}");
        assert_eq!(out.content.get("").map(String::as_str), Some("1/2\n"));
    }
}
