//! Command-line argument parsing.
//!
//! Usage:
//!   rj [-vqdjfl] [-s <seed>] [-o <file>] [-c <config>] [--backend <program>] [--limit <n>] [<file>]
//!
//! Without `<file>` the script is read from stdin, which must then not be a
//! terminal.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Parser, Debug, Default)]
#[command(name = "rj", version = VERSION, about = "Red Juice exercise interpreter")]
pub struct CliArgs {
    /// Script to verify and evaluate (stdin when omitted).
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
    /// Print phase timings.
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,
    /// Do not print the banner.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    pub quiet: bool,
    /// Trace evaluation on stderr.
    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    pub debug: bool,
    /// Write JSON output to FILE (implies --json).
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Print errors and results as JSON.
    #[arg(short = 'j', long = "json", action = ArgAction::SetTrue)]
    pub json: bool,
    /// Keep only exercise blocks, in presentation order.
    #[arg(short = 'f', long = "final", action = ArgAction::SetTrue)]
    pub final_keys: bool,
    /// Seed of the random generator.
    #[arg(short = 's', long = "seed", value_name = "N")]
    pub seed: Option<f64>,
    /// Render values as LaTeX.
    #[arg(short = 'l', long = "latex", action = ArgAction::SetTrue)]
    pub latex: bool,
    /// Config file to load instead of searching for one.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// External CAS program used as backend.
    #[arg(long = "backend", value_name = "PROGRAM")]
    pub backend: Option<String>,
    /// Executed-line budget.
    #[arg(long = "limit", value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: Option<u64>,
}

impl CliArgs {
    /// JSON is used for `-j` and whenever output goes to a file.
    pub fn json_output(&self) -> bool {
        self.json || self.output.is_some()
    }

    /// The banner is shown unless quiet, and never mixed into JSON on stdout.
    pub fn show_banner(&self) -> bool {
        !self.quiet && (!self.json_output() || self.output.is_some())
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse a slice of argument strings, program name excluded (exposed for
/// testing).
pub fn parse_argv(argv: &[&str]) -> Result<CliArgs, clap::Error> {
    CliArgs::try_parse_from(std::iter::once("rj").chain(argv.iter().copied()))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Search for the user config file in the standard locations.
/// Returns the first path that exists, or `None`.
pub fn find_user_config() -> Option<PathBuf> {
    let home = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf());
    let mut candidates = Vec::new();
    if let Some(home) = home {
        candidates.push(home.join(".rjrc"));
        candidates.push(home.join("rjrc"));
    }
    candidates.push(PathBuf::from("./.rjrc"));
    candidates.push(PathBuf::from("./rjrc"));
    candidates.into_iter().find(|p| p.exists())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_args() {
        let a = parse_argv(&[]).unwrap();
        assert!(a.file.is_none());
        assert!(!a.json_output());
        assert!(a.show_banner());
    }

    #[test]
    fn file_positional() {
        let a = parse_argv(&["exercise.rj"]).unwrap();
        assert_eq!(a.file, Some(PathBuf::from("exercise.rj")));
    }

    #[test]
    fn combined_bool_flags() {
        let a = parse_argv(&["-vqdjfl"]).unwrap();
        assert!(a.verbose && a.quiet && a.debug && a.json && a.final_keys && a.latex);
        assert!(!a.show_banner());
    }

    #[test]
    fn output_implies_json_and_keeps_banner() {
        let a = parse_argv(&["-o", "out.json", "x.rj"]).unwrap();
        assert!(a.json_output());
        assert!(a.show_banner());
        let a = parse_argv(&["-j"]).unwrap();
        assert!(!a.show_banner());
    }

    #[test]
    fn values() {
        let a = parse_argv(&["-s", "46", "--limit", "100", "--backend", "giac", "-c", "my.rjrc"]).unwrap();
        assert_eq!(a.seed, Some(46.0));
        assert_eq!(a.limit, Some(100));
        assert_eq!(a.backend.as_deref(), Some("giac"));
        assert_eq!(a.config, Some(PathBuf::from("my.rjrc")));
    }

    #[test]
    fn bad_values() {
        assert!(parse_argv(&["--limit", "0"]).is_err());
        assert!(parse_argv(&["-s", "soon"]).is_err());
        assert!(parse_argv(&["-z"]).is_err());
        assert!(parse_argv(&["a", "b"]).is_err());
    }
}
