//! `.rjrc` configuration file parser.
//!
//! One setting per line, `key = value`:
//!
//! | Key            | Value                                         |
//! |----------------|-----------------------------------------------|
//! | `presentation` | `on`/`off` (also `true`/`false`, `1`/`0`)     |
//! | `limit`        | executed-line budget of one evaluation        |
//! | `seed`         | initial seed of the random generator          |
//! | `backend`      | CAS program to run instead of the exact one   |
//! | `backend_args` | its arguments, shell-style quoting allowed    |
//! | Lines starting with `#` or `;` | comment, ignored              |
//!
//! Bad lines are reported and skipped; the rest of the file still applies.

use std::path::Path;

use thiserror::Error;

use crate::script::Settings;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

/// Settings read from a config file; `None` means "not set here".
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Config {
    pub presentation: Option<bool>,
    pub limit: Option<usize>,
    pub seed: Option<f64>,
    pub backend: Option<String>,
    pub backend_args: Vec<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.  Returns the config and every bad line.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                errors.push(ConfigError { line: i + 1, message: format!("expected `key = value`, got `{line}`") });
                continue;
            };
            if let Err(message) = config.apply(key.trim(), value.trim()) {
                errors.push(ConfigError { line: i + 1, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "presentation" => self.presentation = Some(parse_bool(value)?),
            "limit" => {
                let n: usize = value.parse().map_err(|_| format!("invalid limit `{value}`"))?;
                if n == 0 {
                    return Err("limit must be positive".to_owned());
                }
                self.limit = Some(n);
            }
            "seed" => {
                let seed: f64 = value.parse().map_err(|_| format!("invalid seed `{value}`"))?;
                if !seed.is_finite() {
                    return Err(format!("invalid seed `{value}`"));
                }
                self.seed = Some(seed);
            }
            "backend" => self.backend = (!value.is_empty()).then(|| value.to_owned()),
            "backend_args" => self.backend_args = split_args(value),
            _ => return Err(format!("unknown setting `{key}`")),
        }
        Ok(())
    }

    /// Overlay these settings on `settings`.
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(p) = self.presentation {
            settings.presentation = p;
        }
        if let Some(n) = self.limit {
            settings.line_limit = n;
        }
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(format!("invalid boolean `{value}`")),
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split a backend command line into arguments.  Double quotes group words
/// (`""` is an empty argument); inside them `\` takes the next character
/// literally.
pub fn split_args(s: &str) -> Vec<String> {
    #[derive(Clone, Copy)]
    enum Mode {
        Between,
        Bare,
        Quoted,
        Escaped,
    }

    let mut args = Vec::new();
    let mut word: Option<String> = None;
    let mut mode = Mode::Between;
    for c in s.chars() {
        mode = match (mode, c) {
            (Mode::Escaped, c) => {
                word.get_or_insert_with(String::new).push(c);
                Mode::Quoted
            }
            (Mode::Quoted, '\\') => Mode::Escaped,
            (Mode::Quoted, '"') => Mode::Bare,
            (Mode::Quoted, c) => {
                word.get_or_insert_with(String::new).push(c);
                Mode::Quoted
            }
            (_, '"') => {
                word.get_or_insert_with(String::new);
                Mode::Quoted
            }
            (_, c) if c.is_ascii_whitespace() => {
                args.extend(word.take());
                Mode::Between
            }
            (_, c) => {
                word.get_or_insert_with(String::new).push(c);
                Mode::Bare
            }
        };
    }
    args.extend(word);
    args
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#"-q "--eval x" plain"#), ["-q", "--eval x", "plain"]);
        assert_eq!(split_args(r#""say \"hi\"""#), [r#"say "hi""#]);
        assert!(split_args("   ").is_empty());
        assert_eq!(split_args(r#"a "" b"#), ["a", "", "b"]);
        assert_eq!(split_args(r#"--x="1 2"z"#), ["--x=1 2z"]);
        assert_eq!(split_args(r"c:\dir"), [r"c:\dir"]);
    }

    #[test]
    fn full_file() {
        let src = "# red juice settings\n\
                   presentation = off\n\
                   ; old style comment\n\
                   limit = 500\n\
                   seed = 46\n\
                   backend = giac\n\
                   backend_args = --quiet \"-e x\"\n";
        let (config, errors) = Config::load_str(src);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(config.presentation, Some(false));
        assert_eq!(config.limit, Some(500));
        assert_eq!(config.seed, Some(46.0));
        assert_eq!(config.backend.as_deref(), Some("giac"));
        assert_eq!(config.backend_args, ["--quiet", "-e x"]);
    }

    #[test]
    fn bad_lines_are_reported_and_skipped() {
        let (config, errors) = Config::load_str("limit = lots\ncolour = red\nseed 4\npresentation = ON\n");
        assert_eq!(config.presentation, Some(true));
        assert_eq!(config.limit, None);
        let lines: Vec<usize> = errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, [1, 2, 3]);
        assert_eq!(errors[1].to_string(), "line 2: unknown setting `colour`");
    }

    #[test]
    fn zero_limit_rejected() {
        let (config, errors) = Config::load_str("limit = 0");
        assert_eq!(config.limit, None);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn overlay_on_settings() {
        let (config, _) = Config::load_str("limit = 7");
        let mut settings = Settings::default();
        config.apply_to(&mut settings);
        assert_eq!(settings, Settings { presentation: true, line_limit: 7 });
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".rjrc");
        std::fs::write(&path, "seed = 3\n").unwrap();
        let (config, errors) = Config::load_file(&path).unwrap();
        assert!(errors.is_empty());
        assert_eq!(config.seed, Some(3.0));
        assert!(Config::load_file(&dir.path().join("missing")).is_err());
    }
}
