//! Output-line templating.
//!
//! Free-text lines of a script may embed three kinds of fragments:
//!
//! | Fragment            | Meaning                                              |
//! |---------------------|------------------------------------------------------|
//! | `{guard:text}`      | keep `text` if `guard` is truthy, drop it otherwise  |
//! | `{simplify:expr}`   | replace by the simplified, presented form of `expr`  |
//! | `{name}`            | replace by the presented value of variable `name`    |
//!
//! Fragments are rewritten left to right, then every remaining `{name}` is
//! substituted in one pass.  A fragment whose guard is not a valid
//! expression is left as ordinary text; an empty guard (`{:text}`) always
//! keeps `text`.
//!
//! Substituting a signed value next to a sign folds the pair (`+-3` → `-3`,
//! `--3` → `+3`); `+-` and `--` written literally in the line are kept.

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::backend::{is_error, is_undefined, Backend};

use super::env::ExecEnv;
use super::expr::{eval_expr, verify_tokens};
use super::registry::{CallContext, DENYLIST};
use super::token::{join, tokenize};
use super::value::check_value;

/// Stand-ins for `+-` and `--` already present in the source line.
const PLUS_MINUS: &str = "\u{E000}";
const MINUS_MINUS: &str = "\u{E001}";

static DENIED: Lazy<AhoCorasick> = Lazy::new(|| AhoCorasick::new(DENYLIST.iter().copied()));

static VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-zA-Z][a-zA-Z0-9_]*)\}").expect("variable pattern"));

/// A presented flat vector: `"[a,b,c]"`.
static COLUMN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^"\[([^\],],?)*\]"$"#).expect("column pattern"));

// ── Presentation ──────────────────────────────────────────────────────────────

/// Render a value for output.  `None` if the backend cannot.
pub fn present(backend: &dyn Backend, value: &str, presentation: bool) -> Option<String> {
    if !presentation {
        return Some(value.to_owned());
    }
    let res = backend.evaluate(&format!("latex({value})"));
    if is_error(&res) || res == "\\,\\mathrm{undef}\\," || res == "nde" {
        return None;
    }
    if COLUMN.is_match(&res) {
        let inner = &res[2..res.len() - 2];
        let rows: Vec<&str> = inner.split(',').collect();
        return Some(format!("\\begin{{bmatrix}} {} \\end{{bmatrix}}", rows.join(" \\\\ ")));
    }
    let unquoted = res
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(&res);
    Some(unquoted.to_owned())
}

fn substitute(text: &str, env: &ExecEnv, mut render: impl FnMut(&str) -> String) -> String {
    VARIABLE
        .replace_all(text, |caps: &Captures<'_>| match env.get(&caps[1]) {
            Some(v) => render(v),
            None => caps[0].to_owned(),
        })
        .into_owned()
}

// ── Fragment scanner ──────────────────────────────────────────────────────────

/// Advance `cursor` to the `}` closing the fragment it is in.  Returns the
/// final nesting level: `-1` when found, `>= 0` when the line ran out.
fn goto_closing(line: &[u8], cursor: &mut usize) -> i32 {
    let mut level = 0;
    while level >= 0 && *cursor + 1 < line.len() {
        *cursor += 1;
        match line[*cursor] {
            b'{' => level += 1,
            b'}' => level -= 1,
            _ => {}
        }
    }
    level
}

struct Templater<'a> {
    ctx: &'a mut dyn CallContext,
    env: &'a ExecEnv,
    presentation: bool,
}

impl Templater<'_> {
    fn present_or_raw(&self, value: &str) -> String {
        present(self.ctx.backend(), value, self.presentation).unwrap_or_else(|| {
            tracing::warn!(value, "cannot present value");
            value.to_owned()
        })
    }

    /// Replacement text for `{simplify:raw}`.
    fn simplify(&self, raw: &str) -> String {
        if DENIED.is_match(raw) {
            tracing::debug!(raw, "simplify fragment denied");
            return format!("\\color{{Red}}{{{raw}}}");
        }
        let substituted = substitute(raw, self.env, |v| format!("({v})"));
        let backend = self.ctx.backend();
        let simplified = backend.evaluate(&format!("simplify({substituted})"));
        if !is_undefined(&simplified) {
            return present(backend, &simplified, self.presentation).unwrap_or(simplified);
        }
        tracing::warn!(raw, "simplify failed");
        let shown = present(backend, &substituted, self.presentation)
            .or_else(|| present(backend, raw, self.presentation))
            .unwrap_or_else(|| raw.to_owned());
        format!("\\color{{Red}}{{{shown}}}")
    }

    fn run(&mut self, src: &str) -> String {
        let mut line = src
            .trim()
            .replace("+-", PLUS_MINUS)
            .replace("--", MINUS_MINUS);
        let mut cursor = 0;
        let mut bracket: Option<usize> = None;

        while cursor < line.len() {
            match line.as_bytes()[cursor] {
                b'{' => bracket = Some(cursor),
                b'}' => bracket = None,
                b':' => {
                    if let Some(open) = bracket {
                        let guard = tokenize(&line[open + 1..cursor]);
                        let colon = cursor;
                        if guard.len() == 1 && guard[0].is("simplify") {
                            bracket = None;
                            if goto_closing(line.as_bytes(), &mut cursor) >= 0 {
                                tracing::debug!(fragment = &line[open..], "unclosed simplify");
                                cursor = colon + 2;
                                continue;
                            }
                            let replacement = self.simplify(&line[colon + 1..cursor]).replace('\n', "");
                            line = format!("{}{}{}", &line[..open], replacement, &line[cursor + 1..]);
                            cursor = open;
                            continue;
                        }
                        if guard.is_empty() || verify_tokens(self.env, &guard).is_empty() {
                            bracket = None;
                            let keep =
                                guard.is_empty() || check_value(&eval_expr(self.ctx, self.env, &guard));
                            tracing::debug!(guard = %join(&guard), keep, "condition fragment");
                            if goto_closing(line.as_bytes(), &mut cursor) >= 0 {
                                tracing::debug!(fragment = &line[open..], "unclosed condition");
                                cursor = colon + 2;
                                continue;
                            }
                            let kept = if keep { &line[colon + 1..cursor] } else { "" };
                            line = format!("{}{}{}", &line[..open], kept, &line[cursor + 1..]);
                            cursor = open;
                            continue;
                        }
                    }
                }
                _ => {}
            }
            cursor += 1;
        }

        let line = substitute(&line, self.env, |v| self.present_or_raw(v).replace('\n', ""));
        line.replace("+-", "-")
            .replace("--", "+")
            .replace(PLUS_MINUS, "+-")
            .replace(MINUS_MINUS, "--")
    }
}

/// Render one free-text line against the current variables.
pub fn output_line(ctx: &mut dyn CallContext, env: &ExecEnv, line: &str, presentation: bool) -> String {
    Templater { ctx, env, presentation }.run(line)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
