//! Script verification.
//!
//! Walks every line once, checking each statement on its own and tracking
//! three independent nesting stacks (conditions, loops, named blocks).  A
//! construct may only be closed while it is the most recently opened one
//! across all three stacks.  Errors accumulate; nothing here aborts.

use serde::ser::{Serialize, Serializer};
use std::fmt;

use super::env::{Scope, VerifyEnv};
use super::expr::{verify_expr, verify_tokens};
use super::registry;
use super::stmt::{parse_line, Keyword, Line, Statement};
use super::token::{is_identifier, Token};
use super::value::{is_integer, is_numeric};

/// One verification error.  Offsets are byte offsets into the line (after
/// comment removal); `line` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, start: usize, end: usize, line: usize) -> Self {
        Diagnostic { message: message.into(), start, end, line }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} : {}", self.line, self.message)
    }
}

/// Serialized as `[message, start, end, line]`.
impl Serialize for Diagnostic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.message, self.start, self.end, self.line).serialize(serializer)
    }
}

// ── Nesting stacks ────────────────────────────────────────────────────────────

/// An opened construct and the span reported if it is never closed.
#[derive(Debug, Clone, Copy)]
struct Opened {
    line: usize,
    start: usize,
    end: usize,
}

#[derive(Debug)]
struct Condition {
    opened: Opened,
    seen_else: bool,
}

#[derive(Debug)]
struct Block {
    name: String,
    opened: Opened,
}

#[derive(Default)]
struct Verifier {
    env: VerifyEnv,
    errors: Vec<Diagnostic>,
    conditions: Vec<Condition>,
    loops: Vec<Opened>,
    blocks: Vec<Block>,
}

/// Verify a whole script.
pub fn verify(src: &str) -> Vec<Diagnostic> {
    let mut v = Verifier::default();
    for (i, raw) in src.split('\n').enumerate() {
        if let Line::Code(stmt) = parse_line(raw) {
            v.statement(i + 1, &stmt);
        }
    }
    v.finish()
}

impl Verifier {
    fn error(&mut self, message: impl Into<String>, start: usize, end: usize, line: usize) {
        let d = Diagnostic::new(message, start, end, line);
        tracing::trace!(%d, start, end, "verify");
        self.errors.push(d);
    }

    fn last_condition_line(&self) -> Option<usize> {
        self.conditions.last().map(|c| c.opened.line)
    }

    fn last_loop_line(&self) -> Option<usize> {
        self.loops.last().map(|l| l.line)
    }

    fn last_block_line(&self) -> Option<usize> {
        self.blocks.last().map(|b| b.opened.line)
    }

    /// Whether `top` was opened before some other construct that is still open.
    fn interrupted(top: usize, others: [Option<usize>; 2]) -> bool {
        others.into_iter().flatten().any(|line| top < line)
    }

    fn statement(&mut self, ln: usize, stmt: &Statement<'_>) {
        let semi = stmt.semi;
        if stmt.has_multiple() {
            self.error("Multiple statements in one line", semi + 1, stmt.last_semi, ln);
        }
        let Some(first) = stmt.tokens.first() else {
            self.error("Not enough tokens", semi, semi, ln);
            return;
        };
        let Some(keyword) = stmt.keyword() else {
            self.error(format!("Invalid keyword \"{}\"", first.text), first.start, first.end, ln);
            return;
        };
        match keyword {
            Keyword::Var => self.assignment(ln, stmt),
            Keyword::If => self.open_condition(ln, stmt),
            Keyword::Elif | Keyword::Else => self.branch(ln, stmt, keyword),
            Keyword::Endif => self.close_condition(ln, stmt),
            Keyword::While => self.open_loop(ln, stmt),
            Keyword::Endwhile => self.close_loop(ln, stmt),
            Keyword::Start => self.open_block(ln, stmt),
            Keyword::End => self.close_block(ln, stmt),
            Keyword::Time => self.timer(ln, stmt),
        }
    }

    /// Check the expression starting at token `n`.
    fn expression(&mut self, ln: usize, stmt: &Statement<'_>, n: usize) {
        let tokens = stmt.tokens.get(n..).unwrap_or(&[]);
        let errors = verify_tokens(&self.env, tokens);
        if !errors.is_empty() {
            for e in errors {
                let tok = &tokens[e.index];
                self.error(e.message, tok.start, tok.end, ln);
            }
        } else if !verify_expr(tokens) {
            let start = tokens.first().map_or(stmt.semi, |t| t.start);
            self.error("Invalid expression", start, stmt.semi, ln);
        }
    }

    fn too_many(&mut self, ln: usize, stmt: &Statement<'_>, allowed: usize) {
        if let Some(extra) = stmt.tokens.get(allowed) {
            self.error("Too many tokens", extra.start, stmt.semi, ln);
        }
    }

    // ── VAR ───────────────────────────────────────────────────────────────────

    fn assignment(&mut self, ln: usize, stmt: &Statement<'_>) {
        let t = &stmt.tokens;
        let (kw_start, semi) = (t[0].start, stmt.semi);
        if t.len() < 3 {
            self.error("Not enough tokens", kw_start, semi, ln);
            return;
        }
        let mut i = 2;
        while t.get(i).is_some_and(|tok| tok.is("[")) {
            let Some(index) = t.get(i + 1) else {
                self.error("Invalid assignment", kw_start, semi, ln);
                return;
            };
            if !is_integer(&index.text) && !self.env.is_defined(&index.text) {
                let message = if is_numeric(&index.text) {
                    format!("Invalid integer \"{}\"", index.text)
                } else {
                    format!("Unresolved token \"{}\"", index.text)
                };
                self.error(message, index.start, index.end, ln);
            }
            if !t.get(i + 2).is_some_and(|tok| tok.is("]")) {
                self.error("Invalid assignment", kw_start, semi, ln);
                return;
            }
            i += 3;
        }
        let name: &Token = &t[1];
        if !t.get(i).is_some_and(|tok| tok.is("=")) {
            self.error("Invalid assignment", kw_start, semi, ln);
        } else if !is_identifier(&name.text) {
            self.error("Invalid name for variable", name.start, name.end, ln);
        } else if registry::function(&name.text).is_some()
            || registry::is_constant(&name.text)
            || registry::is_reserved(&name.text)
        {
            self.error("Restricted variable name", name.start, name.end, ln);
        } else if i > 2 && !self.env.is_defined(&name.text) {
            // the start offset comes from the token at the line number's index
            let start = t.get(ln).map_or(name.start, |tok| tok.start);
            self.error(format!("Unresolved token \"{}\"", name.text), start, name.end, ln);
        } else {
            self.expression(ln, stmt, i + 1);
            self.env.define(name.text.clone());
        }
    }

    // ── IF / ELIF / ELSE / ENDIF ──────────────────────────────────────────────

    fn open_condition(&mut self, ln: usize, stmt: &Statement<'_>) {
        let opened = Opened { line: ln, start: stmt.tokens[0].start, end: stmt.semi };
        self.conditions.push(Condition { opened, seen_else: false });
        if stmt.tokens.len() < 2 {
            self.error("Not enough tokens", opened.start, stmt.semi, ln);
        } else {
            self.expression(ln, stmt, 1);
        }
    }

    /// Shared ELIF/ELSE/ENDIF checks; `false` when an error was reported.
    fn condition_closable(&mut self, ln: usize, stmt: &Statement<'_>) -> bool {
        let kw_start = stmt.tokens[0].start;
        match self.last_condition_line() {
            None => {
                self.error("No condition detected before", kw_start, stmt.semi, ln);
                false
            }
            Some(top) if Self::interrupted(top, [self.last_loop_line(), self.last_block_line()]) => {
                self.error("Cannot end condition branch here", kw_start, stmt.semi, ln);
                false
            }
            Some(_) => true,
        }
    }

    fn branch(&mut self, ln: usize, stmt: &Statement<'_>, keyword: Keyword) {
        if !self.condition_closable(ln, stmt) {
            return;
        }
        let kw_start = stmt.tokens[0].start;
        let Some(top) = self.conditions.last_mut() else {
            return;
        };
        if keyword == Keyword::Else {
            top.seen_else = true;
        } else if top.seen_else {
            self.error("Invalid condition branch", kw_start, stmt.semi, ln);
        } else if stmt.tokens.len() < 2 {
            self.error("Not enough tokens", kw_start, stmt.semi, ln);
        } else {
            self.expression(ln, stmt, 1);
        }
    }

    fn close_condition(&mut self, ln: usize, stmt: &Statement<'_>) {
        self.condition_closable(ln, stmt);
        self.too_many(ln, stmt, 1);
        self.conditions.pop();
    }

    // ── WHILE / ENDWHILE ──────────────────────────────────────────────────────

    fn open_loop(&mut self, ln: usize, stmt: &Statement<'_>) {
        let opened = Opened { line: ln, start: stmt.tokens[0].start, end: stmt.semi };
        self.loops.push(opened);
        if stmt.tokens.len() < 2 {
            self.error("Not enough tokens", opened.start, stmt.semi, ln);
        } else {
            self.expression(ln, stmt, 1);
        }
    }

    fn close_loop(&mut self, ln: usize, stmt: &Statement<'_>) {
        let kw_start = stmt.tokens[0].start;
        match self.last_loop_line() {
            None => self.error("No loop detected before", kw_start, stmt.semi, ln),
            Some(top) if Self::interrupted(top, [self.last_condition_line(), self.last_block_line()]) => {
                self.error("Cannot end loop here", kw_start, stmt.semi, ln)
            }
            Some(_) => {}
        }
        self.too_many(ln, stmt, 1);
        self.loops.pop();
    }

    // ── START / END ───────────────────────────────────────────────────────────

    fn open_block(&mut self, ln: usize, stmt: &Statement<'_>) {
        let t = &stmt.tokens;
        if t.len() < 2 {
            self.error("Not enough tokens", t[0].start, stmt.semi, ln);
            return;
        }
        self.too_many(ln, stmt, 2);
        let opened = Opened { line: ln, start: t[0].start, end: t[1].end };
        self.blocks.push(Block { name: t[1].text.clone(), opened });
    }

    fn close_block(&mut self, ln: usize, stmt: &Statement<'_>) {
        let t = &stmt.tokens;
        let kw_start = t[0].start;
        if t.len() < 2 {
            self.error("Not enough tokens", kw_start, stmt.semi, ln);
            return;
        }
        self.too_many(ln, stmt, 2);
        match self.blocks.last() {
            None => self.error("No block detected before", kw_start, stmt.semi, ln),
            Some(b) if Self::interrupted(b.opened.line, [self.last_condition_line(), self.last_loop_line()]) => {
                self.error("Cannot end block here", kw_start, stmt.semi, ln)
            }
            Some(b) if b.name == t[1].text => {
                self.blocks.pop();
            }
            Some(_) => self.error("Invalid end of block", kw_start, t[1].end, ln),
        }
    }

    // ── TIME ──────────────────────────────────────────────────────────────────

    fn timer(&mut self, ln: usize, stmt: &Statement<'_>) {
        let t = &stmt.tokens;
        if t.len() < 2 {
            self.error("Not enough tokens", t[0].start, stmt.semi, ln);
            return;
        }
        self.too_many(ln, stmt, 2);
        if !is_numeric(&t[1].text) {
            self.error("Not a number", t[1].start, t[1].end, ln);
        }
    }

    fn finish(mut self) -> Vec<Diagnostic> {
        for b in std::mem::take(&mut self.blocks) {
            self.error("Block is not closed", b.opened.start, b.opened.end, b.opened.line);
        }
        for c in std::mem::take(&mut self.conditions) {
            self.error("Condition is not closed", c.opened.start, c.opened.end, c.opened.line);
        }
        for l in std::mem::take(&mut self.loops) {
            self.error("Loop is not closed", l.start, l.end, l.line);
        }
        self.errors
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
