//! Script executor.
//!
//! Runs a verified script line by line with a cursor.  Conditions jump
//! through the precomputed [`CondTree`]; loops jump back to their `WHILE`
//! line so the guard is re-evaluated.  Output text and timers are collected
//! per block path.
//!
//! Every visited line counts toward [`Settings::line_limit`]; reaching it
//! stops the whole run and leaves a notice in the current block.

use super::array::set_var;
use super::cond::{condition_tree, CondTree};
use super::env::ExecEnv;
use super::expand::output_line;
use super::expr::eval_expr;
use super::output::{EvalOutput, Seconds};
use super::registry::CallContext;
use super::stmt::{line_keyword, parse_line, Keyword, Line, Statement};
use super::token::Token;
use super::value::{check_value, parse_float_prefix};
use super::Settings;

/// Where the cursor goes after a statement.
enum Flow {
    Next,
    /// Continue at this line.
    Goto(usize),
}

struct Executor<'a> {
    ctx: &'a mut dyn CallContext,
    settings: Settings,
    lines: Vec<&'a str>,
    tree: CondTree,
    env: ExecEnv,
    /// `IF` lines of the conditions being executed.
    conditions: Vec<usize>,
    /// `WHILE` lines of the loops being executed.
    loops: Vec<usize>,
    block: String,
    out: EvalOutput,
}

/// Execute `src`.  The script is expected to have passed verification.
pub fn execute(ctx: &mut dyn CallContext, settings: Settings, src: &str) -> EvalOutput {
    let lines: Vec<&str> = src.split('\n').collect();
    let tree = condition_tree(&lines);
    Executor {
        ctx,
        settings,
        lines,
        tree,
        env: ExecEnv::new(),
        conditions: Vec::new(),
        loops: Vec::new(),
        block: String::new(),
        out: EvalOutput::default(),
    }
    .run()
}

impl Executor<'_> {
    fn run(mut self) -> EvalOutput {
        let limit = self.settings.line_limit;
        let mut cursor = 0;
        let mut computed = 0;
        while cursor < self.lines.len() && computed < limit {
            let raw = self.lines[cursor];
            tracing::debug!(line = cursor, text = raw.trim(), "eval");
            let flow = match parse_line(raw) {
                Line::Blank => Flow::Next,
                Line::Text(text) => {
                    let rendered = output_line(self.ctx, &self.env, text, self.settings.presentation);
                    if !rendered.is_empty() {
                        self.out.content.push_line(&self.block, &rendered);
                    }
                    Flow::Next
                }
                Line::Code(stmt) => self.statement(cursor, &stmt),
            };
            cursor = match flow {
                Flow::Next => cursor + 1,
                Flow::Goto(line) => line,
            };
            computed += 1;
        }
        if computed >= limit {
            tracing::warn!(limit, block = %self.block, "line limit reached");
            let notice = format!("Max computed lines reached ({limit})");
            self.out.content.push_line(&self.block, &notice);
        }
        self.out
    }

    fn eval(&mut self, tokens: &[Token]) -> String {
        eval_expr(self.ctx, &self.env, tokens)
    }

    fn statement(&mut self, cursor: usize, stmt: &Statement<'_>) -> Flow {
        let Some(keyword) = stmt.keyword() else {
            return Flow::Next;
        };
        match keyword {
            Keyword::Var => {
                self.assign(stmt);
                Flow::Next
            }
            Keyword::If => self.enter_condition(cursor),
            // falling onto a branch line means the previous branch is done
            Keyword::Elif | Keyword::Else => match self.condition_end() {
                Some(end) => Flow::Goto(end),
                None => Flow::Next,
            },
            Keyword::Endif => {
                self.conditions.pop();
                Flow::Next
            }
            Keyword::While => self.enter_loop(cursor, stmt),
            Keyword::Endwhile => match self.loops.pop() {
                Some(start) => Flow::Goto(start),
                None => Flow::Next,
            },
            Keyword::Start => {
                if let Some(name) = stmt.tokens.get(1) {
                    self.block.push('#');
                    self.block.push_str(&name.text);
                }
                Flow::Next
            }
            Keyword::End => {
                let cut = self.block.rfind('#').unwrap_or(0);
                self.block.truncate(cut);
                Flow::Next
            }
            Keyword::Time => {
                if let Some(secs) = stmt.tokens.get(1).and_then(|t| parse_float_prefix(&t.text)) {
                    self.out.timers.insert(self.block.clone(), Seconds(secs));
                }
                Flow::Next
            }
        }
    }

    fn assign(&mut self, stmt: &Statement<'_>) {
        let t = &stmt.tokens;
        let Some(name) = t.get(1) else {
            return;
        };
        let mut i = 2;
        let mut path = Vec::new();
        while t.get(i).is_some_and(|tok| tok.is("[")) {
            if let Some(index) = t.get(i + 1) {
                let resolved = self.env.get(&index.text).unwrap_or(index.text.as_str());
                path.push(resolved.to_owned());
            }
            i += 3;
        }
        let value = self.eval(t.get(i + 1..).unwrap_or(&[]));
        let new = set_var(self.env.get(&name.text), &path, value);
        tracing::debug!(name = %name.text, value = %new, "assign");
        self.env.set(name.text.clone(), new);
    }

    fn condition_end(&self) -> Option<usize> {
        let key = self.conditions.last()?;
        self.tree.get(key)?.end
    }

    fn enter_condition(&mut self, cursor: usize) -> Flow {
        let Some(record) = self.tree.get(&cursor) else {
            return Flow::Next;
        };
        let (branches, end) = (record.branches.clone(), record.end);
        for line in branches {
            let Line::Code(branch) = parse_line(self.lines[line]) else {
                continue;
            };
            let taken = branch.keyword() == Some(Keyword::Else) || {
                let guard = self.eval(branch.args());
                check_value(&guard)
            };
            if taken {
                tracing::debug!(condition = cursor, branch = line, "branch taken");
                self.conditions.push(cursor);
                return Flow::Goto(line + 1);
            }
        }
        // no branch taken: resume after the ENDIF
        Flow::Goto(end.map_or(self.lines.len(), |e| e + 1))
    }

    fn enter_loop(&mut self, cursor: usize, stmt: &Statement<'_>) -> Flow {
        if check_value(&self.eval(stmt.args())) {
            self.loops.push(cursor);
            return Flow::Next;
        }
        let mut depth = 0usize;
        for (c, line) in self.lines.iter().enumerate().skip(cursor + 1) {
            match line_keyword(line) {
                Some(Keyword::While) => depth += 1,
                Some(Keyword::Endwhile) if depth == 0 => return Flow::Goto(c + 1),
                Some(Keyword::Endwhile) => depth -= 1,
                _ => {}
            }
        }
        Flow::Next
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
