//! Expression verifier, shunting-yard parser and stack evaluator.
//!
//! An expression goes through three stages:
//!
//! 1. [`verify_tokens`]: lexical and structural checks against the registry
//!    and the variables defined so far.  Never fails; returns every problem.
//! 2. [`shunting_yard`]: infix tokens → [`Postfix`] program.  Indexing
//!    `a[i]` becomes a call to the 2-argument `get` function.
//! 3. [`verify_expr`] (stack depth only) or [`eval_expr`] (real values).
//!    Both run the same reduction loop, so an expression that verifies can
//!    never underflow when evaluated.

use std::fmt;

use thiserror::Error;

use super::env::{ExecEnv, Scope};
use super::registry::{self, CallContext, Function, Operator};
use super::token::{join, Token, TokenKind};
use super::value::is_numeric;

// ── Token verification ────────────────────────────────────────────────────────

/// A problem found by [`verify_tokens`], attached to a token index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenError {
    pub message: String,
    pub index: usize,
}

impl TokenError {
    fn new(message: impl Into<String>, index: usize) -> Self {
        TokenError { message: message.into(), index }
    }
}

fn is_call_target(tok: &Token) -> bool {
    tok.kind == TokenKind::Ident || tok.is(")") || tok.is("]")
}

/// Check an expression's tokens; returns every error found.
pub fn verify_tokens(scope: &dyn Scope, tokens: &[Token]) -> Vec<TokenError> {
    tracing::trace!(tokens = %join(tokens), "verify_tokens");
    let mut errors = Vec::new();
    // open calls: (function token index, arguments counted so far)
    let mut calls: Vec<(usize, usize)> = Vec::new();
    let mut parens: Vec<usize> = Vec::new();
    let mut brackets: Vec<usize> = Vec::new();

    for (i, tok) in tokens.iter().enumerate() {
        if tok.kind == TokenKind::Invalid {
            errors.push(TokenError::new(format!("Invalid token \"{}\"", tok.text), i));
            continue;
        }
        if registry::operator(&tok.text).is_some() {
            continue;
        }
        if registry::function(&tok.text).is_some() {
            if tokens.get(i + 1).is_some_and(|t| t.is("(")) {
                calls.push((i, 0));
            } else {
                errors.push(TokenError::new("Uncalled function", i));
            }
            continue;
        }
        match tok.text.as_str() {
            "(" => parens.push(i),
            ")" => {
                if let Some(&(fi, nargs)) = calls.last() {
                    if parens.last() == Some(&(fi + 1)) {
                        let nargs = if i - fi > 2 { nargs + 1 } else { nargs };
                        let arity = registry::function(&tokens[fi].text).map_or(0, |f| f.arity);
                        if nargs != arity {
                            errors.push(TokenError::new("Invalid number of arguments", fi));
                        }
                        calls.pop();
                    }
                }
                if parens.pop().is_none() {
                    errors.push(TokenError::new("Invalid parenthesis", i));
                }
            }
            "," => {
                let shadowed = match (brackets.last(), parens.last()) {
                    (Some(b), Some(p)) => b > p,
                    _ => false,
                };
                match calls.last_mut() {
                    Some((_, nargs)) if !shadowed => *nargs += 1,
                    _ => errors.push(TokenError::new("Argument separator outside of function", i)),
                }
            }
            "[" => {
                if i == 0 || !is_call_target(&tokens[i - 1]) {
                    errors.push(TokenError::new("Invalid bracket", i));
                }
                brackets.push(i);
            }
            "]" => match brackets.pop() {
                Some(left) if i - left < 2 => errors.push(TokenError::new("Empty brackets", i)),
                Some(_) => {}
                None => errors.push(TokenError::new("Invalid bracket", i)),
            },
            text => {
                if !is_numeric(text) && !registry::is_constant(text) && !scope.is_defined(text) {
                    errors.push(TokenError::new(format!("Unresolved token \"{text}\""), i));
                }
            }
        }
    }

    errors.extend(parens.into_iter().map(|i| TokenError::new("Unclosed parenthesis", i)));
    errors.extend(brackets.into_iter().map(|i| TokenError::new("Unclosed bracket", i)));
    errors
}

// ── Shunting-yard ─────────────────────────────────────────────────────────────

/// One step of a postfix program.
#[derive(Debug, Clone)]
pub enum Postfix {
    /// Literal, constant or variable name.
    Operand(String),
    /// Pop `arity` values, push the result.
    Call(&'static Function),
}

impl fmt::Display for Postfix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Postfix::Operand(text) => f.write_str(text),
            Postfix::Call(func) => f.write_str(&func.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no `(` matches `{0}`")]
    Unmatched(&'static str),
    #[error("no `[` matches `]`")]
    UnmatchedBracket,
    #[error("unclosed `{0}`")]
    Unclosed(&'static str),
    #[error("no built-in implements `{0}`")]
    Unsupported(String),
}

enum Pending {
    Paren,
    Bracket,
    Op(&'static Operator, &'static Function),
    Func(&'static Function),
}

impl Pending {
    fn into_postfix(self) -> Result<Postfix, ParseError> {
        match self {
            Pending::Op(_, f) | Pending::Func(f) => Ok(Postfix::Call(f)),
            Pending::Paren => Err(ParseError::Unclosed("(")),
            Pending::Bracket => Err(ParseError::Unclosed("[")),
        }
    }
}

/// Pop onto `out` until `stop` is on top; `false` if the stack runs out.
fn unwind(
    stack: &mut Vec<Pending>,
    out: &mut Vec<Postfix>,
    stop: fn(&Pending) -> bool,
) -> Result<bool, ParseError> {
    while let Some(top) = stack.last() {
        if stop(top) {
            return Ok(true);
        }
        if let Some(p) = stack.pop() {
            out.push(p.into_postfix()?);
        }
    }
    Ok(false)
}

fn is_paren(p: &Pending) -> bool {
    matches!(p, Pending::Paren)
}

fn is_bracket(p: &Pending) -> bool {
    matches!(p, Pending::Bracket)
}

/// Convert infix tokens to a postfix program.
///
/// Empty input gives an empty program; structural failures give `Err`.
pub fn shunting_yard(tokens: &[Token]) -> Result<Vec<Postfix>, ParseError> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Pending> = Vec::new();

    for tok in tokens {
        let text = tok.text.as_str();
        if text == "," {
            if !unwind(&mut stack, &mut out, is_paren)? {
                return Err(ParseError::Unmatched(","));
            }
        } else if let Some(op) = registry::operator(text) {
            let func = registry::resolve(text).ok_or_else(|| ParseError::Unsupported(text.to_owned()))?;
            if !op.is_prefix() {
                while let Some(top) = stack.last() {
                    let pops = match top {
                        Pending::Op(t, _) => {
                            t.precedence > op.precedence
                                || (!t.right_assoc && t.precedence == op.precedence)
                        }
                        Pending::Func(_) => true,
                        _ => false,
                    };
                    if !pops {
                        break;
                    }
                    if let Some(p) = stack.pop() {
                        out.push(p.into_postfix()?);
                    }
                }
            }
            stack.push(Pending::Op(op, func));
        } else if text == "(" {
            stack.push(Pending::Paren);
        } else if text == "[" {
            stack.push(Pending::Bracket);
        } else if let Some(func) = registry::function(text) {
            stack.push(Pending::Func(func));
        } else if text == ")" {
            if !unwind(&mut stack, &mut out, is_paren)? {
                return Err(ParseError::Unmatched(")"));
            }
            stack.pop();
            if let Some(&Pending::Func(f)) = stack.last() {
                out.push(Postfix::Call(f));
                stack.pop();
            }
        } else if text == "]" {
            if !unwind(&mut stack, &mut out, is_bracket)? {
                return Err(ParseError::UnmatchedBracket);
            }
            stack.pop();
            let get = registry::function("get")
                .ok_or_else(|| ParseError::Unsupported(text.to_owned()))?;
            out.push(Postfix::Call(get));
        } else {
            out.push(Postfix::Operand(text.to_owned()));
        }
    }
    while let Some(p) = stack.pop() {
        out.push(p.into_postfix()?);
    }
    tracing::trace!(
        postfix = %out.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "),
        "shunting_yard"
    );
    Ok(out)
}

// ── Evaluation ────────────────────────────────────────────────────────────────

/// Run a postfix program over any stack item type.  `None` on underflow.
fn reduce<S>(
    program: &[Postfix],
    mut operand: impl FnMut(&str) -> S,
    mut apply: impl FnMut(&'static Function, Vec<S>) -> S,
) -> Option<Vec<S>> {
    let mut stack = Vec::new();
    for step in program {
        match step {
            Postfix::Operand(text) => stack.push(operand(text)),
            &Postfix::Call(f) => {
                if stack.len() < f.arity {
                    return None;
                }
                let args = stack.split_off(stack.len() - f.arity);
                stack.push(apply(f, args));
            }
        }
    }
    Some(stack)
}

/// Dry run: does the expression reduce to exactly one value?
pub fn verify_expr(tokens: &[Token]) -> bool {
    let Ok(program) = shunting_yard(tokens) else {
        return false;
    };
    reduce(&program, |_| (), |_, _| ()).is_some_and(|stack| stack.len() == 1)
}

fn operand_value(env: &ExecEnv, text: &str) -> String {
    if is_numeric(text) || registry::is_constant(text) {
        text.to_owned()
    } else {
        env.get(text).unwrap_or("0").to_owned()
    }
}

/// Evaluate an expression.  Meant for verified input; anything that does
/// not reduce cleanly evaluates to `0`.
pub fn eval_expr(ctx: &mut dyn CallContext, env: &ExecEnv, tokens: &[Token]) -> String {
    let program = match shunting_yard(tokens) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(tokens = %join(tokens), error = %e, "unparsable expression");
            return "0".to_owned();
        }
    };
    let stack = reduce(
        &program,
        |text| operand_value(env, text),
        |f, args| f.call(ctx, &args),
    );
    match stack.and_then(|s| s.into_iter().next()) {
        Some(v) => v,
        None => {
            tracing::debug!(tokens = %join(tokens), "expression stack underflow");
            "0".to_owned()
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::env::VerifyEnv;
    use crate::script::registry::tests::TestCtx;
    use crate::script::token::tokenize;

    fn errors(src: &str) -> Vec<(String, usize)> {
        let mut env = VerifyEnv::new();
        env.define("ABC_01");
        env.define("ABC_02");
        verify_tokens(&env, &tokenize(src))
            .into_iter()
            .map(|e| (e.message, e.index))
            .collect()
    }

    fn err(msg: &str, i: usize) -> Vec<(String, usize)> {
        vec![(msg.to_owned(), i)]
    }

    fn postfix(src: &str) -> Option<Vec<String>> {
        shunting_yard(&tokenize(src))
            .ok()
            .map(|p| p.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn valid_expressions() {
        for src in [
            "ABC_01 == 1 && ABC_02 + 5 >= -2.2 || 5.5 > RAND(1.1,-1.2) && !(ABC_01 != -ABC_02)",
            "3 + 4 .* 2 / ( 1 - 5 ) ^ 200 ^ 3",
            "sin ( max ( 2, 3 / 3 * pi ))",
            "RAND((1.1/3),5)",
            "1 + 100 + 0.1 + 100.1 + -1 + -0.5 + -100 + 1e05 + 1e-5 + -51.56e+056",
        ] {
            assert_eq!(errors(src), vec![], "{src}");
        }
    }

    #[test]
    fn lexical_errors() {
        assert_eq!(errors("sin ( max ( 2, 3 / 3 ) * 3.1415 | 4 )"), err("Invalid token \"|\"", 12));
        assert_eq!(errors("sin ( max ( 2, 3 / 3 ) * _0pi)"), err("Invalid token \"_0pi\"", 11));
    }

    #[test]
    fn structural_errors() {
        assert_eq!(errors("sin ( max ( 2, 3 / 3 ) * 3.1415 ))"), err("Invalid parenthesis", 13));
        assert_eq!(errors("( sin ( max ( 2, 3 / 3 ) * 3.1415 )"), err("Unclosed parenthesis", 0));
        assert_eq!(errors("sin ( max ( 2, 3 / 3 ) * 3.1415 )]"), err("Invalid bracket", 13));
        assert_eq!(errors("[0] sin ( max ( 2, 3 / 3 ) * 3.1415 )"), err("Invalid bracket", 0));
        assert_eq!(errors("sin ( [0] max ( 2, 3 / 3 ) * 3.1415 )"), err("Invalid bracket", 2));
        assert_eq!(errors("sin ( max ( 2, 3 / 3 )[ * 3.1415 )"), err("Unclosed bracket", 10));
        assert_eq!(errors("sin ( max ( 2, 3 / 3 )[] * 3.1415 )"), err("Empty brackets", 11));
    }

    #[test]
    fn call_errors() {
        assert_eq!(errors("sin max ( 2, 3 / 3 ) * 3.1415"), err("Uncalled function", 0));
        assert_eq!(
            errors("sin ( max ( 2, 3 / 3 ) * 3.1415 ) * 5 , 5"),
            err("Argument separator outside of function", 15)
        );
        assert_eq!(
            errors("sin ( cos ( PI[2, 3 / 3] ) * 3.1415 )"),
            err("Argument separator outside of function", 7)
        );
        assert_eq!(
            errors("ABC_02 == 1 && ABC_02 == 2.2 || 5.5 == RAND(1.1)"),
            err("Invalid number of arguments", 10)
        );
    }

    #[test]
    fn unresolved_names() {
        assert_eq!(
            errors("ABC_03 == 1 && ABC_02 == 2.2 || 5.5 == RAND(1.1, 2)"),
            err("Unresolved token \"ABC_03\"", 0)
        );
    }

    #[test]
    fn errors_accumulate() {
        let found = errors("( x | [");
        assert_eq!(found.len(), 5, "{found:?}");
    }

    #[test]
    fn postfix_order() {
        assert_eq!(
            postfix("3 + 4 * 2 / ( 1 - 5 ) ^ 2 ^ 3").unwrap(),
            ["3", "4", "2", "times", "1", "5", "minus", "2", "3", "pow", "pow", "div", "plus"]
        );
        assert_eq!(
            postfix("sin ( -max ( 2, 3 ) / 3 * -3.1415 )").unwrap(),
            ["2", "3", "max", "neg", "3", "div", "-3.1415", "times", "sin"]
        );
        assert_eq!(
            postfix("ABC_01 == 1 && ABC_02 == 2.2 || 5.5 == RAND(1.1)").unwrap(),
            ["ABC_01", "1", "eq", "ABC_02", "2.2", "eq", "and", "5.5", "1.1", "rand", "eq", "or"]
        );
        assert_eq!(
            postfix("RAND(10,20)/-RAND(1000,2000)").unwrap(),
            ["10", "20", "rand", "1000", "2000", "rand", "neg", "div"]
        );
        assert_eq!(
            postfix("IDN(3)[1] * (~RANDMAT(3,3,4,5))[2+3]").unwrap(),
            ["3", "idn", "1", "get", "3", "3", "4", "5", "randmat", "tran", "2", "3", "plus", "get", "times"]
        );
    }

    #[test]
    fn stacked_prefix_operators() {
        assert_eq!(postfix("!!a").unwrap(), ["a", "not", "not"]);
        assert_eq!(postfix("!-a").unwrap(), ["a", "neg", "not"]);
        assert_eq!(postfix("~a^2").unwrap(), ["a", "tran", "2", "pow"]);
    }

    #[test]
    fn postfix_failures() {
        assert!(postfix("sin ( max ( 2, 3 / 3 * 3.1415 )").is_none());
        assert!(postfix("sin ( max ( 2, 3 / 3 ) * 3.1415 ))").is_none());
        assert!(postfix("1 ]").is_none());
        assert_eq!(postfix("").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn dry_run() {
        assert!(verify_expr(&tokenize("3 + 4 * 2 / ( 1 - 5 ) ^ 2 ^ 3")));
        assert!(verify_expr(&tokenize("sin ( max ( 2, 3 ) / 3 * 3.1415 )")));
        assert!(verify_expr(&tokenize("sin ( max ( 2, 3 / 3 * pi ))")));
        assert!(!verify_expr(&tokenize("sin ( max ( 2, 3 / 3 ) * 3.1415 ))")));
        assert!(!verify_expr(&tokenize("sin ( max ( 2, 3 / 3 * pi )) 1")));
        assert!(!verify_expr(&tokenize("ABC_01 == 1 && ABC_02 == 2.2 || 5.5 == RAND(1.1)")));
        assert!(!verify_expr(&tokenize("")));
    }

    fn eval(src: &str) -> String {
        let env: ExecEnv =
            [("ABC_02", "-1"), ("ABC_03", "[[1,2,3],[4,5,6],[7,8,9]]")].into_iter().collect();
        eval_expr(&mut TestCtx::new(), &env, &tokenize(src))
    }

    #[test]
    fn live_run() {
        assert_eq!(eval("3 + 4 * 2 / ( 1 - 5 ) ^ 2 ^ 3 * -ABC_02"), "24577/8192");
        assert_eq!(eval("ABC_02 > 0 || !(ABC_02 != 0 && -ABC_02 < -2)"), "true");
        assert_eq!(eval("!ABC_02"), "false");
        assert_eq!(eval("IDN(3)[0] * VEC3(3,2,1)"), "3");
        assert_eq!(eval("ABC_03 .* IDN(3)"), "[[1,0,0],[0,5,0],[0,0,9]]");
        assert_eq!(eval("ABC_03[1][2]"), "6");
    }

    #[test]
    fn live_run_is_total() {
        assert_eq!(eval("undefined_name"), "0");
        assert_eq!(eval("+"), "0");
        assert_eq!(eval("(1"), "0");
        assert_eq!(eval(""), "0");
        assert_eq!(eval("pi"), "pi");
    }
}
