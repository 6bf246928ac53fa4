//! Expression tokenizer.
//!
//! Splits a line (or the body of a statement) into tokens carrying their
//! `[start, end)` byte span in the source.  Scanning is done in two passes:
//!
//! 1. A cursor-driven lexer emits raw tokens: whitespace ends a token, every
//!    separator character (`+-*/%^,()=&|><![]~`) is a token of its own, `.*`
//!    is kept together, and everything else is accumulated into word runs.
//!    A numeral ending in a bare exponent marker (`12e`) swallows the sign
//!    and digits that follow (`12e-5`).
//! 2. A right-to-left merge pass folds adjacent raw tokens: `&&` `||` `==`,
//!    `<=` `>=` `!=`, `e^`, `.*`, and a `+`/`-` sign into the numeral that
//!    follows it when the sign is in operand position.  A `-` in operand
//!    position that does not attach to a numeral becomes the unary-minus
//!    token `.-`.
//!
//! "Operand position" means: at the very start, after an operator character,
//! after `(`, `,` or `!`, and (for statements) right after the keyword.

use std::fmt;

/// Text of the unary-minus token.
pub const UNARY_MINUS: &str = ".-";

const SEPARATORS: &[u8] = b"+-*/%^,()=&|><![]~";

/// Raw single-character tokens after which an operand is expected.
const OPERAND_PREFIX: &[u8] = b"+-*/%^=&|><(,!";

// ── Token ─────────────────────────────────────────────────────────────────────

/// Lexical class of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `[a-zA-Z][a-zA-Z0-9_]*`
    Ident,
    /// Decimal numeral with optional leading `-`, fraction and exponent.
    Number,
    /// Operator symbol or punctuation (`(`, `)`, `,`, `[`, `]`).
    Symbol,
    /// Anything that fits none of the above (`_0pi`, `|`, `12ab`).
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub kind: TokenKind,
}

impl Token {
    fn raw(text: &str, start: usize) -> Self {
        Token {
            text: text.to_owned(),
            start,
            end: start + text.len(),
            kind: TokenKind::Invalid,
        }
    }

    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Join token texts with single spaces (debug output).
pub fn join(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ")
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Tokenize an expression.
pub fn tokenize(src: &str) -> Vec<Token> {
    tokenize_with(src, false)
}

/// Tokenize a statement body (`IF -x > 2`): the leading keyword opens an
/// operand position just like an operator would.
pub fn tokenize_statement(src: &str) -> Vec<Token> {
    tokenize_with(src, true)
}

fn tokenize_with(src: &str, statement: bool) -> Vec<Token> {
    let mut raw = Lexer::new(src).run();
    merge(&mut raw, statement);
    for tok in &mut raw {
        tok.kind = classify(&tok.text);
    }
    raw
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    out: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            text: src,
            pos: 0,
            out: Vec::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn at_word_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) if c.is_ascii_whitespace() || SEPARATORS.contains(&c) => true,
            Some(b'.') => self.peek2() == Some(b'*'),
            Some(_) => false,
        }
    }

    fn run(mut self) -> Vec<Token> {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += 1;
            } else if c == b'.' && self.peek2() == Some(b'*') {
                // kept as two raw tokens so the merge pass treats `.*` like
                // any other pair
                self.push(self.pos, self.pos + 1);
                self.push(self.pos + 1, self.pos + 2);
                self.pos += 2;
            } else if SEPARATORS.contains(&c) {
                self.push(self.pos, self.pos + 1);
                self.pos += 1;
            } else {
                self.read_word();
            }
        }
        self.out
    }

    fn read_word(&mut self) {
        let start = self.pos;
        while !self.at_word_end() {
            self.pos += 1;
        }
        // `12e` directly followed by a sign is scientific notation
        if is_bare_exponent(&self.text[start..self.pos])
            && matches!(self.peek(), Some(b'+' | b'-'))
        {
            self.pos += 1;
            while !self.at_word_end() {
                self.pos += 1;
            }
        }
        self.push(start, self.pos);
    }

    fn push(&mut self, start: usize, end: usize) {
        self.out.push(Token::raw(&self.text[start..end], start));
    }
}

/// `12e`, `1.5e`, `.5e`: a mantissa with at least one digit and a trailing `e`.
fn is_bare_exponent(word: &str) -> bool {
    let Some(mantissa) = word.strip_suffix('e') else {
        return false;
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    !mantissa.is_empty()
        && mantissa != "."
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

// ── Merge pass ────────────────────────────────────────────────────────────────

fn opens_operand(tok: Option<&Token>, index: usize, statement: bool) -> bool {
    match tok {
        None => true,
        Some(t) if t.text.len() == 1 && OPERAND_PREFIX.contains(&t.text.as_bytes()[0]) => true,
        Some(t) => statement && index == 0 && is_word(&t.text),
    }
}

fn is_word(s: &str) -> bool {
    s.bytes().next().is_some_and(|b| b.is_ascii_alphabetic())
}

fn should_merge(a: &Token, b: &Token, before: Option<&Token>, before_index: usize, statement: bool) -> bool {
    let single = a.text.len() == 1;
    (single && matches!(a.text.as_str(), "&" | "|" | "=") && a.text == b.text)
        || (single && b.is("=") && matches!(a.text.as_str(), "!" | "<" | ">"))
        || (a.is("e") && b.is("^"))
        || (a.is(".") && b.is("*"))
        || ((a.is("-") || a.is("+"))
            && is_unsigned_numeral(&b.text)
            && opens_operand(before, before_index, statement))
}

fn merge(tokens: &mut Vec<Token>, statement: bool) {
    let mut i = tokens.len();
    while i > 1 {
        i -= 1;
        let before = if i > 1 { Some(&tokens[i - 2]) } else { None };
        let merge_now = should_merge(&tokens[i - 1], &tokens[i], before, i.saturating_sub(2), statement);
        if merge_now {
            let b = tokens.remove(i);
            let a = &mut tokens[i - 1];
            a.text.push_str(&b.text);
            a.end = b.end;
        } else if tokens[i].is("-") && opens_operand(Some(&tokens[i - 1]), i - 1, statement) {
            tokens[i].text = UNARY_MINUS.to_owned();
        }
    }
    if let Some(first) = tokens.first_mut() {
        if first.is("-") && !statement {
            first.text = UNARY_MINUS.to_owned();
        }
    }
}

// ── Classification ────────────────────────────────────────────────────────────

const SYMBOLS: &[&str] = &[
    "(", ")", "+", "-", "*", "/", "^", ">", "<", ",", "%", "!", "[", "]", "~", "==", "<=", ">=",
    ".-", "!=", "&&", "e^", "||", ".*",
];

fn classify(text: &str) -> TokenKind {
    if SYMBOLS.contains(&text) {
        TokenKind::Symbol
    } else if is_identifier(text) {
        TokenKind::Ident
    } else if is_numeral(text) {
        TokenKind::Number
    } else {
        TokenKind::Invalid
    }
}

/// `[a-zA-Z][a-zA-Z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut bytes = s.bytes();
    bytes.next().is_some_and(|b| b.is_ascii_alphabetic())
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn is_numeral(s: &str) -> bool {
    is_unsigned_numeral(s.strip_prefix('-').unwrap_or(s))
}

/// `digits [. digits] [e [+-] digits]` with at least one mantissa digit.
fn is_unsigned_numeral(s: &str) -> bool {
    let (mantissa, exponent) = match s.find('e') {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mantissa_ok = int.len() + frac.len() > 0
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit());
    let exponent_ok = match exponent {
        None => true,
        Some(e) => {
            let digits = e.strip_prefix(['+', '-']).unwrap_or(e);
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        }
    };
    mantissa_ok && exponent_ok
}

// ── Tests ─────────────────────────────────────────────────────────────────────
