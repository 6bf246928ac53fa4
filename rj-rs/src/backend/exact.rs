//! In-process reference backend.
//!
//! Evaluates the subset of CAS syntax the engine produces, exactly: numbers
//! are `i128` rationals, `true`/`false` are booleans, and `[…]` nests into
//! vectors and matrices.  Anything symbolic (free variables, `pi`,
//! transcendental values other than the trivial ones) is answered with an
//! error so callers fall back the same way they would with a real CAS.
//!
//! Grammar (lowest → highest precedence):
//!   `||`  →  `&&`  →  relational  →  additive  →  multiplicative (`* / % .*`)
//!   →  unary (`- + !`)  →  power (`^`, right-assoc)  →  postfix `[i]`  →  primary

use std::cmp::Ordering;
use std::fmt;

use super::{error_text, Backend};

type Res<T> = Result<T, String>;

const OVERFLOW: &str = "integer overflow";

/// Exact rational/matrix backend; needs no external program.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactBackend;

impl ExactBackend {
    pub fn new() -> Self {
        ExactBackend
    }

    /// Evaluate `expr` to a value, keeping the error message.
    pub fn eval_str(&self, expr: &str) -> Res<String> {
        let ast = Parser::new(expr).parse()?;
        Ok(eval(&ast)?.to_string())
    }
}

impl Backend for ExactBackend {
    fn evaluate(&self, expr: &str) -> String {
        match self.eval_str(expr) {
            Ok(v) => v,
            Err(e) => {
                tracing::trace!(expr, error = %e, "exact backend error");
                error_text(e)
            }
        }
    }

    fn name(&self) -> &str {
        "exact"
    }
}

// ── Rational ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rational {
    num: i128,
    den: i128,
}

fn ck(v: Option<i128>) -> Res<i128> {
    v.ok_or_else(|| OVERFLOW.to_owned())
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn isqrt(n: i128) -> Option<i128> {
    if n < 0 {
        return None;
    }
    let mut r = (n as f64).sqrt() as i128;
    while r > 0 && r.checked_mul(r).map_or(true, |sq| sq > n) {
        r -= 1;
    }
    while (r + 1).checked_mul(r + 1).is_some_and(|sq| sq <= n) {
        r += 1;
    }
    (r * r == n).then_some(r)
}

impl Rational {
    const ZERO: Rational = Rational { num: 0, den: 1 };
    const ONE: Rational = Rational { num: 1, den: 1 };

    fn new(num: i128, den: i128) -> Res<Self> {
        if den == 0 {
            return Err("division by zero".into());
        }
        if num == i128::MIN || den == i128::MIN {
            return Err(OVERFLOW.into());
        }
        let g = gcd(num, den).max(1);
        let (mut num, mut den) = (num / g, den / g);
        if den < 0 {
            num = -num;
            den = -den;
        }
        Ok(Rational { num, den })
    }

    fn int(n: i128) -> Self {
        Rational { num: n, den: 1 }
    }

    fn is_zero(self) -> bool {
        self.num == 0
    }

    fn is_integer(self) -> bool {
        self.den == 1
    }

    fn add(self, o: Self) -> Res<Self> {
        let n = ck(ck(self.num.checked_mul(o.den))?.checked_add(ck(o.num.checked_mul(self.den))?))?;
        Rational::new(n, ck(self.den.checked_mul(o.den))?)
    }

    fn sub(self, o: Self) -> Res<Self> {
        self.add(o.neg()?)
    }

    fn mul(self, o: Self) -> Res<Self> {
        Rational::new(ck(self.num.checked_mul(o.num))?, ck(self.den.checked_mul(o.den))?)
    }

    fn div(self, o: Self) -> Res<Self> {
        if o.is_zero() {
            return Err("division by zero".into());
        }
        Rational::new(ck(self.num.checked_mul(o.den))?, ck(self.den.checked_mul(o.num))?)
    }

    fn neg(self) -> Res<Self> {
        Ok(Rational { num: ck(self.num.checked_neg())?, den: self.den })
    }

    fn abs(self) -> Res<Self> {
        Ok(Rational { num: ck(self.num.checked_abs())?, den: self.den })
    }

    fn floor(self) -> Self {
        Rational::int(self.num.div_euclid(self.den))
    }

    fn ceil(self) -> Res<Self> {
        let f = self.num.div_euclid(self.den);
        if ck(f.checked_mul(self.den))? == self.num {
            Ok(Rational::int(f))
        } else {
            Ok(Rational::int(ck(f.checked_add(1))?))
        }
    }

    fn trunc(self) -> Self {
        Rational::int(self.num / self.den)
    }

    /// Half away from zero.
    fn round(self) -> Res<Self> {
        let twice = ck(self.num.abs().checked_mul(2))?;
        let r = ck(twice.checked_add(self.den))? / ck(self.den.checked_mul(2))?;
        Ok(Rational::int(if self.num < 0 { -r } else { r }))
    }

    fn pow(self, exp: i128) -> Res<Self> {
        if exp < 0 {
            return Rational::ONE.div(self.pow(ck(exp.checked_neg())?)?);
        }
        let e = u32::try_from(exp).map_err(|_| OVERFLOW.to_owned())?;
        Rational::new(ck(self.num.checked_pow(e))?, ck(self.den.checked_pow(e))?)
    }

    fn sqrt(self) -> Res<Self> {
        match (isqrt(self.num), isqrt(self.den)) {
            (Some(n), Some(d)) => Rational::new(n, d),
            _ => Err("irrational square root".into()),
        }
    }

    fn as_int(self) -> Res<i128> {
        if self.is_integer() {
            Ok(self.num)
        } else {
            Err(format!("{self} is not an integer"))
        }
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        // dens are positive; fall back to floats only when the cross
        // products overflow
        match (self.num.checked_mul(other.den), other.num.checked_mul(self.den)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                let a = self.num as f64 / self.den as f64;
                let b = other.num as f64 / other.den as f64;
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

// ── Values ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Val {
    Num(Rational),
    Bool(bool),
    /// `[…]`; `matrix` marks results the CAS tags as matrices.
    List { items: Vec<Val>, matrix: bool },
    /// Output of `latex(…)`, printed quoted.
    Text(String),
}

type Matrix = Vec<Vec<Rational>>;

impl Val {
    fn list(items: Vec<Val>) -> Self {
        Val::List { items, matrix: false }
    }

    fn tagged(items: Vec<Val>) -> Self {
        Val::List { items, matrix: true }
    }

    fn num(&self) -> Res<Rational> {
        match self {
            Val::Num(r) => Ok(*r),
            Val::Bool(b) => Ok(Rational::int(i128::from(*b))),
            other => Err(format!("expected a number, got {other}")),
        }
    }

    fn truth(&self) -> Res<bool> {
        match self {
            Val::Bool(b) => Ok(*b),
            Val::Num(r) => Ok(!r.is_zero()),
            other => Err(format!("expected a boolean, got {other}")),
        }
    }

    fn items(&self) -> Option<&[Val]> {
        match self {
            Val::List { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Flat list of numbers.
    fn vector(&self) -> Option<Vec<Rational>> {
        self.items()?.iter().map(|v| v.num().ok()).collect()
    }

    /// Non-empty rectangular list of number rows.
    fn matrix(&self) -> Option<Matrix> {
        let rows: Matrix = self
            .items()?
            .iter()
            .map(|r| r.vector())
            .collect::<Option<_>>()?;
        let cols = rows.first()?.len();
        (cols > 0 && rows.iter().all(|r| r.len() == cols)).then_some(rows)
    }
}

fn from_matrix(m: Matrix) -> Val {
    Val::list(
        m.into_iter()
            .map(|row| Val::list(row.into_iter().map(Val::Num).collect()))
            .collect(),
    )
}

fn tag(v: Val) -> Val {
    match v {
        Val::List { items, .. } => Val::tagged(items),
        other => other,
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Num(r) => write!(f, "{r}"),
            Val::Bool(b) => write!(f, "{b}"),
            Val::List { items, matrix } => {
                if *matrix {
                    f.write_str("matrix")?;
                }
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Val::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(String),
    Ident(String),
    Op(&'static str),
    Unknown(char),
    Eof,
}

const OPS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", ".*", "+", "-", "*", "/", "%", "^", "!", "<", ">", "(",
    ")", "[", "]", ",",
];

fn lex(src: &str) -> Vec<Tok> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    'outer: while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                if bytes[i] == b'.' && bytes.get(i + 1) == Some(&b'*') {
                    break;
                }
                i += 1;
            }
            if matches!(bytes.get(i), Some(b'e' | b'E')) {
                let mut j = i + 1;
                if matches!(bytes.get(j), Some(b'+' | b'-')) {
                    j += 1;
                }
                if bytes.get(j).is_some_and(u8::is_ascii_digit) {
                    while bytes.get(j).is_some_and(u8::is_ascii_digit) {
                        j += 1;
                    }
                    i = j;
                }
            }
            out.push(Tok::Num(src[start..i].to_owned()));
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            out.push(Tok::Ident(src[start..i].to_owned()));
            continue;
        }
        for op in OPS {
            if src[i..].starts_with(op) {
                out.push(Tok::Op(op));
                i += op.len();
                continue 'outer;
            }
        }
        let ch = src[i..].chars().next().unwrap_or('?');
        out.push(Tok::Unknown(ch));
        i += ch.len_utf8();
    }
    out.push(Tok::Eof);
    out
}

// ── AST & parser ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Num(Rational),
    Sym(String),
    List(Vec<Expr>, bool),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Nesting bound for parentheses, brackets and prefix operators.
const MAX_DEPTH: usize = 256;

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(src: &str) -> Self {
        Parser { toks: lex(src), pos: 0, depth: 0 }
    }

    fn peek(&self) -> &Tok {
        self.toks.get(self.pos).unwrap_or(&Tok::Eof)
    }

    fn advance(&mut self) -> Tok {
        let t = self.peek().clone();
        self.pos += 1;
        t
    }

    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Tok::Op(o) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Res<()> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(format!("expected `{op}`, found {:?}", self.peek()))
        }
    }

    fn peek_op(&self, choices: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Tok::Op(o) => choices.iter().copied().find(|c| c == o),
            _ => None,
        }
    }

    fn parse(mut self) -> Res<Expr> {
        let e = self.parse_binary(0)?;
        match self.peek() {
            Tok::Eof => Ok(e),
            t => Err(format!("unexpected {t:?}")),
        }
    }

    fn parse_binary(&mut self, level: usize) -> Res<Expr> {
        const LEVELS: &[&[&str]] = &[
            &["||"],
            &["&&"],
            &["==", "!=", "<=", ">=", "<", ">"],
            &["+", "-"],
            &["*", "/", "%", ".*"],
        ];
        if level == LEVELS.len() {
            return self.parse_unary();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        let outer = self.depth;
        while let Some(op) = self.peek_op(LEVELS[level]) {
            // Each operator in a chain nests the tree one level deeper.
            if self.depth == MAX_DEPTH {
                self.depth = outer;
                return Err("expression too deep".to_owned());
            }
            self.depth += 1;
            self.pos += 1;
            let rhs = match self.parse_binary(level + 1) {
                Ok(rhs) => rhs,
                Err(e) => {
                    self.depth = outer;
                    return Err(e);
                }
            };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = outer;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Res<Expr> {
        if self.depth == MAX_DEPTH {
            return Err("expression too deep".to_owned());
        }
        self.depth += 1;
        let e = self.parse_prefixed();
        self.depth -= 1;
        e
    }

    fn parse_prefixed(&mut self) -> Res<Expr> {
        if let Some(op) = self.peek_op(&["-", "+", "!"]) {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Res<Expr> {
        let base = self.parse_postfix()?;
        if self.eat("^") {
            let exp = self.parse_unary()?;
            return Ok(Expr::Binary("^", Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Res<Expr> {
        let mut e = self.parse_primary()?;
        let outer = self.depth;
        while self.eat("[") {
            if self.depth == MAX_DEPTH {
                self.depth = outer;
                return Err("expression too deep".to_owned());
            }
            self.depth += 1;
            let idx = self.parse_binary(0).and_then(|idx| self.expect("]").map(|()| idx));
            match idx {
                Ok(idx) => e = Expr::Index(Box::new(e), Box::new(idx)),
                Err(err) => {
                    self.depth = outer;
                    return Err(err);
                }
            }
        }
        self.depth = outer;
        Ok(e)
    }

    fn parse_list(&mut self) -> Res<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat("]") {
            return Ok(items);
        }
        loop {
            items.push(self.parse_binary(0)?);
            if self.eat("]") {
                return Ok(items);
            }
            self.expect(",")?;
        }
    }

    fn parse_primary(&mut self) -> Res<Expr> {
        match self.advance() {
            Tok::Num(s) => Ok(Expr::Num(parse_decimal(&s)?)),
            Tok::Ident(name) => {
                if name == "matrix" && self.eat("[") {
                    return Ok(Expr::List(self.parse_list()?, true));
                }
                if self.eat("(") {
                    let mut args = Vec::new();
                    if !self.eat(")") {
                        loop {
                            args.push(self.parse_binary(0)?);
                            if self.eat(")") {
                                break;
                            }
                            self.expect(",")?;
                        }
                    }
                    return Ok(Expr::Call(name.to_ascii_lowercase(), args));
                }
                Ok(Expr::Sym(name))
            }
            Tok::Op("(") => {
                let e = self.parse_binary(0)?;
                self.expect(")")?;
                Ok(e)
            }
            Tok::Op("[") => Ok(Expr::List(self.parse_list()?, false)),
            Tok::Unknown(c) => Err(format!("unexpected character `{c}`")),
            t => Err(format!("unexpected {t:?}")),
        }
    }
}

/// `51.52e-05` → 5152/10000000
fn parse_decimal(s: &str) -> Res<Rational> {
    let (mantissa, exp) = match s.find(['e', 'E']) {
        Some(i) => (&s[..i], s[i + 1..].parse::<i32>().map_err(|e| e.to_string())?),
        None => (s, 0),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{int}{frac}");
    let n: i128 = if digits.is_empty() { 0 } else { digits.parse().map_err(|_| OVERFLOW.to_owned())? };
    let frac_len = i32::try_from(frac.len()).map_err(|_| OVERFLOW.to_owned())?;
    let scale = exp.checked_sub(frac_len).ok_or_else(|| OVERFLOW.to_owned())?;
    let ten = Rational::int(10);
    let factor = ten.pow(i128::from(scale))?;
    Rational::int(n).mul(factor)
}

// ── Evaluation ────────────────────────────────────────────────────────────────

fn eval(e: &Expr) -> Res<Val> {
    match e {
        Expr::Num(r) => Ok(Val::Num(*r)),
        Expr::Sym(name) => match name.as_str() {
            "true" | "True" => Ok(Val::Bool(true)),
            "false" | "False" => Ok(Val::Bool(false)),
            _ => Err(format!("symbolic value `{name}`")),
        },
        Expr::List(items, matrix) => {
            let items = items.iter().map(eval).collect::<Res<Vec<_>>>()?;
            Ok(Val::List { items, matrix: *matrix })
        }
        Expr::Unary(op, a) => {
            let a = eval(a)?;
            match *op {
                "-" => neg(&a),
                "!" => not(&a),
                _ => Ok(a),
            }
        }
        Expr::Binary(op, a, b) => binary(op, eval(a)?, eval(b)?),
        Expr::Index(a, i) => index(eval(a)?, &eval(i)?),
        Expr::Call(name, args) => {
            let args = args.iter().map(eval).collect::<Res<Vec<_>>>()?;
            call(name, args)
        }
    }
}

fn map_nums(v: &Val, f: &dyn Fn(Rational) -> Res<Rational>) -> Res<Val> {
    match v {
        Val::List { items, .. } => Ok(Val::list(
            items.iter().map(|x| map_nums(x, f)).collect::<Res<_>>()?,
        )),
        other => Ok(Val::Num(f(other.num()?)?)),
    }
}

fn neg(a: &Val) -> Res<Val> {
    map_nums(a, &Rational::neg)
}

fn not(a: &Val) -> Res<Val> {
    Ok(Val::Bool(!a.truth()?))
}

/// Elementwise combination with scalar broadcast.
fn zip_with(a: &Val, b: &Val, f: &dyn Fn(Rational, Rational) -> Res<Rational>) -> Res<Val> {
    match (a.items(), b.items()) {
        (Some(x), Some(y)) => {
            if x.len() != y.len() {
                return Err("dimension mismatch".into());
            }
            Ok(Val::list(
                x.iter().zip(y).map(|(p, q)| zip_with(p, q, f)).collect::<Res<_>>()?,
            ))
        }
        (Some(x), None) => Ok(Val::list(x.iter().map(|p| zip_with(p, b, f)).collect::<Res<_>>()?)),
        (None, Some(y)) => Ok(Val::list(y.iter().map(|q| zip_with(a, q, f)).collect::<Res<_>>()?)),
        (None, None) => Ok(Val::Num(f(a.num()?, b.num()?)?)),
    }
}

fn dot(x: &[Rational], y: &[Rational]) -> Res<Rational> {
    if x.len() != y.len() {
        return Err("dimension mismatch".into());
    }
    x.iter().zip(y).try_fold(Rational::ZERO, |acc, (p, q)| acc.add(p.mul(*q)?))
}

fn transpose(m: &Matrix) -> Matrix {
    let cols = m.first().map_or(0, Vec::len);
    (0..cols).map(|j| m.iter().map(|row| row[j]).collect()).collect()
}

fn mat_mul(a: &Matrix, b: &Matrix) -> Res<Matrix> {
    let bt = transpose(b);
    a.iter()
        .map(|row| bt.iter().map(|col| dot(row, col)).collect())
        .collect()
}

fn identity(n: usize) -> Matrix {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { Rational::ONE } else { Rational::ZERO }).collect())
        .collect()
}

/// Row-reduce `m` in place; returns (rank, determinant factor).
fn eliminate(m: &mut Matrix) -> Res<(usize, Rational)> {
    let rows = m.len();
    let cols = m.first().map_or(0, Vec::len);
    let mut rank = 0;
    let mut det = Rational::ONE;
    for col in 0..cols {
        let Some(p) = (rank..rows).find(|&r| !m[r][col].is_zero()) else {
            det = Rational::ZERO;
            continue;
        };
        if p != rank {
            m.swap(p, rank);
            det = det.neg()?;
        }
        let pivot = m[rank][col];
        det = det.mul(pivot)?;
        for c in 0..cols {
            m[rank][c] = m[rank][c].div(pivot)?;
        }
        for r in 0..rows {
            if r != rank && !m[r][col].is_zero() {
                let factor = m[r][col];
                for c in 0..cols {
                    let delta = factor.mul(m[rank][c])?;
                    m[r][c] = m[r][c].sub(delta)?;
                }
            }
        }
        rank += 1;
    }
    Ok((rank, det))
}

fn square(m: &Matrix) -> Res<usize> {
    if m.len() == m[0].len() {
        Ok(m.len())
    } else {
        Err("matrix is not square".into())
    }
}

fn det(m: &Matrix) -> Res<Rational> {
    square(m)?;
    let mut work = m.clone();
    Ok(eliminate(&mut work)?.1)
}

fn inverse(m: &Matrix) -> Res<Matrix> {
    let n = square(m)?;
    let mut work: Matrix = m
        .iter()
        .zip(identity(n))
        .map(|(row, id)| row.iter().copied().chain(id).collect())
        .collect();
    eliminate(&mut work)?;
    for (i, row) in work.iter().enumerate() {
        if row[i] != Rational::ONE {
            return Err("singular matrix".into());
        }
    }
    Ok(work.into_iter().map(|row| row[n..].to_vec()).collect())
}

fn mul(a: &Val, b: &Val) -> Res<Val> {
    match (a.items(), b.items()) {
        (None, _) | (_, None) => zip_with(a, b, &Rational::mul),
        _ => match (a.matrix(), b.matrix(), a.vector(), b.vector()) {
            (Some(x), Some(y), _, _) => Ok(from_matrix(mat_mul(&x, &y)?)),
            (Some(x), None, _, Some(v)) => Ok(Val::list(
                x.iter().map(|row| dot(row, &v).map(Val::Num)).collect::<Res<_>>()?,
            )),
            (None, Some(y), Some(v), _) => Ok(Val::list(
                transpose(&y).iter().map(|col| dot(&v, col).map(Val::Num)).collect::<Res<_>>()?,
            )),
            (_, _, Some(x), Some(y)) => Ok(Val::Num(dot(&x, &y)?)),
            _ => Err("cannot multiply these values".into()),
        },
    }
}

fn div(a: &Val, b: &Val) -> Res<Val> {
    match b.matrix() {
        Some(m) => mul(a, &from_matrix(inverse(&m)?)),
        None if b.items().is_none() => zip_with(a, b, &Rational::div),
        None => Err("cannot divide by a vector".into()),
    }
}

fn pow(a: &Val, b: &Val) -> Res<Val> {
    let exp = b.num()?.as_int()?;
    if let Some(m) = a.matrix() {
        let n = square(&m)?;
        let (mut base, mut e) = if exp < 0 { (inverse(&m)?, -exp) } else { (m, exp) };
        let mut acc = identity(n);
        while e > 0 {
            if e & 1 == 1 {
                acc = mat_mul(&acc, &base)?;
            }
            base = mat_mul(&base, &base)?;
            e >>= 1;
        }
        return Ok(from_matrix(acc));
    }
    Ok(Val::Num(a.num()?.pow(exp)?))
}

fn rem(a: &Val, b: &Val) -> Res<Val> {
    let x = a.num()?.as_int()?;
    let y = b.num()?.as_int()?;
    if y == 0 {
        return Err("division by zero".into());
    }
    Ok(Val::Num(Rational::int(x.rem_euclid(y))))
}

fn equal(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::List { items: x, .. }, Val::List { items: y, .. }) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| equal(p, q))
        }
        (Val::Text(x), Val::Text(y)) => x == y,
        _ => match (a.num(), b.num()) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
    }
}

fn binary(op: &str, a: Val, b: Val) -> Res<Val> {
    match op {
        "+" => zip_with(&a, &b, &Rational::add),
        "-" => zip_with(&a, &b, &Rational::sub),
        "*" => mul(&a, &b),
        ".*" => zip_with(&a, &b, &Rational::mul),
        "/" => div(&a, &b),
        "%" => rem(&a, &b),
        "^" => pow(&a, &b),
        "==" => Ok(Val::Bool(equal(&a, &b))),
        "!=" => Ok(Val::Bool(!equal(&a, &b))),
        "<" => Ok(Val::Bool(a.num()? < b.num()?)),
        "<=" => Ok(Val::Bool(a.num()? <= b.num()?)),
        ">" => Ok(Val::Bool(a.num()? > b.num()?)),
        ">=" => Ok(Val::Bool(a.num()? >= b.num()?)),
        "&&" => Ok(Val::Bool(a.truth()? && b.truth()?)),
        "||" => Ok(Val::Bool(a.truth()? || b.truth()?)),
        _ => Err(format!("unknown operator `{op}`")),
    }
}

fn index(a: Val, i: &Val) -> Res<Val> {
    let i = i.num()?.as_int()?;
    let Val::List { items, .. } = a else {
        return Err(format!("cannot index {a}"));
    };
    usize::try_from(i)
        .ok()
        .and_then(|i| items.into_iter().nth(i))
        .ok_or_else(|| "Index outside range".to_owned())
}

/// Transcendental functions are only exact at a few points.
fn special_value(name: &str, x: Rational) -> Res<Rational> {
    let (z, one) = (Rational::ZERO, Rational::ONE);
    let v = match name {
        "exp" | "cosh" | "cos" if x == z => one,
        "ln" | "log" if x == one => z,
        "sin" | "tan" | "sinh" | "tanh" | "asin" | "atan" | "asinh" | "atanh" if x == z => z,
        "acos" if x == one => z,
        "acosh" if x == one => z,
        "log10" => {
            let mut p = one;
            let mut k = 0;
            while p < x {
                p = p.mul(Rational::int(10))?;
                k += 1;
            }
            if p != x {
                return Err(format!("{name}({x}) is not exact"));
            }
            Rational::int(k)
        }
        _ => return Err(format!("{name}({x}) is not exact")),
    };
    Ok(v)
}

fn arity(name: &str, args: &[Val], n: usize) -> Res<()> {
    if args.len() == n {
        Ok(())
    } else {
        Err(format!("{name} expects {n} argument(s)"))
    }
}

fn call(name: &str, args: Vec<Val>) -> Res<Val> {
    match name {
        "min" | "max" | "cross" => arity(name, &args, 2)?,
        _ => arity(name, &args, 1)?,
    }
    let a = &args[0];
    match name {
        "latex" => Ok(Val::Text(latex(a))),
        "simplify" | "re" | "conj" => Ok(a.clone()),
        "neg" => neg(a),
        "not" => not(a),
        "abs" => map_nums(a, &Rational::abs),
        "sign" => map_nums(a, &|r| Ok(Rational::int(r.num.signum()))),
        "floor" => map_nums(a, &|r| Ok(r.floor())),
        "ceil" => map_nums(a, &|r| r.ceil()),
        "round" => map_nums(a, &Rational::round),
        "frac" => map_nums(a, &|r| r.sub(r.trunc())),
        "im" => map_nums(a, &|_| Ok(Rational::ZERO)),
        "sqrt" => map_nums(a, &Rational::sqrt),
        "arg" => map_nums(a, &|r| {
            if r.num >= 0 {
                Ok(Rational::ZERO)
            } else {
                Err("arg of a negative number is pi".into())
            }
        }),
        "factorial" => {
            let n = a.num()?.as_int()?;
            if n < 0 {
                return Err("factorial of a negative number".into());
            }
            (1..=n)
                .try_fold(1i128, |acc, k| acc.checked_mul(k))
                .map(|f| Val::Num(Rational::int(f)))
                .ok_or_else(|| OVERFLOW.to_owned())
        }
        "exp" | "ln" | "log" | "log10" | "sin" | "cos" | "tan" | "asin" | "acos" | "atan"
        | "sinh" | "cosh" | "tanh" | "asinh" | "acosh" | "atanh" => {
            map_nums(a, &|r| special_value(name, r))
        }
        "len" => match a.items() {
            Some(items) => Ok(Val::Num(Rational::int(items.len() as i128))),
            None => Err(format!("len of a scalar {a}")),
        },
        "idn" => {
            let n = a.num()?.as_int()?;
            if !(1..=256).contains(&n) {
                return Err(format!("idn({n})"));
            }
            Ok(tag(from_matrix(identity(n as usize))))
        }
        "tran" => {
            let m = match (a.matrix(), a.vector()) {
                (Some(m), _) => m,
                (None, Some(v)) if !v.is_empty() => vec![v],
                _ => return Err(format!("cannot transpose {a}")),
            };
            Ok(tag(from_matrix(transpose(&m))))
        }
        "det" => {
            let m = a.matrix().ok_or_else(|| format!("det of {a}"))?;
            Ok(Val::Num(det(&m)?))
        }
        "rank" => {
            let mut m = a.matrix().ok_or_else(|| format!("rank of {a}"))?;
            Ok(Val::Num(Rational::int(eliminate(&mut m)?.0 as i128)))
        }
        "min" | "max" => {
            let (x, y) = (a.num()?, args[1].num()?);
            let pick = if name == "min" { x.min(y) } else { x.max(y) };
            Ok(Val::Num(pick))
        }
        "cross" => match (a.vector(), args[1].vector()) {
            (Some(u), Some(v)) if u.len() == 3 && v.len() == 3 => {
                let c = |i: usize, j: usize| -> Res<Rational> {
                    u[i].mul(v[j])?.sub(u[j].mul(v[i])?)
                };
                Ok(Val::list(vec![
                    Val::Num(c(1, 2)?),
                    Val::Num(c(2, 0)?),
                    Val::Num(c(0, 1)?),
                ]))
            }
            _ => Err("cross needs two 3-vectors".into()),
        },
        _ => Err(format!("unsupported function `{name}`")),
    }
}

// ── LaTeX ─────────────────────────────────────────────────────────────────────

fn latex(v: &Val) -> String {
    match v {
        Val::Num(r) if r.is_integer() => r.num.to_string(),
        Val::Num(r) => {
            let sign = if r.num < 0 { "-" } else { "" };
            format!("{sign}\\frac{{{}}}{{{}}}", r.num.abs(), r.den)
        }
        Val::Bool(b) => format!("\\mathrm{{{b}}}"),
        Val::Text(s) => s.clone(),
        Val::List { items, .. } => match v.matrix() {
            Some(m) if items.iter().all(|r| r.items().is_some()) => {
                let cols = "c".repeat(m[0].len());
                let rows: Vec<String> = m
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|x| latex(&Val::Num(*x)))
                            .collect::<Vec<_>>()
                            .join(" & ")
                    })
                    .collect();
                format!(
                    "\\left(\\begin{{array}}{{{cols}}}{}\\end{{array}}\\right) ",
                    rows.join(" \\\\")
                )
            }
            _ => {
                let parts: Vec<String> = items.iter().map(latex).collect();
                format!("[{}]", parts.join(","))
            }
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::is_error;

    fn ev(s: &str) -> String {
        ExactBackend.evaluate(s)
    }

    #[test]
    fn arithmetic() {
        assert_eq!(ev("(-5)+(4)"), "-1");
        assert_eq!(ev("(-5)-(4)"), "-9");
        assert_eq!(ev("(-5)/(5)"), "-1");
        assert_eq!(ev("(-5)^(2)"), "25");
        assert_eq!(ev("(-5)*(2)"), "-10");
        assert_eq!(ev("-(-5)"), "5");
        assert_eq!(ev("3 + 4 * 2 / ( 1 - 5 ) ^ 2 ^ 3"), "24577/8192");
        assert_eq!(ev("2^-1"), "1/2");
        assert_eq!(ev("-2^2"), "-4");
        assert_eq!(ev("51.52e-05"), "161/312500");
        assert_eq!(ev("(7)%(3)"), "1");
    }

    #[test]
    fn relations_and_logic() {
        assert_eq!(ev("(-5)==(2)"), "false");
        assert_eq!(ev("(-5)!=(2)"), "true");
        assert_eq!(ev("(-5)>=(2)"), "false");
        assert_eq!(ev("(-5)<=(2)"), "true");
        assert_eq!(ev("(-5)>(2)"), "false");
        assert_eq!(ev("(-5)<(2)"), "true");
        assert_eq!(ev("(true)&&(false)"), "false");
        assert_eq!(ev("(true)||(false)"), "true");
        assert_eq!(ev("not(0)"), "true");
        assert_eq!(ev("([1,2])==([1,2])"), "true");
    }

    #[test]
    fn one_arg_functions() {
        assert_eq!(ev("abs(-1)"), "1");
        assert_eq!(ev("sign(-256)"), "-1");
        assert_eq!(ev("round(1.5)"), "2");
        assert_eq!(ev("round(-1.5)"), "-2");
        assert_eq!(ev("floor(1.5)"), "1");
        assert_eq!(ev("floor(-1.5)"), "-2");
        assert_eq!(ev("ceil(1.5)"), "2");
        assert_eq!(ev("frac(1.5)"), "1/2");
        assert_eq!(ev("factorial(3)"), "6");
        assert_eq!(ev("sqrt(4)"), "2");
        assert_eq!(ev("sqrt(9/4)"), "3/2");
        assert_eq!(ev("exp(0)"), "1");
        assert_eq!(ev("ln(1)"), "0");
        assert_eq!(ev("log10(10)"), "1");
        assert_eq!(ev("log10(1000)"), "3");
    }

    #[test]
    fn symbolic_is_an_error() {
        assert!(ev("sqrt(2)").starts_with("ERROR:"));
        assert!(ev("sin(pi)").starts_with("ERROR:"));
        assert!(ev("2*x").starts_with("ERROR:"));
        assert!(ev("read(\"/etc/passwd\")").starts_with("ERROR:"));
        assert!(ev("1/0").starts_with("ERROR:"));
        assert!(ev("ker([[1,2,3],[4,5,6]])").starts_with("ERROR:"));
    }

    #[test]
    fn two_arg_functions() {
        assert_eq!(ev("max(-256,256)"), "256");
        assert_eq!(ev("min(-256,256)"), "-256");
        assert_eq!(ev("cross([1,2,3],[4,5,6])"), "[-3,6,-3]");
    }

    #[test]
    fn vectors_and_matrices() {
        assert_eq!(ev("([1,2])*([3,4])"), "11");
        assert_eq!(ev("([[0,2],[3,0]])*([[1,1],[1,1]])"), "[[2,2],[3,3]]");
        assert_eq!(ev("([[0,2],[3,0]]).*([[1,2],[2,1]])"), "[[0,4],[6,0]]");
        assert_eq!(ev("(1)/([[0,2],[3,0]])"), "[[0,1/3],[1/2,0]]");
        assert_eq!(ev("tran([[1,2],[3,4],[5,6]])"), "matrix[[1,3,5],[2,4,6]]");
        assert_eq!(ev("rank([[0,2],[3,0]])"), "2");
        assert_eq!(ev("rank([[1,2],[2,4]])"), "1");
        assert_eq!(ev("det([[0,2],[3,0]])"), "-6");
        assert_eq!(ev("idn(2)"), "matrix[[1,0],[0,1]]");
        assert_eq!(ev("len([[0,2],[3,0]])"), "2");
        assert_eq!(ev("len([0,2])"), "2");
        assert_eq!(ev("(3)*(matrix[[1,0],[0,1]])"), "[[3,0],[0,3]]");
        assert_eq!(ev("([[1,1],[0,1]])^(3)"), "[[1,3],[0,1]]");
    }

    #[test]
    fn indexing() {
        assert_eq!(ev("([[1,2,3],[4,5,6]])[1]"), "[4,5,6]");
        assert_eq!(ev("([4,5,6])[1]"), "5");
        assert!(ev("([4,5,6])[3]").starts_with("ERROR:"));
        assert!(ev("(5)[1]").starts_with("ERROR:"));
        assert_eq!(ev("(idn(3))[0]"), "[1,0,0]");
    }

    #[test]
    fn latex_forms() {
        assert_eq!(ev("latex(1/2)"), "\"\\frac{1}{2}\"");
        assert_eq!(ev("latex(-3/2)"), "\"-\\frac{3}{2}\"");
        assert_eq!(ev("latex(7)"), "\"7\"");
        assert_eq!(ev("latex([1,2])"), "\"[1,2]\"");
        assert_eq!(
            ev("latex(matrix[[1,1,0],[0,2,0],[0,3,1]])"),
            "\"\\left(\\begin{array}{ccc}1 & 1 & 0 \\\\0 & 2 & 0 \\\\0 & 3 & 1\\end{array}\\right) \""
        );
    }

    #[test]
    fn rounding_huge_denominators_overflows_cleanly() {
        let tiny = "1/100000000000000000000000000000000000000";
        assert!(is_error(&ev(&format!("round({tiny})"))));
        assert_eq!(ev(&format!("ceil({tiny})")), "1");
        assert_eq!(ev(&format!("floor(-{tiny})")), "-1");
        assert!(is_error(&ev("ceil(-170141183460469231731687303715884105727/3)")));
    }

    #[test]
    fn extreme_exponents_are_errors() {
        assert!(is_error(&ev("1.5e-2147483648 + 1")));
        assert!(is_error(&ev("1e2147483647")));
        assert!(is_error(&ev("1e99999999999")));
        assert_eq!(ev("1.5e1"), "15");
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(ev(&deep).contains("too deep"));
        assert!(ev(&format!("{}1", "-".repeat(10_000))).contains("too deep"));
        assert!(ev(&format!("{}1{}", "[".repeat(10_000), "]".repeat(10_000))).contains("too deep"));
        assert!(ev(&vec!["1"; 10_000].join("+")).contains("too deep"));
        assert!(ev(&format!("[1]{}", "[0]".repeat(10_000))).contains("too deep"));
        let shallow = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(ev(&shallow), "1");
        assert_eq!(ev(&vec!["1"; 100].join("+")), "100");
    }

    #[test]
    fn simplify_reduces() {
        assert_eq!(ev("simplify(2+2*(1/2))"), "3");
        assert!(ev("simplify(2+2x)").starts_with("ERROR:"));
    }
}
