//! Built-in operators, functions and reserved names.
//!
//! Every operator maps onto a function, so the evaluator has a single
//! dispatch path: look the token up with [`resolve`], pop
//! [`Function::arity`] values, [`Function::call`] it.
//!
//! | Group | Names | Backend call | On failure |
//! |-------|-------|--------------|------------|
//! | 1-arg | `abs` … `len` | `name(a)` | echo `a` |
//! | 2-arg | `min max cross` | `name(a,b)` | `0` |
//! | arithmetic ops | `plus minus div mod pow times mtimes` | `(a)OP(b)` | `0` |
//! | relational ops | `eq neq gte lte gt lt and or` | `(a)OP(b)` | `false` |
//! | indexing | `get`, `neg` | `(a)[b]`, `-(a)` | echo `a` |
//! | local | `vec1`…`vec16`, `rand*`, `ones`, `zeros` | none | n/a |

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::backend::{is_error, Backend};
use crate::random::Random;

use super::value::{format_number, parse_float_prefix, parse_int_prefix};

/// Names that evaluate to themselves.
pub const CONSTANTS: &[&str] = &[
    "e", "pi", "PI", "Pi", "i", "infinity", "inf", "euler_gamma", "true", "True", "false", "False",
];

/// Names that cannot be assigned (compared lowercase).
pub const RESERVED: &[&str] = &["simplify"];

/// Substrings that keep a `{simplify:…}` fragment away from the backend.
pub const DENYLIST: &[&str] = &["read", "write"];

/// Upper bound on elements built by `randvec`/`randmat`/`ones`/`zeros`
/// along one dimension.
const MAX_DIMENSION: i64 = 1000;

/// Attempts `randnn` makes before giving up with `0`.
const RANDNN_ATTEMPTS: usize = 10_000;

pub fn is_constant(name: &str) -> bool {
    CONSTANTS.contains(&name)
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name.to_ascii_lowercase().as_str())
}

// ── Operators ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Operator {
    pub symbol: &'static str,
    pub precedence: u8,
    pub right_assoc: bool,
    /// Registry function implementing the operator.
    pub function: &'static str,
}

const fn op(symbol: &'static str, precedence: u8, right_assoc: bool, function: &'static str) -> Operator {
    Operator { symbol, precedence, right_assoc, function }
}

pub static OPERATORS: &[Operator] = &[
    op("!", 8, false, "not"),
    op(".-", 8, false, "neg"),
    op("e^", 8, false, "exp"),
    op("~", 8, false, "tran"),
    op("^", 7, true, "pow"),
    op("%", 7, true, "mod"),
    op("*", 6, false, "times"),
    op(".*", 6, false, "mtimes"),
    op("/", 6, false, "div"),
    op("+", 5, false, "plus"),
    op("-", 5, false, "minus"),
    op("!=", 4, false, "neq"),
    op("==", 4, false, "eq"),
    op(">=", 4, false, "gte"),
    op("<=", 4, false, "lte"),
    op(">", 4, false, "gt"),
    op("<", 4, false, "lt"),
    op("&&", 3, false, "and"),
    op("||", 2, false, "or"),
];

/// Look up an operator by its exact symbol.
pub fn operator(symbol: &str) -> Option<&'static Operator> {
    OPERATORS.iter().find(|o| o.symbol == symbol)
}

impl Operator {
    /// Prefix operators take their operand from the right.
    pub fn is_prefix(&self) -> bool {
        matches!(self.symbol, "!" | ".-" | "e^" | "~")
    }
}

// ── Functions ─────────────────────────────────────────────────────────────────

/// What the evaluator needs from its owner to run built-ins.
pub trait CallContext {
    fn backend(&self) -> &dyn Backend;
    fn random(&mut self) -> &mut dyn Random;
}

type Native = fn(&mut dyn CallContext, &[String]) -> String;

enum Behavior {
    /// `name(a)`; echo `a` on failure.
    Unary,
    /// `name(a,b)`; `0` on failure.
    Binary,
    /// `(a)SYM(b)`; `fallback` on failure.
    Infix { symbol: &'static str, fallback: &'static str },
    /// `[a,b,…]`, no backend.
    Vector,
    Native(Native),
}

pub struct Function {
    pub name: String,
    pub arity: usize,
    behavior: Behavior,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

impl Function {
    /// Run the function on exactly [`arity`](Self::arity) arguments.
    pub fn call(&self, ctx: &mut dyn CallContext, args: &[String]) -> String {
        match &self.behavior {
            Behavior::Unary => {
                let expr = format!("{}({})", self.name, args[0]);
                evaluate_or(ctx.backend(), &expr, || args[0].clone())
            }
            Behavior::Binary => {
                let expr = format!("{}({},{})", self.name, args[0], args[1]);
                evaluate_or(ctx.backend(), &expr, || "0".to_owned())
            }
            Behavior::Infix { symbol, fallback } => {
                let expr = format!("({}){}({})", args[0], symbol, args[1]);
                evaluate_or(ctx.backend(), &expr, || (*fallback).to_owned())
            }
            Behavior::Vector => format!("[{}]", args.join(",")),
            Behavior::Native(f) => f(ctx, args),
        }
    }
}

fn evaluate_or(backend: &dyn Backend, expr: &str, fallback: impl FnOnce() -> String) -> String {
    let res = backend.evaluate(expr);
    if is_error(&res) {
        tracing::warn!(expr, answer = %res, "backend failed, using fallback");
        fallback()
    } else {
        res
    }
}

const UNARY: &[&str] = &[
    "abs", "sign", "round", "floor", "frac", "ceil", "re", "im", "arg", "conj", "factorial", "sqrt",
    "exp", "log", "ln", "log10", "sin", "cos", "tan", "cot", "asin", "acos", "atan", "sinh", "cosh",
    "tanh", "asinh", "acosh", "atanh", "not", "tran", "rank", "det", "ker", "image", "idn", "len",
];

const BINARY: &[&str] = &["min", "max", "cross"];

const INFIX: &[(&str, &str, &str)] = &[
    ("plus", "+", "0"),
    ("minus", "-", "0"),
    ("div", "/", "0"),
    ("mod", "%", "0"),
    ("pow", "^", "0"),
    ("times", "*", "0"),
    ("mtimes", ".*", "0"),
    ("eq", "==", "false"),
    ("neq", "!=", "false"),
    ("gte", ">=", "false"),
    ("lte", "<=", "false"),
    ("gt", ">", "false"),
    ("lt", "<", "false"),
    ("and", "&&", "false"),
    ("or", "||", "false"),
];

const NATIVE: &[(&str, usize, Native)] = &[
    ("rand", 2, rand),
    ("randnn", 2, randnn),
    ("randvec", 3, randvec),
    ("randmat", 4, randmat),
    ("ones", 2, ones),
    ("zeros", 2, zeros),
    ("get", 2, get),
    ("neg", 1, neg),
];

static FUNCTIONS: Lazy<HashMap<String, Function>> = Lazy::new(|| {
    let mut map = HashMap::new();
    let mut add = |name: &str, arity: usize, behavior: Behavior| {
        map.insert(name.to_owned(), Function { name: name.to_owned(), arity, behavior });
    };
    for &name in UNARY {
        add(name, 1, Behavior::Unary);
    }
    for &name in BINARY {
        add(name, 2, Behavior::Binary);
    }
    for &(name, symbol, fallback) in INFIX {
        add(name, 2, Behavior::Infix { symbol, fallback });
    }
    for &(name, arity, f) in NATIVE {
        add(name, arity, Behavior::Native(f));
    }
    for n in 1..=16 {
        add(&format!("vec{n}"), n, Behavior::Vector);
    }
    map
});

/// Look up a function by name, case-insensitively.
pub fn function(name: &str) -> Option<&'static Function> {
    FUNCTIONS.get(&name.to_ascii_lowercase())
}

/// Operator symbol or function name → the function to call.
pub fn resolve(token: &str) -> Option<&'static Function> {
    match operator(token) {
        Some(op) => function(op.function),
        None => function(token),
    }
}

/// All built-in function names, sorted.
pub fn function_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = FUNCTIONS.values().map(|f| f.name.as_str()).collect();
    names.sort_unstable();
    names
}

// ── Native implementations ────────────────────────────────────────────────────

fn float_arg(s: &str) -> f64 {
    parse_float_prefix(s).unwrap_or(f64::NAN)
}

fn count_arg(s: &str) -> usize {
    parse_int_prefix(s).unwrap_or(0).clamp(0, MAX_DIMENSION) as usize
}

/// Integer in `[a, b]`.
fn draw(random: &mut dyn Random, a: &str, b: &str) -> f64 {
    random.next_int(float_arg(a), float_arg(b) + 1.0)
}

fn rand(ctx: &mut dyn CallContext, args: &[String]) -> String {
    format_number(draw(ctx.random(), &args[0], &args[1]))
}

fn randnn(ctx: &mut dyn CallContext, args: &[String]) -> String {
    if float_arg(&args[0]) == 0.0 && float_arg(&args[1]) == 0.0 {
        return "0".to_owned();
    }
    for _ in 0..RANDNN_ATTEMPTS {
        let x = draw(ctx.random(), &args[0], &args[1]);
        if x != 0.0 {
            return format_number(x);
        }
    }
    tracing::warn!(min = %args[0], max = %args[1], "randnn found no non-zero value");
    "0".to_owned()
}

fn bracket(items: impl Iterator<Item = String>) -> String {
    format!("[{}]", items.collect::<Vec<_>>().join(","))
}

fn randvec(ctx: &mut dyn CallContext, args: &[String]) -> String {
    let n = count_arg(&args[0]);
    let random = ctx.random();
    bracket((0..n).map(|_| format_number(draw(random, &args[1], &args[2]))))
}

fn randmat(ctx: &mut dyn CallContext, args: &[String]) -> String {
    let (rows, cols) = (count_arg(&args[0]), count_arg(&args[1]));
    let random = ctx.random();
    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        out.push(bracket((0..cols).map(|_| format_number(draw(random, &args[2], &args[3])))));
    }
    bracket(out.into_iter())
}

fn filled(args: &[String], cell: &str) -> String {
    let (rows, cols) = (count_arg(&args[0]), count_arg(&args[1]));
    bracket((0..rows).map(|_| bracket((0..cols).map(|_| cell.to_owned()))))
}

fn ones(_: &mut dyn CallContext, args: &[String]) -> String {
    filled(args, "1")
}

fn zeros(_: &mut dyn CallContext, args: &[String]) -> String {
    filled(args, "0")
}

fn get(ctx: &mut dyn CallContext, args: &[String]) -> String {
    let expr = format!("({})[{}]", args[0], args[1]);
    evaluate_or(ctx.backend(), &expr, || args[0].clone())
}

fn neg(ctx: &mut dyn CallContext, args: &[String]) -> String {
    let expr = format!("-({})", args[0]);
    evaluate_or(ctx.backend(), &expr, || args[0].clone())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::ExactBackend;
    use crate::random::SineRandom;

    /// Call context over the exact backend with a fixed seed.
    pub(crate) struct TestCtx {
        pub backend: ExactBackend,
        pub random: SineRandom,
    }

    impl TestCtx {
        pub fn new() -> Self {
            TestCtx { backend: ExactBackend::new(), random: SineRandom::new(46.0) }
        }
    }

    impl CallContext for TestCtx {
        fn backend(&self) -> &dyn Backend {
            &self.backend
        }
        fn random(&mut self) -> &mut dyn Random {
            &mut self.random
        }
    }

    fn call(name: &str, args: &[&str]) -> String {
        let f = function(name).expect("known function");
        assert_eq!(f.arity, args.len(), "arity of {name}");
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        f.call(&mut TestCtx::new(), &args)
    }

    #[test]
    fn operators_resolve_to_functions() {
        for o in OPERATORS {
            assert!(resolve(o.symbol).is_some(), "{}", o.symbol);
        }
        assert_eq!(resolve("+").map(|f| f.name.as_str()), Some("plus"));
        assert_eq!(resolve(".-").map(|f| f.arity), Some(1));
        assert!(resolve("(").is_none());
    }

    #[test]
    fn case_insensitive_functions() {
        assert!(function("IDN").is_some());
        assert!(function("Vec3").is_some());
        assert!(function("vec17").is_none());
        assert_eq!(function("vec16").map(|f| f.arity), Some(16));
    }

    #[test]
    fn unary_backend_functions() {
        assert_eq!(call("abs", &["-1"]), "1");
        assert_eq!(call("sign", &["-256"]), "-1");
        assert_eq!(call("round", &["1.5"]), "2");
        assert_eq!(call("floor", &["1.5"]), "1");
        assert_eq!(call("ceil", &["1.5"]), "2");
        assert_eq!(call("factorial", &["3"]), "6");
        assert_eq!(call("tran", &["[[1,2],[3,4],[5,6]]"]), "matrix[[1,3,5],[2,4,6]]");
        assert_eq!(call("rank", &["[[0,2],[3,0]]"]), "2");
        assert_eq!(call("idn", &["2"]), "matrix[[1,0],[0,1]]");
        assert_eq!(call("len", &["[[0,2],[3,0]]"]), "2");
    }

    #[test]
    fn unary_failure_echoes_argument() {
        assert_eq!(call("sqrt", &["2"]), "2");
        assert_eq!(call("ker", &["[[1,2,3],[4,5,6]]"]), "[[1,2,3],[4,5,6]]");
    }

    #[test]
    fn binary_functions() {
        assert_eq!(call("max", &["-256", "256"]), "256");
        assert_eq!(call("min", &["-256", "256"]), "-256");
        assert_eq!(call("cross", &["[1,2,3]", "[4,5,6]"]), "[-3,6,-3]");
        assert_eq!(call("cross", &["[1,2]", "[4,5]"]), "0");
    }

    #[test]
    fn infix_functions() {
        assert_eq!(call("plus", &["-5", "4"]), "-1");
        assert_eq!(call("minus", &["-5", "4"]), "-9");
        assert_eq!(call("div", &["-5", "5"]), "-1");
        assert_eq!(call("pow", &["-5", "2"]), "25");
        assert_eq!(call("times", &["-5", "2"]), "-10");
        assert_eq!(call("times", &["[1,2]", "[3,4]"]), "11");
        assert_eq!(call("times", &["[[0,2],[3,0]]", "[[1,1],[1,1]]"]), "[[2,2],[3,3]]");
        assert_eq!(call("mtimes", &["[[0,2],[3,0]]", "[[1,2],[2,1]]"]), "[[0,4],[6,0]]");
        assert_eq!(call("div", &["1", "[[0,2],[3,0]]"]), "[[0,1/3],[1/2,0]]");
        assert_eq!(call("eq", &["-5", "2"]), "false");
        assert_eq!(call("neq", &["-5", "2"]), "true");
        assert_eq!(call("gte", &["-5", "2"]), "false");
        assert_eq!(call("lte", &["-5", "2"]), "true");
        assert_eq!(call("gt", &["-5", "2"]), "false");
        assert_eq!(call("lt", &["-5", "2"]), "true");
    }

    #[test]
    fn infix_fallbacks() {
        assert_eq!(call("div", &["1", "0"]), "0");
        assert_eq!(call("plus", &["x", "1"]), "0");
        assert_eq!(call("lt", &["x", "1"]), "false");
    }

    #[test]
    fn indexing_and_negation() {
        assert_eq!(call("get", &["[[1,2,3],[4,5,6]]", "1"]), "[4,5,6]");
        assert_eq!(call("get", &["[4,5,6]", "3"]), "[4,5,6]");
        assert_eq!(call("get", &["[4,5,6]", "1"]), "5");
        assert_eq!(call("get", &["5", "1"]), "5");
        assert_eq!(call("neg", &["-5"]), "5");
        assert_eq!(call("neg", &["x"]), "x");
    }

    #[test]
    fn local_constructors() {
        assert_eq!(call("vec3", &["1", "2", "3"]), "[1,2,3]");
        assert_eq!(call("ones", &["2", "3"]), "[[1,1,1],[1,1,1]]");
        assert_eq!(call("zeros", &["1", "2"]), "[[0,0]]");
        assert_eq!(call("zeros", &["-1", "2"]), "[]");
    }

    #[test]
    fn random_functions() {
        assert_eq!(call("rand", &["10", "20"]), "19");
        assert_eq!(call("randnn", &["0", "0"]), "0");
        let mut ctx = TestCtx::new();
        let f = function("randnn").unwrap();
        for _ in 0..50 {
            let v = f.call(&mut ctx, &["-1".to_owned(), "1".to_owned()]);
            assert!(v == "-1" || v == "1", "{v}");
        }
        let v = call("randvec", &["3", "0", "9"]);
        assert_eq!(v.matches(',').count(), 2);
        let m = call("randmat", &["2", "2", "0", "9"]);
        assert!(m.starts_with("[[") && m.ends_with("]]"));
        assert_eq!(call("randvec", &["x", "0", "9"]), "[]");
    }

    #[test]
    fn names() {
        assert!(is_constant("pi"));
        assert!(!is_constant("PI2"));
        assert!(is_reserved("Simplify"));
        let names = function_names();
        assert!(names.contains(&"vec16"));
        assert!(names.contains(&"randmat"));
    }
}
