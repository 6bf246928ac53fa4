//! Helpers for the textual values the engine passes around.
//!
//! Every runtime value is an opaque string in the backend's algebraic syntax
//! (`3/2`, `[[1,0],[0,1]]`, `true`, …).  The engine only ever needs to ask a
//! handful of questions about them: is it numeric, is it an integer literal,
//! and is it truthy.  Arithmetic is the backend's business.

/// Returns `true` if `s` reads as a finite decimal number (`1`, `-0.5`,
/// `1e-5`, `.5`).  Backend forms such as `3/2` or `√2` are not numeric.
pub fn is_numeric(s: &str) -> bool {
    let t = s.trim();
    if t.is_empty() {
        return false;
    }
    // `f64::from_str` also accepts `inf`, `NaN` and friends.
    if t.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return false;
    }
    t.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}

/// Returns `true` for a non-empty run of ASCII digits (array path indices).
pub fn is_integer(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Truthiness of a textual value.
///
/// A value is false iff it is empty, literally `false`, a negation the
/// backend could not reduce (`not(…)`), or numerically zero.
pub fn check_value(v: &str) -> bool {
    let t = v.trim();
    if t.is_empty() || v == "false" || v.starts_with("not(") {
        return false;
    }
    match t.parse::<f64>() {
        Ok(x) if is_numeric(t) => x != 0.0,
        _ => true,
    }
}

/// Parse the longest leading decimal number of `s`, like a lenient
/// `strtod`: `"12abc"` → 12, `"3/2"` → 3, `"-1.5e2x"` → -150.
pub fn parse_float_prefix(s: &str) -> Option<f64> {
    let b = s.trim_start().as_bytes();
    let mut end = 0;
    if matches!(b.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while b.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut mantissa_digits = end - digits_start;
    if b.get(end) == Some(&b'.') {
        let mut frac_end = end + 1;
        while b.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        mantissa_digits += frac_end - end - 1;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return None;
    }
    if matches!(b.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(b.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while b.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    std::str::from_utf8(&b[..end]).ok()?.parse().ok()
}

/// Parse the leading integer of `s` (`"3.7"` → 3, `"-2x"` → -2).
pub fn parse_int_prefix(s: &str) -> Option<i64> {
    let b = s.trim_start().as_bytes();
    let mut end = usize::from(matches!(b.first(), Some(b'+' | b'-')));
    let start = end;
    while b.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if end == start {
        return None;
    }
    std::str::from_utf8(&b[..end]).ok()?.parse().ok()
}

/// Render a PRNG-derived number:
/// integral values without a fractional part.
pub fn format_number(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
