//! In-place update of one element of a bracketed array value.
//!
//! `VAR A[1][0] = x;` needs to change a single cell of a value that is only
//! ever stored as text (`[[1,0],[0,1]]`).  The text is parsed into a
//! short-lived tree, the addressed node is swapped, and the tree is printed
//! back.

use super::value::is_integer;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(String),
    List(Vec<Node>),
}

impl Node {
    fn write(&self, out: &mut String) {
        match self {
            Node::Leaf(s) => out.push_str(s),
            Node::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write(out);
                }
                out.push(']');
            }
        }
    }

    fn at_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        match path.split_first() {
            None => Some(self),
            Some((&i, rest)) => match self {
                Node::List(items) => items.get_mut(i)?.at_mut(rest),
                Node::Leaf(_) => None,
            },
        }
    }
}

/// Parse `[a,[b,c],d]`; `None` unless the whole text is one balanced list.
fn parse(text: &str) -> Option<Node> {
    let bytes = text.as_bytes();
    let mut pos = 0;
    let node = parse_list(text, bytes, &mut pos)?;
    (pos == bytes.len()).then_some(node)
}

fn parse_list(text: &str, bytes: &[u8], pos: &mut usize) -> Option<Node> {
    if bytes.get(*pos) != Some(&b'[') {
        return None;
    }
    *pos += 1;
    let mut items = Vec::new();
    if bytes.get(*pos) == Some(&b']') {
        *pos += 1;
        return Some(Node::List(items));
    }
    loop {
        let item = if bytes.get(*pos) == Some(&b'[') {
            parse_list(text, bytes, pos)?
        } else {
            let start = *pos;
            let mut parens = 0usize;
            while let Some(&c) = bytes.get(*pos) {
                match c {
                    b'(' => parens += 1,
                    b')' => parens = parens.saturating_sub(1),
                    b',' | b']' if parens == 0 => break,
                    b'[' if parens == 0 => return None,
                    _ => {}
                }
                *pos += 1;
            }
            Node::Leaf(text[start..*pos].to_owned())
        };
        items.push(item);
        match bytes.get(*pos) {
            Some(b',') => *pos += 1,
            Some(b']') => {
                *pos += 1;
                return Some(Node::List(items));
            }
            _ => return None,
        }
    }
}

/// New value of a variable after `VAR name[path…] = value;`.
///
/// With an empty path, or when `prev` is not an array, or when a path
/// element is not an integer, this is plain replacement.  A path that
/// addresses nothing leaves the array unchanged.
pub fn set_var(prev: Option<&str>, path: &[String], value: String) -> String {
    if path.is_empty() {
        return value;
    }
    let Some(prev) = prev else {
        return value;
    };
    let text = prev.strip_prefix("matrix").unwrap_or(prev);
    let Some(indices) = path
        .iter()
        .map(|p| if is_integer(p) { p.parse::<usize>().ok() } else { None })
        .collect::<Option<Vec<usize>>>()
    else {
        return value;
    };
    let Some(mut tree) = parse(text) else {
        return value;
    };
    match tree.at_mut(&indices) {
        Some(node) => *node = Node::Leaf(value),
        None => tracing::debug!(prev, ?indices, "array path addresses nothing"),
    }
    let mut out = String::with_capacity(text.len());
    tree.write(&mut out);
    out
}
