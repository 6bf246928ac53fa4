//! Condition tree: for every `IF` line, the lines of its branches and of
//! its `ENDIF`.  Line numbers here are 0-based indices into the source.

use std::collections::HashMap;

use super::stmt::{line_keyword, Keyword};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondRecord {
    /// The `IF` line followed by each `ELIF`/`ELSE` line, in order.
    pub branches: Vec<usize>,
    /// The `ENDIF` line, `None` while unclosed.
    pub end: Option<usize>,
}

pub type CondTree = HashMap<usize, CondRecord>;

pub fn condition_tree<S: AsRef<str>>(lines: &[S]) -> CondTree {
    let mut tree = CondTree::new();
    let mut open: Vec<usize> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        match line_keyword(line.as_ref()) {
            Some(Keyword::If) => {
                open.push(i);
                tree.insert(i, CondRecord { branches: vec![i], end: None });
            }
            Some(Keyword::Elif | Keyword::Else) => {
                if let Some(rec) = open.last().and_then(|k| tree.get_mut(k)) {
                    rec.branches.push(i);
                }
            }
            Some(Keyword::Endif) => {
                if let Some(rec) = open.pop().and_then(|k| tree.get_mut(&k)) {
                    rec.end = Some(i);
                }
            }
            _ => {}
        }
    }
    tree
}
