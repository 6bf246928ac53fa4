//! Evaluation output: text and timers keyed by block path.
//!
//! | Type          | Purpose                                             |
//! |---------------|-----------------------------------------------------|
//! | [`BlockMap`]  | insertion-ordered map from block path to a value    |
//! | [`Seconds`]   | a `TIME` value, printed without `.0` when integral  |
//! | [`EvalOutput`]| `{ content, timers }` returned by `Engine::eval`    |
//!
//! The block path of the top level is the empty string; `START a` inside
//! `START ex` gives `#ex#a`.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::value::format_number;

// ── BlockMap ──────────────────────────────────────────────────────────────────

/// Map from block path to `V` that remembers first-insertion order.
///
/// Scripts open a handful of blocks at most, so lookups are linear.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for BlockMap<V> {
    fn default() -> Self {
        BlockMap { entries: Vec::new() }
    }
}

impl<V> BlockMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite; an overwritten key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get_or_default(&mut self, key: &str) -> &mut V
    where
        V: Default,
    {
        let pos = match self.entries.iter().position(|(k, _)| k == key) {
            Some(pos) => pos,
            None => {
                self.entries.push((key.to_owned(), V::default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos].1
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BlockMap<String> {
    /// Append a line (and its newline) to the text of `key`.
    pub fn push_line(&mut self, key: &str, line: &str) {
        let text = self.get_or_default(key);
        text.push_str(line);
        text.push('\n');
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for BlockMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = BlockMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for BlockMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ── Timers ────────────────────────────────────────────────────────────────────

/// Duration given by `TIME`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Seconds(pub f64);

impl Seconds {
    fn as_integer(self) -> Option<i64> {
        let x = self.0;
        (x.is_finite() && x.fract() == 0.0 && x.abs() < 9.007_199_254_740_992e15).then_some(x as i64)
    }
}

impl fmt::Display for Seconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_number(self.0))
    }
}

impl Serialize for Seconds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_integer() {
            Some(n) => serializer.serialize_i64(n),
            None => serializer.serialize_f64(self.0),
        }
    }
}

pub type TimerMap = BlockMap<Seconds>;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct EvalOutput {
    pub content: BlockMap<String>,
    pub timers: TimerMap,
}

// ── Key ordering ──────────────────────────────────────────────────────────────

const SLOTS: [&str; 4] = ["problem", "hint", "result", "solution"];

/// Keys of an exercise output in presentation order, keeping only present ones.
///
/// A top-level `#problem`/`#result` pair selects the flat layout
/// `'' #problem #hint #result #solution`.  Otherwise each sub-exercise `#id`
/// having both `#id#problem` and `#id#result` contributes its four slots, in
/// order of first appearance.
pub fn sort_keys<V>(content: &BlockMap<V>) -> Vec<String> {
    let mut keys = vec![String::new()];
    if content.contains_key("#problem") && content.contains_key("#result") {
        keys.extend(SLOTS.iter().map(|s| format!("#{s}")));
    } else {
        for key in content.keys() {
            let parts: Vec<&str> = key.split('#').collect();
            let [_, id, _] = parts.as_slice() else {
                continue;
            };
            let problem = format!("#{id}#problem");
            if !keys.contains(&problem)
                && content.contains_key(&problem)
                && content.contains_key(&format!("#{id}#result"))
            {
                keys.extend(SLOTS.iter().map(|s| format!("#{id}#{s}")));
            }
        }
    }
    keys.retain(|k| content.contains_key(k));
    keys
}

// ── Tests ─────────────────────────────────────────────────────────────────────
