//! The persistent game-state tree.
//!
//! A [`StateTree`] is a nested map of string keys to JSON values. Any
//! leaf may be a **Tuple**: a two-element array `[value, label]` whose
//! second slot is a string annotation (e.g. a stat's description).
//! Reads unwrap Tuples to their value by default, and writes through an
//! existing Tuple replace only the value slot, so labels survive every
//! value mutation.
//!
//! Because the tree is a value type, snapshots and rollback are a
//! `clone()`, not a hand-rolled deep copy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from path parsing and tree writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("empty segment in path `{0}`")]
    EmptySegment(String),

    #[error("unterminated bracket in path `{0}`")]
    UnterminatedBracket(String),

    #[error("array index `{index}` out of bounds (len {len}) at `{path}`")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("`{path}` is not a container (found {kind})")]
    NotAContainer { path: String, kind: &'static str },
}

/// Parse a dotted/bracket path into canonical segments.
///
/// Accepts `a.b.c`, `a[0].b`, `a["spaced key"]`, and mixtures thereof.
pub fn parse_path(path: &str) -> Result<Vec<String>, PathError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if current.is_empty() {
                    return Err(PathError::EmptySegment(path.to_string()));
                }
                segments.push(std::mem::take(&mut current));
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                let mut inner = String::new();
                let mut closed = false;
                for b in chars.by_ref() {
                    if b == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(b);
                }
                if !closed {
                    return Err(PathError::UnterminatedBracket(path.to_string()));
                }
                let inner = inner.trim();
                let unquoted = inner
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                    .unwrap_or(inner);
                if unquoted.is_empty() {
                    return Err(PathError::EmptySegment(path.to_string()));
                }
                segments.push(unquoted.to_string());
                // Swallow a separator dot following the bracket.
                if chars.peek() == Some(&'.') {
                    chars.next();
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    if segments.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(segments)
}

/// Render segments back to the canonical dotted form.
pub fn canonical_path(segments: &[String]) -> String {
    segments.join(".")
}

/// Whether a value has the Tuple shape `[value, label]`.
pub fn is_tuple(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.len() == 2 && items[1].is_string())
}

/// A nested map of string keys to values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTree {
    root: Value,
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    /// Wrap an existing JSON value (non-objects become the empty tree).
    pub fn from_value(value: Value) -> Self {
        if value.is_object() {
            Self { root: value }
        } else {
            Self::new()
        }
    }

    /// The underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Read the value at `path`, unwrapping a Tuple leaf to its value.
    pub fn get(&self, path: &str) -> Option<Value> {
        let raw = self.get_raw(path)?;
        if is_tuple(raw) {
            Some(raw[0].clone())
        } else {
            Some(raw.clone())
        }
    }

    /// Read the raw value at `path` without Tuple unwrapping.
    pub fn get_raw(&self, path: &str) -> Option<&Value> {
        let segments = parse_path(path).ok()?;
        let mut node = &self.root;
        for segment in &segments {
            node = descend(node, segment)?;
        }
        Some(node)
    }

    /// Mutable access to the raw value at `path`.
    pub fn get_raw_mut(&mut self, path: &str) -> Option<&mut Value> {
        let segments = parse_path(path).ok()?;
        let mut node = &mut self.root;
        for segment in &segments {
            node = descend_mut(node, segment)?;
        }
        Some(node)
    }

    /// Write `value` at `path`, creating intermediate objects as needed.
    ///
    /// If the existing leaf is a Tuple, only its value slot is replaced;
    /// the label survives.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), PathError> {
        let segments = parse_path(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(PathError::Empty);
        };

        let mut node = &mut self.root;
        let mut walked = String::new();
        for segment in parents {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
            node = descend_or_create(node, segment, &walked)?;
        }

        match node {
            Value::Object(map) => {
                match map.get_mut(last.as_str()) {
                    Some(existing) if is_tuple(existing) => {
                        existing[0] = value;
                    }
                    Some(existing) => *existing = value,
                    None => {
                        map.insert(last.clone(), value);
                    }
                }
                Ok(())
            }
            Value::Array(items) => {
                let index = array_index(last, path, items.len())?;
                let slot = &mut items[index];
                if is_tuple(slot) {
                    slot[0] = value;
                } else {
                    *slot = value;
                }
                Ok(())
            }
            other => Err(PathError::NotAContainer {
                path: canonical_path(&segments[..segments.len() - 1]),
                kind: kind_name(other),
            }),
        }
    }

}

fn descend<'v>(node: &'v Value, segment: &str) -> Option<&'v Value> {
    match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

fn descend_mut<'v>(node: &'v mut Value, segment: &str) -> Option<&'v mut Value> {
    match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => {
            let index = segment.parse::<usize>().ok()?;
            items.get_mut(index)
        }
        _ => None,
    }
}

fn descend_or_create<'v>(
    node: &'v mut Value,
    segment: &str,
    walked: &str,
) -> Result<&'v mut Value, PathError> {
    match node {
        Value::Object(map) => Ok(map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let index = array_index(segment, walked, items.len())?;
            Ok(&mut items[index])
        }
        other => Err(PathError::NotAContainer {
            path: walked.to_string(),
            kind: kind_name(other),
        }),
    }
}

fn array_index(segment: &str, path: &str, len: usize) -> Result<usize, PathError> {
    let index: usize = segment.parse().map_err(|_| PathError::NotAContainer {
        path: path.to_string(),
        kind: "array",
    })?;
    if index >= len {
        return Err(PathError::IndexOutOfBounds {
            path: path.to_string(),
            index,
            len,
        });
    }
    Ok(index)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Numeric coercion for arithmetic ops: numbers pass through, numeric
/// strings parse, everything else is non-numeric.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Build a JSON number, preferring integer representation when exact.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}
