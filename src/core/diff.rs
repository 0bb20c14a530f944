//! Layer 2: the differ seam and its structural default.
//!
//! The chain treats patches as opaque JSON documents; this module owns the
//! contract (`diff`/`apply`/`unapply`) and ships [`StructuralDiff`], an
//! invertible delta format:
//!
//! - `[old, new]`     replacement
//! - `[new]`          addition
//! - `[old, 0, 0]`    deletion
//! - `{..}`           nested object delta, one member per changed key
//! - `{"_t": "a", ..}` positional array delta; `"3"` edits or inserts at
//!   index 3, `"_3"` removes index 3
//!
//! Array indices are strict (out-of-range is an error, the trigger for the
//! list-member skip policy); object members are lenient on apply.

use serde_json::{json, Map, Value};
use thiserror::Error;

const ARRAY_MARKER: &str = "_t";

/// A patch refused to fit the document it was applied to.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PatchError {
    #[error("array index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("document key `{key}` is missing")]
    MissingKey { key: String },
    #[error("delta does not fit the document shape: {reason}")]
    ShapeMismatch { reason: String },
    #[error("malformed delta: {reason}")]
    Malformed { reason: String },
}

impl PatchError {
    /// The trigger condition for the list-member skip policy.
    pub fn is_index_out_of_range(&self) -> bool {
        matches!(self, PatchError::IndexOutOfRange { .. })
    }
}

/// Value-level structural differ: the chain's only window into patch
/// semantics.
pub trait DiffEngine: Send + Sync {
    /// Structural difference from `left` to `right`; `None` when equal.
    fn diff(&self, left: &Value, right: &Value) -> Option<Value>;

    /// Transforms the earlier state into the later one.
    fn apply(&self, doc: &Value, patch: &Value) -> Result<Value, PatchError>;

    /// Transforms the later state back into the earlier one.
    fn unapply(&self, doc: &Value, patch: &Value) -> Result<Value, PatchError>;
}

/// Default engine producing the delta format documented at module level.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralDiff;

impl DiffEngine for StructuralDiff {
    fn diff(&self, left: &Value, right: &Value) -> Option<Value> {
        diff_value(left, right)
    }

    fn apply(&self, doc: &Value, patch: &Value) -> Result<Value, PatchError> {
        apply_delta(doc, patch)
    }

    fn unapply(&self, doc: &Value, patch: &Value) -> Result<Value, PatchError> {
        unapply_delta(doc, patch)
    }
}

fn diff_value(left: &Value, right: &Value) -> Option<Value> {
    if left == right {
        return None;
    }
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            let mut delta = Map::new();
            for (key, left_member) in l {
                match r.get(key) {
                    Some(right_member) => {
                        if let Some(member) = diff_value(left_member, right_member) {
                            delta.insert(key.clone(), member);
                        }
                    }
                    None => {
                        delta.insert(key.clone(), json!([left_member.clone(), 0, 0]));
                    }
                }
            }
            for (key, right_member) in r {
                if !l.contains_key(key) {
                    delta.insert(key.clone(), json!([right_member.clone()]));
                }
            }
            (!delta.is_empty()).then_some(Value::Object(delta))
        }
        (Value::Array(l), Value::Array(r)) => {
            let mut delta = Map::new();
            delta.insert(ARRAY_MARKER.to_string(), Value::String("a".to_string()));
            let common = l.len().min(r.len());
            for index in 0..common {
                if let Some(member) = diff_value(&l[index], &r[index]) {
                    delta.insert(index.to_string(), member);
                }
            }
            for index in common..l.len() {
                delta.insert(format!("_{index}"), json!([l[index].clone(), 0, 0]));
            }
            for index in common..r.len() {
                delta.insert(index.to_string(), json!([r[index].clone()]));
            }
            (delta.len() > 1).then_some(Value::Object(delta))
        }
        _ => Some(json!([left.clone(), right.clone()])),
    }
}

fn apply_delta(doc: &Value, delta: &Value) -> Result<Value, PatchError> {
    match delta {
        Value::Array(parts) => match parts.len() {
            1 => Ok(parts[0].clone()),
            2 => Ok(parts[1].clone()),
            3 => Err(PatchError::Malformed {
                reason: "deletion marker outside a container".to_string(),
            }),
            len => Err(malformed_tuple(len)),
        },
        Value::Object(map) if is_array_delta(map) => apply_array_delta(doc, map),
        Value::Object(map) => apply_object_delta(doc, map),
        _ => Err(PatchError::Malformed {
            reason: "delta must be a tuple or an object".to_string(),
        }),
    }
}

fn unapply_delta(doc: &Value, delta: &Value) -> Result<Value, PatchError> {
    match delta {
        Value::Array(parts) => match parts.len() {
            1 => Err(PatchError::Malformed {
                reason: "addition marker outside a container".to_string(),
            }),
            2 => Ok(parts[0].clone()),
            3 => Err(PatchError::Malformed {
                reason: "deletion marker outside a container".to_string(),
            }),
            len => Err(malformed_tuple(len)),
        },
        Value::Object(map) if is_array_delta(map) => unapply_array_delta(doc, map),
        Value::Object(map) => unapply_object_delta(doc, map),
        _ => Err(PatchError::Malformed {
            reason: "delta must be a tuple or an object".to_string(),
        }),
    }
}

fn apply_object_delta(doc: &Value, map: &Map<String, Value>) -> Result<Value, PatchError> {
    let Value::Object(obj) = doc else {
        return Err(PatchError::ShapeMismatch {
            reason: "object delta against a non-object document".to_string(),
        });
    };
    let mut out = obj.clone();
    for (key, member) in map {
        match member {
            Value::Array(parts) => match parts.len() {
                1 => {
                    out.insert(key.clone(), parts[0].clone());
                }
                2 => {
                    out.insert(key.clone(), parts[1].clone());
                }
                3 => {
                    out.remove(key);
                }
                len => return Err(malformed_tuple(len)),
            },
            Value::Object(_) => {
                let Some(current) = out.get(key) else {
                    return Err(PatchError::MissingKey { key: key.clone() });
                };
                let next = apply_delta(current, member)?;
                out.insert(key.clone(), next);
            }
            _ => return Err(malformed_member(key)),
        }
    }
    Ok(Value::Object(out))
}

fn unapply_object_delta(doc: &Value, map: &Map<String, Value>) -> Result<Value, PatchError> {
    let Value::Object(obj) = doc else {
        return Err(PatchError::ShapeMismatch {
            reason: "object delta against a non-object document".to_string(),
        });
    };
    let mut out = obj.clone();
    for (key, member) in map {
        match member {
            Value::Array(parts) => match parts.len() {
                1 => {
                    out.remove(key);
                }
                2 | 3 => {
                    out.insert(key.clone(), parts[0].clone());
                }
                len => return Err(malformed_tuple(len)),
            },
            Value::Object(_) => {
                let Some(current) = out.get(key) else {
                    return Err(PatchError::MissingKey { key: key.clone() });
                };
                let next = unapply_delta(current, member)?;
                out.insert(key.clone(), next);
            }
            _ => return Err(malformed_member(key)),
        }
    }
    Ok(Value::Object(out))
}

fn apply_array_delta(doc: &Value, map: &Map<String, Value>) -> Result<Value, PatchError> {
    let mut out = array_document(doc)?;
    let (removals, insertions, edits) = split_array_delta(map)?;

    // Removals run highest-first so lower indices stay valid.
    for (index, _) in removals.iter().rev() {
        if *index >= out.len() {
            return Err(PatchError::IndexOutOfRange {
                index: *index,
                len: out.len(),
            });
        }
        out.remove(*index);
    }
    for (index, value) in insertions {
        if index > out.len() {
            return Err(PatchError::IndexOutOfRange {
                index,
                len: out.len(),
            });
        }
        out.insert(index, value.clone());
    }
    for (index, member) in edits {
        if index >= out.len() {
            return Err(PatchError::IndexOutOfRange {
                index,
                len: out.len(),
            });
        }
        let next = apply_delta(&out[index], member)?;
        out[index] = next;
    }
    Ok(Value::Array(out))
}

fn unapply_array_delta(doc: &Value, map: &Map<String, Value>) -> Result<Value, PatchError> {
    let mut out = array_document(doc)?;
    let (removals, insertions, edits) = split_array_delta(map)?;

    // Exact inverse order of apply: edits, then insertions, then removals.
    for (index, member) in edits {
        if index >= out.len() {
            return Err(PatchError::IndexOutOfRange {
                index,
                len: out.len(),
            });
        }
        let next = unapply_delta(&out[index], member)?;
        out[index] = next;
    }
    for (index, _) in insertions.iter().rev() {
        if *index >= out.len() {
            return Err(PatchError::IndexOutOfRange {
                index: *index,
                len: out.len(),
            });
        }
        out.remove(*index);
    }
    for (index, old) in removals {
        if index > out.len() {
            return Err(PatchError::IndexOutOfRange {
                index,
                len: out.len(),
            });
        }
        out.insert(index, old.clone());
    }
    Ok(Value::Array(out))
}

fn is_array_delta(map: &Map<String, Value>) -> bool {
    matches!(map.get(ARRAY_MARKER), Some(Value::String(tag)) if tag == "a")
}

fn array_document(doc: &Value) -> Result<Vec<Value>, PatchError> {
    match doc {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(PatchError::ShapeMismatch {
            reason: "array delta against a non-array document".to_string(),
        }),
    }
}

type ArrayDeltaParts<'a> = (
    Vec<(usize, &'a Value)>,
    Vec<(usize, &'a Value)>,
    Vec<(usize, &'a Value)>,
);

/// Splits an array delta into (removals with old values, insertions with
/// new values, in-place edits), each sorted by ascending index.
fn split_array_delta(map: &Map<String, Value>) -> Result<ArrayDeltaParts<'_>, PatchError> {
    let mut removals = Vec::new();
    let mut insertions = Vec::new();
    let mut edits = Vec::new();
    for (key, member) in map {
        if key == ARRAY_MARKER {
            continue;
        }
        if let Some(raw) = key.strip_prefix('_') {
            let index = parse_index(raw)?;
            let Value::Array(parts) = member else {
                return Err(malformed_member(key));
            };
            if parts.len() != 3 {
                return Err(malformed_tuple(parts.len()));
            }
            removals.push((index, &parts[0]));
            continue;
        }
        let index = parse_index(key)?;
        match member {
            Value::Array(parts) if parts.len() == 1 => insertions.push((index, &parts[0])),
            Value::Array(parts) if parts.len() == 2 => edits.push((index, member)),
            Value::Array(parts) => return Err(malformed_tuple(parts.len())),
            Value::Object(_) => edits.push((index, member)),
            _ => return Err(malformed_member(key)),
        }
    }
    removals.sort_unstable_by_key(|(index, _)| *index);
    insertions.sort_unstable_by_key(|(index, _)| *index);
    edits.sort_unstable_by_key(|(index, _)| *index);
    Ok((removals, insertions, edits))
}

fn parse_index(raw: &str) -> Result<usize, PatchError> {
    raw.parse().map_err(|_| PatchError::Malformed {
        reason: format!("array delta key `{raw}` is not an index"),
    })
}

fn malformed_tuple(len: usize) -> PatchError {
    PatchError::Malformed {
        reason: format!("delta tuple of length {len}"),
    }
}

fn malformed_member(key: &str) -> PatchError {
    PatchError::Malformed {
        reason: format!("delta member `{key}` is neither a tuple nor a nested delta"),
    }
}
