//! Structural interpreter for path-addressed patch operations.
//!
//! Operations walk the [`Value`] tree segment by segment; nothing here
//! inspects field meaning. Strictness differs per verb:
//!
//! - `set` needs an existing parent; array slots are replaced, never appended.
//! - `unset` needs an existing target.
//! - `inc` needs an existing numeric target.
//! - `push` creates missing intermediate maps and the target array.
//! - `pull` is a no-op when the target or a matching element is absent.

use vtt_types::{Path, PathSegment, StateOperation, Value, ValueKind, Verb};

use crate::error::OpFailure;

/// Apply one operation to `root` in place.
///
/// On error `root` may be partially modified only for `push` auto-vivification
/// of intermediate maps; callers apply batches to a working copy and discard it
/// on failure.
pub fn apply_operation(root: &mut Value, op: &StateOperation) -> Result<(), OpFailure> {
    let (last, parents) = op.path.split_last().ok_or(OpFailure::EmptyPath)?;
    match op.verb {
        Verb::Set => {
            let value = required_value(op)?;
            let parent = walk_parent(root, parents, false)?;
            set_child(parent, last, value)
        }
        Verb::Unset => {
            if matches!(op.value, Some(ref v) if *v != Value::Null) {
                return Err(OpFailure::UnexpectedValue);
            }
            let parent = walk_parent(root, parents, false)?;
            remove_child(parent, last)
        }
        Verb::Inc => {
            let operand = required_value(op)?;
            let target = lookup_mut(root, op.path.segments())?.ok_or(OpFailure::MissingTarget)?;
            increment(target, &operand)
        }
        Verb::Push => {
            let value = required_value(op)?;
            let parent = walk_parent(root, parents, true)?;
            push_child(parent, last, value)
        }
        Verb::Pull => {
            let needle = required_value(op)?;
            match lookup_mut(root, op.path.segments())? {
                None => Ok(()),
                Some(Value::Array(items)) => {
                    if let Some(pos) = items.iter().position(|item| *item == needle) {
                        items.remove(pos);
                    }
                    Ok(())
                }
                Some(other) => Err(OpFailure::NotArray(other.kind())),
            }
        }
    }
}

fn required_value(op: &StateOperation) -> Result<Value, OpFailure> {
    op.value.clone().ok_or(OpFailure::MissingValue)
}

fn to_index(index: u64, len: usize) -> Result<usize, OpFailure> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or(OpFailure::IndexOutOfBounds { index, len })
}

/// Descend through `parents`, returning the container that holds the final segment.
///
/// With `vivify`, absent map keys along the way are filled with empty maps.
/// Array positions are never created.
fn walk_parent<'a>(
    root: &'a mut Value,
    parents: &[PathSegment],
    vivify: bool,
) -> Result<&'a mut Value, OpFailure> {
    let mut node = root;
    for (depth, segment) in parents.iter().enumerate() {
        node = match node {
            Value::Map(map) => match segment {
                PathSegment::Key(key) if vivify => {
                    map.entry(key.clone()).or_insert_with(Value::empty_map)
                }
                PathSegment::Key(key) => map
                    .get_mut(key)
                    .ok_or_else(|| OpFailure::MissingParent(Path::from(parents[..=depth].to_vec())))?,
                PathSegment::Index(_) => return Err(mismatch(segment, ValueKind::Map)),
            },
            Value::Array(items) => match segment {
                PathSegment::Index(index) => {
                    let pos = to_index(*index, items.len())?;
                    &mut items[pos]
                }
                PathSegment::Key(_) => return Err(mismatch(segment, ValueKind::Array)),
            },
            other => return Err(mismatch(segment, other.kind())),
        };
    }
    Ok(node)
}

/// Resolve a full path, yielding `None` when any step is absent.
///
/// Only container/segment kind mismatches are errors.
fn lookup_mut<'a>(
    root: &'a mut Value,
    segments: &[PathSegment],
) -> Result<Option<&'a mut Value>, OpFailure> {
    let mut node = root;
    for segment in segments {
        node = match node {
            Value::Map(map) => match segment {
                PathSegment::Key(key) => match map.get_mut(key) {
                    Some(child) => child,
                    None => return Ok(None),
                },
                PathSegment::Index(_) => return Err(mismatch(segment, ValueKind::Map)),
            },
            Value::Array(items) => match segment {
                PathSegment::Index(index) => {
                    match usize::try_from(*index).ok().and_then(|i| items.get_mut(i)) {
                        Some(child) => child,
                        None => return Ok(None),
                    }
                }
                PathSegment::Key(_) => return Err(mismatch(segment, ValueKind::Array)),
            },
            other => return Err(mismatch(segment, other.kind())),
        };
    }
    Ok(Some(node))
}

fn set_child(parent: &mut Value, segment: &PathSegment, value: Value) -> Result<(), OpFailure> {
    match (parent, segment) {
        (Value::Map(map), PathSegment::Key(key)) => {
            // IndexMap::insert keeps an existing key in place.
            map.insert(key.clone(), value);
            Ok(())
        }
        (Value::Array(items), PathSegment::Index(index)) => {
            let pos = to_index(*index, items.len())?;
            items[pos] = value;
            Ok(())
        }
        (other, segment) => Err(mismatch(segment, other.kind())),
    }
}

fn remove_child(parent: &mut Value, segment: &PathSegment) -> Result<(), OpFailure> {
    match (parent, segment) {
        (Value::Map(map), PathSegment::Key(key)) => map
            .shift_remove(key)
            .map(|_| ())
            .ok_or(OpFailure::MissingTarget),
        (Value::Array(items), PathSegment::Index(index)) => {
            let pos = to_index(*index, items.len())?;
            items.remove(pos);
            Ok(())
        }
        (other, segment) => Err(mismatch(segment, other.kind())),
    }
}

fn push_child(parent: &mut Value, segment: &PathSegment, value: Value) -> Result<(), OpFailure> {
    let target = match (parent, segment) {
        (Value::Map(map), PathSegment::Key(key)) => map
            .entry(key.clone())
            .or_insert_with(|| Value::Array(Vec::new())),
        (Value::Array(items), PathSegment::Index(index)) => {
            let pos = to_index(*index, items.len())?;
            &mut items[pos]
        }
        (other, segment) => return Err(mismatch(segment, other.kind())),
    };
    match target {
        Value::Array(items) => {
            items.push(value);
            Ok(())
        }
        other => Err(OpFailure::NotArray(other.kind())),
    }
}

fn increment(target: &mut Value, operand: &Value) -> Result<(), OpFailure> {
    if !target.is_number() {
        return Err(OpFailure::NotNumeric(target.kind()));
    }
    let next = match (&*target, operand) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.checked_add(*b).ok_or(OpFailure::Overflow)?),
        (current, operand) => {
            let a = current.as_f64().ok_or(OpFailure::NotNumeric(current.kind()))?;
            let b = operand
                .as_f64()
                .ok_or(OpFailure::OperandNotNumeric(operand.kind()))?;
            Value::number(a + b).map_err(|_| OpFailure::Overflow)?
        }
    };
    *target = next;
    Ok(())
}

fn mismatch(segment: &PathSegment, kind: ValueKind) -> OpFailure {
    OpFailure::SegmentMismatch {
        segment: segment.clone(),
        kind,
    }
}
