use std::fmt::{self, Write};

use ahash::AHashSet;

use crate::{
    heap::{Heap, HeapData, HeapId},
    resource::{ResourceError, ResourceTracker},
    types::{Dict, DictKey, List, Str, Tuple, str::string_repr_fmt},
    value::{Value, float_repr_fmt},
};

/// A value passed to or returned from the interpreter.
///
/// Owns all its data and can be freely cloned or stored. Unlike the internal
/// `Value` type, `EvalObject` does not need a heap for operations.
///
/// `Repr` is output-only: it stands for values (functions, instances,
/// generators, ...) that have no direct `EvalObject` mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalObject {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Self>),
    Tuple(Vec<Self>),
    /// Insertion-ordered key/value pairs.
    Dict(Vec<(Self, Self)>),
    /// The `repr()` of a value with no structured mapping.
    Repr(String),
}

impl EvalObject {
    /// Converts a runtime value without consuming it.
    pub(crate) fn from_value(value: &Value, heap: &Heap<impl ResourceTracker>) -> Self {
        Self::from_value_inner(value, heap, &mut AHashSet::new())
    }

    fn from_value_inner(value: &Value, heap: &Heap<impl ResourceTracker>, seen: &mut AHashSet<HeapId>) -> Self {
        match value {
            Value::None => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Float(*f),
            Value::Ref(id) => {
                if !seen.insert(*id) {
                    let marker = if matches!(heap.get(*id), HeapData::Dict(_)) { "{...}" } else { "[...]" };
                    return Self::Repr(marker.to_owned());
                }
                let object = match heap.get(*id) {
                    HeapData::Str(s) => Self::String(s.as_str().to_owned()),
                    HeapData::List(list) => Self::List(
                        list.as_slice()
                            .iter()
                            .map(|item| Self::from_value_inner(item, heap, seen))
                            .collect(),
                    ),
                    HeapData::Tuple(tuple) => Self::Tuple(
                        tuple
                            .as_slice()
                            .iter()
                            .map(|item| Self::from_value_inner(item, heap, seen))
                            .collect(),
                    ),
                    HeapData::Dict(dict) => Self::Dict(
                        dict.iter()
                            .map(|(k, v)| (Self::from_value_inner(k, heap, seen), Self::from_value_inner(v, heap, seen)))
                            .collect(),
                    ),
                    _ => Self::Repr(value.py_repr(heap)),
                };
                seen.remove(id);
                object
            }
            other => Self::Repr(other.py_repr(heap)),
        }
    }

    /// Allocates the object on the heap, returning an owned value.
    pub(crate) fn to_value(&self, heap: &mut Heap<impl ResourceTracker>) -> Result<Value, ResourceError> {
        let value = match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(f) => Value::Float(*f),
            Self::String(s) | Self::Repr(s) => Value::Ref(heap.allocate(HeapData::Str(Str::from(s.as_str())))?),
            Self::List(items) => {
                let items = to_values(items, heap)?;
                Value::Ref(heap.allocate(HeapData::List(List::new(items)))?)
            }
            Self::Tuple(items) => {
                let items = to_values(items, heap)?;
                Value::Ref(heap.allocate(HeapData::Tuple(Tuple::new(items)))?)
            }
            Self::Dict(pairs) => {
                let mut dict = Dict::with_capacity(pairs.len());
                if let Err(err) = fill_dict(&mut dict, pairs, heap) {
                    dict.drop_with_heap(heap);
                    return Err(err);
                }
                Value::Ref(heap.allocate(HeapData::Dict(dict))?)
            }
        };
        Ok(value)
    }
}

fn fill_dict(
    dict: &mut Dict,
    pairs: &[(EvalObject, EvalObject)],
    heap: &mut Heap<impl ResourceTracker>,
) -> Result<(), ResourceError> {
    for (key, value) in pairs {
        let key = key.to_value(heap)?;
        let value = match value.to_value(heap) {
            Ok(value) => value,
            Err(err) => {
                key.drop_with_heap(heap);
                return Err(err);
            }
        };
        match DictKey::from_value(&key, heap) {
            Ok(hash_key) => {
                if let Some((unused, old)) = dict.insert(hash_key, key, value) {
                    unused.drop_with_heap(heap);
                    old.drop_with_heap(heap);
                }
            }
            // unhashable keys are skipped
            Err(_) => {
                key.drop_with_heap(heap);
                value.drop_with_heap(heap);
            }
        }
    }
    Ok(())
}

fn to_values(items: &[EvalObject], heap: &mut Heap<impl ResourceTracker>) -> Result<Vec<Value>, ResourceError> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match item.to_value(heap) {
            Ok(value) => values.push(value),
            Err(err) => {
                for value in values {
                    value.drop_with_heap(heap);
                }
                return Err(err);
            }
        }
    }
    Ok(values)
}

impl fmt::Display for EvalObject {
    /// Formats the object the way `repr()` would.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => float_repr_fmt(*v, f),
            Self::String(s) => string_repr_fmt(s, f),
            Self::List(items) => {
                f.write_char('[')?;
                write_items(items, f)?;
                f.write_char(']')
            }
            Self::Tuple(items) => {
                f.write_char('(')?;
                write_items(items, f)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(pairs) => {
                f.write_char('{')?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_char('}')
            }
            Self::Repr(s) => f.write_str(s),
        }
    }
}

fn write_items(items: &[EvalObject], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn nested_values_convert_both_ways() {
        let mut heap = Heap::new(8, NoLimitTracker);
        let object = EvalObject::Dict(vec![(
            EvalObject::String("k".to_owned()),
            EvalObject::Tuple(vec![EvalObject::Int(1), EvalObject::List(vec![EvalObject::Float(2.5)])]),
        )]);
        let value = object.to_value(&mut heap).unwrap();
        assert_eq!(EvalObject::from_value(&value, &heap), object);
        value.drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn display_matches_repr() {
        let object = EvalObject::Tuple(vec![EvalObject::String("a".to_owned())]);
        assert_eq!(object.to_string(), "('a',)");
        assert_eq!(EvalObject::Float(3.0).to_string(), "3.0");
    }

    #[test]
    fn self_containing_list_is_cut() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let id = heap.allocate(HeapData::List(List::default())).unwrap();
        heap.inc_ref(id);
        if let HeapData::List(list) = heap.get_mut(id) {
            list.as_vec_mut().push(Value::Ref(id));
        }
        let value = Value::Ref(id);
        let object = EvalObject::from_value(&value, &heap);
        assert_eq!(object, EvalObject::List(vec![EvalObject::Repr("[...]".to_owned())]));
        // the cycle keeps itself alive
        value.drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 1);
    }
}
