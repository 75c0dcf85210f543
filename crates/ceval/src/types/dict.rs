use indexmap::IndexMap;

use crate::{
    builtins::Builtins,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    resource::{ResourceError, ResourceTracker},
    types::Str,
    value::Value,
};

/// Hashable projection of a value, used as the dict index.
///
/// Numbers that compare equal hash equal (`1`, `1.0` and `True` are one key),
/// strings and tuples hash by content, and callables, classes, instances and
/// modules hash by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DictKey {
    None,
    Int(i64),
    Float(u64),
    Str(String),
    Tuple(Vec<DictKey>),
    Builtin(Builtins),
    Identity(HeapId),
}

impl DictKey {
    /// Computes the key for `value`, raising `TypeError` for unhashable types.
    pub fn from_value(value: &Value, heap: &Heap<impl ResourceTracker>) -> RunResult<Self> {
        match value {
            Value::None => Ok(Self::None),
            Value::Bool(b) => Ok(Self::Int(i64::from(*b))),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Ok(Self::Int(*f as i64))
                } else {
                    Ok(Self::Float(f.to_bits()))
                }
            }
            Value::Builtin(b) => Ok(Self::Builtin(*b)),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Ok(Self::Str(s.as_str().to_owned())),
                HeapData::Tuple(t) => t
                    .as_slice()
                    .iter()
                    .map(|item| Self::from_value(item, heap))
                    .collect::<RunResult<Vec<_>>>()
                    .map(Self::Tuple),
                HeapData::List(_) | HeapData::Dict(_) => Err(ExcType::type_error_unhashable(value.py_type(heap))),
                _ => Ok(Self::Identity(*id)),
            },
            other => Err(ExcType::type_error_unhashable(other.py_type(heap))),
        }
    }

    #[must_use]
    pub fn str(name: &str) -> Self {
        Self::Str(name.to_owned())
    }
}

/// Insertion-ordered mapping stored on the heap; also the storage for every
/// namespace (globals, builtins, class and instance attributes, module attributes).
///
/// Each entry keeps the original key value next to its value so `keys()` and
/// iteration hand back the objects that were stored.
#[derive(Debug, Default)]
pub(crate) struct Dict {
    entries: IndexMap<DictKey, (Value, Value)>,
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        self.entries.get(key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&Value> {
        self.get(&DictKey::str(name))
    }

    #[must_use]
    pub fn contains(&self, key: &DictKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts `value` under `key`.
    ///
    /// An existing entry keeps its original key object; the displaced pair
    /// (the unused new key and the old value) is returned for the caller to release.
    #[must_use]
    pub fn insert(&mut self, hash_key: DictKey, key: Value, value: Value) -> Option<(Value, Value)> {
        match self.entries.get_mut(&hash_key) {
            Some((_, slot)) => {
                let old = std::mem::replace(slot, value);
                Some((key, old))
            }
            None => {
                self.entries.insert(hash_key, (key, value));
                None
            }
        }
    }

    #[must_use]
    pub fn remove(&mut self, key: &DictKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(key)
    }

    /// The stored key object at insertion position `index`.
    #[must_use]
    pub fn key_at(&self, index: usize) -> Option<&Value> {
        self.entries.get_index(index).map(|(_, (k, _))| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(k, v)| (k, v))
    }

    /// Iterates over `(hash key, value)`, convenient for string-keyed namespaces.
    pub fn iter_keyed(&self) -> impl Iterator<Item = (&DictKey, &Value)> {
        self.entries.iter().map(|(hash_key, (_, v))| (hash_key, v))
    }

    /// Copies the dict, bumping refcounts on every key and value.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &mut Heap<impl ResourceTracker>) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(hash_key, (k, v))| (hash_key.clone(), (k.clone_with_heap(heap), v.clone_with_heap(heap))))
            .collect();
        Self { entries }
    }

    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        for (_, (k, v)) in self.entries {
            k.drop_with_heap(heap);
            v.drop_with_heap(heap);
        }
    }

    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        for (k, v) in self.entries.values_mut() {
            k.dec_ref_ids(stack);
            v.dec_ref_ids(stack);
        }
    }
}

/// Stores `value` under `key` in the heap dict `dict_id`.
///
/// Both values are consumed, also on error.
pub(crate) fn dict_set(
    heap: &mut Heap<impl ResourceTracker>,
    dict_id: HeapId,
    key: Value,
    value: Value,
) -> RunResult<()> {
    let hash_key = match DictKey::from_value(&key, heap) {
        Ok(hash_key) => hash_key,
        Err(err) => {
            key.drop_with_heap(heap);
            value.drop_with_heap(heap);
            return Err(err);
        }
    };
    let displaced = heap.with_entry_mut(dict_id, |_, data| match data {
        HeapData::Dict(dict) => Ok(dict.insert(hash_key, key, value)),
        _ => Err((key, value)),
    });
    match displaced {
        Ok(Some((unused_key, old))) => {
            unused_key.drop_with_heap(heap);
            old.drop_with_heap(heap);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err((key, value)) => {
            key.drop_with_heap(heap);
            value.drop_with_heap(heap);
            Err(crate::exception_private::RunError::internal("dict_set: target is not a dict"))
        }
    }
}

/// Stores `value` under a string key, allocating the key.
pub(crate) fn dict_set_str(
    heap: &mut Heap<impl ResourceTracker>,
    dict_id: HeapId,
    name: &str,
    value: Value,
) -> RunResult<()> {
    let key = match allocate_str(heap, name) {
        Ok(key) => key,
        Err(err) => {
            value.drop_with_heap(heap);
            return Err(err.into());
        }
    };
    dict_set(heap, dict_id, key, value)
}

/// Looks up a string key, returning a new reference.
#[must_use]
pub(crate) fn dict_get_str(heap: &mut Heap<impl ResourceTracker>, dict_id: HeapId, name: &str) -> Option<Value> {
    let found = match heap.get(dict_id) {
        HeapData::Dict(dict) => dict.get_str(name).map(Value::copy_for_extend),
        _ => None,
    };
    found.map(|value| {
        if let Some(id) = value.ref_id() {
            heap.inc_ref(id);
        }
        value
    })
}

/// Looks up an arbitrary key, returning a new reference.
pub(crate) fn dict_get(heap: &mut Heap<impl ResourceTracker>, dict_id: HeapId, key: &Value) -> RunResult<Option<Value>> {
    let hash_key = DictKey::from_value(key, heap)?;
    let found = match heap.get(dict_id) {
        HeapData::Dict(dict) => dict.get(&hash_key).map(Value::copy_for_extend),
        _ => None,
    };
    Ok(found.map(|value| {
        if let Some(id) = value.ref_id() {
            heap.inc_ref(id);
        }
        value
    }))
}

/// Allocates a string on the heap.
pub(crate) fn allocate_str(heap: &mut Heap<impl ResourceTracker>, s: &str) -> Result<Value, ResourceError> {
    Ok(Value::Ref(heap.allocate(HeapData::Str(Str::from(s)))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn numeric_keys_collapse() {
        let heap = Heap::new(4, NoLimitTracker);
        let one = DictKey::from_value(&Value::Int(1), &heap).unwrap();
        assert_eq!(DictKey::from_value(&Value::Bool(true), &heap).unwrap(), one);
        assert_eq!(DictKey::from_value(&Value::Float(1.0), &heap).unwrap(), one);
        assert_ne!(DictKey::from_value(&Value::Float(1.5), &heap).unwrap(), one);
    }

    #[test]
    fn set_keeps_original_key_and_releases_old_value() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let dict_id = heap.allocate(HeapData::Dict(Dict::new())).unwrap();
        dict_set_str(&mut heap, dict_id, "x", Value::Int(1)).unwrap();
        let old = allocate_str(&mut heap, "old").unwrap();
        dict_set_str(&mut heap, dict_id, "x", old).unwrap();
        let live = heap.live_count();
        dict_set_str(&mut heap, dict_id, "x", Value::Int(3)).unwrap();
        // the "old" string and the unused second key are both gone
        assert_eq!(heap.live_count(), live - 1);
        let value = dict_get_str(&mut heap, dict_id, "x").unwrap();
        assert!(matches!(value, Value::Int(3)));
        let HeapData::Dict(dict) = heap.get(dict_id) else { panic!("not a dict") };
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn lists_are_unhashable() {
        let mut heap = Heap::new(4, NoLimitTracker);
        let list = Value::Ref(heap.allocate(HeapData::List(crate::types::List::default())).unwrap());
        assert!(DictKey::from_value(&list, &heap).is_err());
        list.drop_with_heap(&mut heap);
    }
}
