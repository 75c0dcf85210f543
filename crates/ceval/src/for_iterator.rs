//! Iterator objects produced by `GET_ITER` and the `iter()` builtin.
//!
//! `ForIterator` stores iteration state (indices) rather than Rust iterators so
//! `for_next()` can take `&mut Heap` for cloning items and allocating strings.
//! Generators are their own iterators and never become a `ForIterator`.

use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    types::Str,
    value::Value,
};

/// Iteration state for a builtin container.
#[derive(Debug)]
pub(crate) struct ForIterator {
    /// Current iteration index, shared across all iterator kinds.
    index: usize,
    iter_value: ForIterValue,
}

#[derive(Debug)]
enum ForIterValue {
    /// Checks the current list length on each step, so appending while
    /// iterating is seen by the loop.
    List { heap_id: HeapId },
    Tuple { heap_id: HeapId, len: usize },
    /// Yields the stored key objects; a size change raises `RuntimeError`.
    DictKeys { heap_id: HeapId, len: usize },
    /// Copies the string so each step can allocate a one-character string.
    Str { string: String, byte_offset: usize },
}

impl ForIterator {
    /// Creates an iterator over `value`, taking ownership of it.
    ///
    /// Hands the value back when it is not iterable.
    pub fn new(value: Value, heap: &mut Heap<impl ResourceTracker>) -> Result<Self, Value> {
        let Value::Ref(heap_id) = value else {
            return Err(value);
        };
        let iter_value = match heap.get(heap_id) {
            HeapData::List(_) => ForIterValue::List { heap_id },
            HeapData::Tuple(tuple) => ForIterValue::Tuple {
                heap_id,
                len: tuple.len(),
            },
            HeapData::Dict(dict) => ForIterValue::DictKeys {
                heap_id,
                len: dict.len(),
            },
            HeapData::Str(s) => {
                let string = s.as_str().to_owned();
                value.drop_with_heap(heap);
                return Ok(Self {
                    index: 0,
                    iter_value: ForIterValue::Str { string, byte_offset: 0 },
                });
            }
            _ => return Err(value),
        };
        // the container reference now lives in `iter_value`
        #[cfg(feature = "dec-ref-check")]
        std::mem::forget(value);
        Ok(Self { index: 0, iter_value })
    }

    /// Returns the next item, or `Ok(None)` once exhausted.
    pub fn for_next(&mut self, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Option<Value>> {
        let item = match &mut self.iter_value {
            ForIterValue::List { heap_id } => {
                let HeapData::List(list) = heap.get(*heap_id) else {
                    unreachable!("ForIterValue::List should only hold list heap IDs")
                };
                match list.as_slice().get(self.index) {
                    Some(item) => item.copy_for_extend(),
                    None => return Ok(None),
                }
            }
            ForIterValue::Tuple { heap_id, len } => {
                if self.index >= *len {
                    return Ok(None);
                }
                let HeapData::Tuple(tuple) = heap.get(*heap_id) else {
                    unreachable!("ForIterValue::Tuple should only hold tuple heap IDs")
                };
                tuple.as_slice()[self.index].copy_for_extend()
            }
            ForIterValue::DictKeys { heap_id, len } => {
                if self.index >= *len {
                    return Ok(None);
                }
                let HeapData::Dict(dict) = heap.get(*heap_id) else {
                    unreachable!("ForIterValue::DictKeys should only hold dict heap IDs")
                };
                if dict.len() != *len {
                    return Err(ExcType::runtime_error_dict_changed_size());
                }
                match dict.key_at(self.index) {
                    Some(key) => key.copy_for_extend(),
                    None => return Ok(None),
                }
            }
            ForIterValue::Str { string, byte_offset } => {
                let Some(c) = string[*byte_offset..].chars().next() else {
                    return Ok(None);
                };
                *byte_offset += c.len_utf8();
                self.index += 1;
                let char_id = heap.allocate(HeapData::Str(Str::new(c.to_string())))?;
                return Ok(Some(Value::Ref(char_id)));
            }
        };
        self.index += 1;
        if let Some(id) = item.ref_id() {
            heap.inc_ref(id);
        }
        Ok(Some(item))
    }

    /// Collects all remaining items. Used by `list()` and `tuple()`.
    pub fn collect(mut self, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            match self.for_next(heap) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => break,
                Err(err) => {
                    for item in items {
                        item.drop_with_heap(heap);
                    }
                    self.drop_with_heap(heap);
                    return Err(err);
                }
            }
        }
        self.drop_with_heap(heap);
        Ok(items)
    }

    /// Releases the container reference held by the iterator.
    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        if let Some(id) = self.source() {
            heap.dec_ref(id);
        }
    }

    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.extend(self.source());
    }

    fn source(&self) -> Option<HeapId> {
        match &self.iter_value {
            ForIterValue::List { heap_id }
            | ForIterValue::Tuple { heap_id, .. }
            | ForIterValue::DictKeys { heap_id, .. } => Some(*heap_id),
            ForIterValue::Str { .. } => None,
        }
    }
}
