use crate::{
    heap::{Heap, HeapId},
    resource::ResourceTracker,
    value::Value,
};

/// Immutable sequence stored on the heap.
///
/// Besides being a program-visible value, tuples carry closure cells for
/// `MAKE_CLOSURE` and the bases of `BUILD_CLASS`.
#[derive(Debug, Default)]
pub(crate) struct Tuple(Vec<Value>);

impl Tuple {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(items)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn clone_items(&self, heap: &mut Heap<impl ResourceTracker>) -> Vec<Value> {
        self.0.iter().map(|v| v.clone_with_heap(heap)).collect()
    }

    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        for value in &mut self.0 {
            value.dec_ref_ids(stack);
        }
    }
}
