use crate::{
    exception_private::ExcType,
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    types::Dict,
    value::Value,
};

/// A class built by `BUILD_CLASS`.
#[derive(Debug)]
pub(crate) struct Class {
    pub name: String,
    pub bases: Vec<HeapId>,
    /// The builtin exception class this class derives from, directly or
    /// through one of `bases`. The first base that has one wins.
    pub exc_base: Option<ExcType>,
    pub attrs: Dict,
}

impl Class {
    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.extend(self.bases.iter().copied());
        self.attrs.dec_ref_ids(stack);
    }
}

/// Looks `name` up on a class and its bases, depth first, left to right.
///
/// Returns a borrowed copy; callers bump the refcount if they keep it.
pub(crate) fn class_lookup(heap: &Heap<impl ResourceTracker>, class_id: HeapId, name: &str) -> Option<Value> {
    let HeapData::Class(class) = heap.get(class_id) else {
        return None;
    };
    if let Some(value) = class.attrs.get_str(name) {
        return Some(value.copy_for_extend());
    }
    class.bases.iter().find_map(|base| class_lookup(heap, *base, name))
}

/// Whether `class_id` is `target` or derives from it.
pub(crate) fn class_is_subclass(heap: &Heap<impl ResourceTracker>, class_id: HeapId, target: HeapId) -> bool {
    if class_id == target {
        return true;
    }
    let HeapData::Class(class) = heap.get(class_id) else {
        return false;
    };
    class.bases.iter().any(|base| class_is_subclass(heap, *base, target))
}

/// The builtin exception class `class_id` derives from, if any.
pub(crate) fn class_exc_base(heap: &Heap<impl ResourceTracker>, class_id: HeapId) -> Option<ExcType> {
    match heap.get(class_id) {
        HeapData::Class(class) => class.exc_base,
        _ => None,
    }
}

/// Whether `class_id` derives from the builtin exception class `target`.
pub(crate) fn class_derives_from(heap: &Heap<impl ResourceTracker>, class_id: HeapId, target: ExcType) -> bool {
    class_exc_base(heap, class_id).is_some_and(|base| base.is_subclass_of(target))
}

/// An instance of a [`Class`].
#[derive(Debug)]
pub(crate) struct Instance {
    pub class: HeapId,
    pub attrs: Dict,
}

impl Instance {
    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.push(self.class);
        self.attrs.dec_ref_ids(stack);
    }

    /// The message an exception instance reports: its single argument, the
    /// whole `args` tuple when there are several, or `None` when empty.
    pub fn args_message(&self, heap: &Heap<impl ResourceTracker>) -> Option<String> {
        let args = self.attrs.get_str("args")?;
        match args.ref_id().map(|id| heap.get(id)) {
            Some(HeapData::Tuple(tuple)) => match tuple.as_slice() {
                [] => None,
                [only] => Some(only.py_str(heap)),
                _ => Some(args.py_str(heap)),
            },
            _ => Some(args.py_str(heap)),
        }
    }
}

/// A function bound to a receiver, produced by attribute lookup on an instance.
///
/// The call binder unpacks it before any argument counting: the receiver is
/// prepended to the positional arguments and `function` becomes the callee.
#[derive(Debug)]
pub(crate) struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}

impl BoundMethod {
    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.receiver.dec_ref_ids(stack);
        self.function.dec_ref_ids(stack);
    }
}
