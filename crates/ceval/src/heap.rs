use std::{cmp::Ordering, fmt::Write, rc::Rc};

use ahash::AHashSet;

use crate::{
    bytecode::Code,
    exception_private::SimpleException,
    for_iterator::ForIterator,
    resource::{ResourceError, ResourceTracker},
    types::{
        BoundMethod, Class, Dict, Function, Generator, Instance, List, Module, NativeMethod, Str, Traceback, Tuple,
        Type, str::string_repr_fmt,
    },
    value::Value,
};

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// HeapData captures every runtime value that must live in the arena.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(Str),
    List(List),
    Tuple(Tuple),
    Dict(Dict),
    Function(Function),
    BoundMethod(BoundMethod),
    NativeMethod(NativeMethod),
    Class(Class),
    Instance(Instance),
    Module(Module),
    Code(Rc<Code>),
    /// A cell wrapping a single mutable value for closure support.
    ///
    /// Both the defining frame and every closure built over it hold a reference
    /// to the same cell, so stores through `STORE_DEREF` are seen everywhere.
    Cell(Value),
    /// An iterator created by `GET_ITER` and advanced by `FOR_ITER`.
    Iterator(ForIterator),
    Generator(Generator),
    /// An exception instance (e.g., `ValueError('message')`).
    Exception(SimpleException),
    Traceback(Traceback),
}

impl HeapData {
    #[must_use]
    pub fn py_type(&self) -> Type {
        match self {
            Self::Str(_) => Type::Str,
            Self::List(_) => Type::List,
            Self::Tuple(_) => Type::Tuple,
            Self::Dict(_) => Type::Dict,
            Self::Function(_) => Type::Function,
            Self::BoundMethod(_) => Type::BoundMethod,
            Self::NativeMethod(_) => Type::BuiltinFunction,
            Self::Class(_) => Type::Class,
            Self::Instance(_) => Type::Instance,
            Self::Module(_) => Type::Module,
            Self::Code(_) => Type::Code,
            Self::Cell(_) => Type::Cell,
            Self::Iterator(_) => Type::Iterator,
            Self::Generator(_) => Type::Generator,
            Self::Exception(exc) => Type::Exception(exc.exc_type()),
            Self::Traceback(_) => Type::Traceback,
        }
    }

    #[must_use]
    pub fn py_bool(&self) -> bool {
        match self {
            Self::Str(s) => !s.as_str().is_empty(),
            Self::List(l) => l.len() > 0,
            Self::Tuple(t) => t.len() > 0,
            Self::Dict(d) => d.len() > 0,
            _ => true,
        }
    }

    /// `len()`, or `None` for types without a length.
    #[must_use]
    pub fn py_len(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(s.char_len()),
            Self::List(l) => Some(l.len()),
            Self::Tuple(t) => Some(t.len()),
            Self::Dict(d) => Some(d.len()),
            _ => None,
        }
    }

    #[must_use]
    pub fn py_eq(&self, other: &Self, heap: &Heap<impl ResourceTracker>) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => seq_eq(a.as_slice(), b.as_slice(), heap),
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a.as_slice(), b.as_slice(), heap),
            (Self::Dict(a), Self::Dict(b)) => {
                a.len() == b.len()
                    && a.iter_keyed().all(|(key, value)| b.get(key).is_some_and(|other| value.py_eq(other, heap)))
            }
            (Self::Exception(a), Self::Exception(b)) => a == b,
            _ => false,
        }
    }

    #[must_use]
    pub fn py_cmp(&self, other: &Self, heap: &Heap<impl ResourceTracker>) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.as_str().cmp(b.as_str())),
            (Self::List(a), Self::List(b)) => seq_cmp(a.as_slice(), b.as_slice(), heap),
            (Self::Tuple(a), Self::Tuple(b)) => seq_cmp(a.as_slice(), b.as_slice(), heap),
            _ => None,
        }
    }

    pub fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        seen: &mut AHashSet<HeapId>,
    ) -> std::fmt::Result {
        match self {
            Self::Str(s) => string_repr_fmt(s.as_str(), f),
            Self::List(list) => {
                f.write_char('[')?;
                seq_repr_fmt(list.as_slice(), f, heap, seen)?;
                f.write_char(']')
            }
            Self::Tuple(tuple) => {
                f.write_char('(')?;
                seq_repr_fmt(tuple.as_slice(), f, heap, seen)?;
                if tuple.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(dict) => {
                f.write_char('{')?;
                for (i, (key, value)) in dict.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    key.py_repr_fmt(f, heap, seen)?;
                    f.write_str(": ")?;
                    value.py_repr_fmt(f, heap, seen)?;
                }
                f.write_char('}')
            }
            Self::Function(func) => write!(f, "<function {}>", func.name()),
            Self::BoundMethod(method) => {
                f.write_str("<bound method ")?;
                method.function.py_repr_fmt(f, heap, seen)?;
                f.write_char('>')
            }
            Self::NativeMethod(method) => {
                let type_ = method.receiver.py_type(heap);
                write!(f, "<built-in method {} of {type_} object>", method.kind)
            }
            Self::Class(class) => write!(f, "<class {}>", class.name),
            Self::Instance(instance) => match heap.get(instance.class) {
                Self::Class(class) => write!(f, "<{} instance>", class.name),
                _ => f.write_str("<instance>"),
            },
            Self::Module(module) => write!(f, "<module '{}'>", module.name),
            Self::Code(code) => write!(f, "<code object {}>", code.name()),
            Self::Cell(_) => f.write_str("<cell>"),
            Self::Iterator(_) => f.write_str("<iterator object>"),
            Self::Generator(generator) => write!(f, "<generator object {}>", generator.name),
            Self::Exception(exc) => exc.py_repr_fmt(f),
            Self::Traceback(_) => f.write_str("<traceback object>"),
        }
    }

    /// Pushes every heap id this entry references onto `stack`.
    ///
    /// Called when the entry is freed so children can be released.
    pub fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        match self {
            Self::List(list) => list.dec_ref_ids(stack),
            Self::Tuple(tuple) => tuple.dec_ref_ids(stack),
            Self::Dict(dict) => dict.dec_ref_ids(stack),
            Self::Function(func) => func.dec_ref_ids(stack),
            Self::BoundMethod(method) => method.dec_ref_ids(stack),
            Self::NativeMethod(method) => method.dec_ref_ids(stack),
            Self::Class(class) => class.dec_ref_ids(stack),
            Self::Instance(instance) => instance.dec_ref_ids(stack),
            Self::Module(module) => module.dec_ref_ids(stack),
            Self::Cell(value) => value.dec_ref_ids(stack),
            Self::Iterator(iter) => iter.dec_ref_ids(stack),
            Self::Generator(generator) => generator.dec_ref_ids(stack),
            Self::Str(_) | Self::Code(_) | Self::Exception(_) | Self::Traceback(_) => {}
        }
    }

    /// Rough byte size, reported to the resource tracker.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        let base = std::mem::size_of::<Self>();
        base + match self {
            Self::Str(s) => s.as_str().len(),
            Self::List(l) => l.len() * std::mem::size_of::<Value>(),
            Self::Tuple(t) => t.len() * std::mem::size_of::<Value>(),
            Self::Dict(d) => d.len() * 3 * std::mem::size_of::<Value>(),
            _ => 0,
        }
    }
}

fn seq_eq(a: &[Value], b: &[Value], heap: &Heap<impl ResourceTracker>) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y, heap))
}

fn seq_cmp(a: &[Value], b: &[Value], heap: &Heap<impl ResourceTracker>) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y, heap) {
            return x.py_cmp(y, heap);
        }
    }
    Some(a.len().cmp(&b.len()))
}

fn seq_repr_fmt(
    items: &[Value],
    f: &mut impl Write,
    heap: &Heap<impl ResourceTracker>,
    seen: &mut AHashSet<HeapId>,
) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.py_repr_fmt(f, heap, seen)?;
    }
    Ok(())
}

/// A heap slot: refcount plus payload.
///
/// The `data` field is an Option to support temporary borrowing: `with_entry_mut`
/// `.take()`s the data out (leaving `None`), passes `&mut Heap` to the closure,
/// then restores it. This avoids unsafe code while keeping `refcount` accessible
/// for `inc_ref`/`dec_ref` during the borrow.
#[derive(Debug)]
struct HeapValue {
    refcount: usize,
    data: Option<HeapData>,
}

/// Reference-counted arena that backs all heap-only runtime values.
///
/// Uses a free list to reuse slots from freed values, keeping memory usage
/// constant for long-running loops that repeatedly allocate and free values.
///
/// Generic over `T: ResourceTracker` to support different resource tracking strategies.
/// When `T = NoLimitTracker` (the default), all resource checks compile away to no-ops.
///
/// There is no cycle collector: a reference cycle keeps its members alive
/// until the heap itself is dropped.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapValue>>,
    /// IDs of freed slots available for reuse. Populated by `dec_ref`, consumed by `allocate`.
    free_list: Vec<HeapId>,
    tracker: T,
}

macro_rules! take_data {
    ($self:ident, $id:expr, $func_name:literal) => {
        $self
            .entries
            .get_mut($id.index())
            .expect(concat!("Heap::", $func_name, ": slot missing"))
            .as_mut()
            .expect(concat!("Heap::", $func_name, ": object already freed"))
            .data
            .take()
            .expect(concat!("Heap::", $func_name, ": data already borrowed"))
    };
}

macro_rules! restore_data {
    ($self:ident, $id:expr, $new_data:expr, $func_name:literal) => {{
        let entry = $self
            .entries
            .get_mut($id.index())
            .expect(concat!("Heap::", $func_name, ": slot missing"))
            .as_mut()
            .expect(concat!("Heap::", $func_name, ": object already freed"));
        entry.data = Some($new_data);
    }};
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(capacity: usize, tracker: T) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            tracker,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Allocates a new heap entry with a refcount of one.
    ///
    /// Returns `Err(ResourceError)` if allocation would exceed configured limits,
    /// in which case the references `data` held are released.
    pub fn allocate(&mut self, mut data: HeapData) -> Result<HeapId, ResourceError> {
        if let Err(err) = self.tracker.on_allocate(|| data.estimate_size()) {
            let mut child_ids = Vec::new();
            data.py_dec_ref_ids(&mut child_ids);
            drop(data);
            for child_id in child_ids {
                self.dec_ref(child_id);
            }
            return Err(err);
        }
        let new_entry = HeapValue {
            refcount: 1,
            data: Some(data),
        };
        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(new_entry);
            id
        } else {
            let id = self.entries.len();
            self.entries.push(Some(new_entry));
            HeapId(id)
        };
        Ok(id)
    }

    /// Increments the reference count for an existing heap entry.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn inc_ref(&mut self, id: HeapId) {
        let value = self
            .entries
            .get_mut(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_mut()
            .expect("Heap::inc_ref: object already freed");
        value.refcount += 1;
    }

    /// Decrements the reference count and frees the value (plus children) once it hits zero.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn dec_ref(&mut self, id: HeapId) {
        let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
        let entry = slot.as_mut().expect("Heap::dec_ref: object already freed");
        if entry.refcount > 1 {
            entry.refcount -= 1;
        } else if let Some(value) = slot.take() {
            self.free_list.push(id);
            if let Some(mut data) = value.data {
                self.tracker.on_free(|| data.estimate_size());
                let mut child_ids = Vec::new();
                data.py_dec_ref_ids(&mut child_ids);
                drop(data);
                for child_id in child_ids {
                    self.dec_ref(child_id);
                }
            }
        }
    }

    /// Returns an immutable reference to the heap data stored at the given ID.
    ///
    /// # Panics
    /// Panics if the value ID is invalid, the value has already been freed,
    /// or the data is currently borrowed via `with_entry_mut`.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: object already freed")
            .data
            .as_ref()
            .expect("Heap::get: data currently borrowed")
    }

    /// Returns a mutable reference to the heap data stored at the given ID.
    ///
    /// # Panics
    /// Same conditions as [`Heap::get`].
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: object already freed")
            .data
            .as_mut()
            .expect("Heap::get_mut: data currently borrowed")
    }

    /// Gives mutable access to a heap entry while allowing reentrant heap usage
    /// inside the closure (e.g. to read other values or allocate results).
    ///
    /// The data is temporarily taken from the heap entry and restored after the
    /// closure completes.
    pub fn with_entry_mut<F, R>(&mut self, id: HeapId, f: F) -> R
    where
        F: FnOnce(&mut Self, &mut HeapData) -> R,
    {
        let mut data = take_data!(self, id, "with_entry_mut");
        let result = f(self, &mut data);
        restore_data!(self, id, data, "with_entry_mut");
        result
    }

    /// Turns borrowed copies (from `copy_for_extend`) into owned references.
    pub fn retain_all(&mut self, values: &[Value]) {
        for value in values {
            if let Value::Ref(id) = value {
                self.inc_ref(*id);
            }
        }
    }

    /// Gets the value inside a cell as a new reference.
    ///
    /// # Panics
    /// Panics if the entry is not a Cell.
    pub fn get_cell_value(&mut self, id: HeapId) -> Value {
        let value = match self.get(id) {
            HeapData::Cell(v) => v.copy_for_extend(),
            _ => panic!("Heap::get_cell_value: entry is not a Cell"),
        };
        if let Some(inner) = value.ref_id() {
            self.inc_ref(inner);
        }
        value
    }

    /// Sets the value inside a cell, releasing the old value.
    ///
    /// # Panics
    /// Panics if the entry is not a Cell.
    pub fn set_cell_value(&mut self, id: HeapId, value: Value) {
        let old = match self.get_mut(id) {
            HeapData::Cell(slot) => std::mem::replace(slot, value),
            _ => panic!("Heap::set_cell_value: entry is not a Cell"),
        };
        old.drop_with_heap(self);
    }

    /// Number of live (non-freed) heap entries.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.len() - self.free_list.len()
    }

    /// Returns the reference count for the heap entry at the given ID.
    #[must_use]
    #[cfg(feature = "ref-count-return")]
    pub fn get_refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .expect("Heap::get_refcount: slot missing")
            .as_ref()
            .expect("Heap::get_refcount: object already freed")
            .refcount
    }
}

/// Marks all contained values as dereferenced before the arena goes away, so
/// leftover cycles don't trip the `dec-ref-check` panic.
#[cfg(feature = "dec-ref-check")]
impl<T: ResourceTracker> Drop for Heap<T> {
    fn drop(&mut self) {
        let mut dummy_stack = Vec::new();
        for value in self.entries.iter_mut().flatten() {
            if let Some(data) = &mut value.data {
                data.py_dec_ref_ids(&mut dummy_stack);
            }
        }
    }
}
