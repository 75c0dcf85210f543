use std::{cmp::Ordering, fmt::Write};

use ahash::AHashSet;

use crate::{
    builtins::Builtins,
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    types::Type,
};

/// Primary value type representing objects at runtime.
///
/// Small immediate values (None, bools, ints, floats, builtins) are stored
/// inline, everything else lives in the heap arena and is referenced via
/// `Ref(HeapId)`. Every `Value` in an operand stack, namespace or container
/// is an owned reference.
///
/// NOTE: `Clone` is intentionally NOT derived. Use `clone_with_heap()` for heap values
/// or `clone_immediate()` for immediate values only. Direct cloning would
/// bypass reference counting and cause memory leaks.
#[derive(Debug)]
pub(crate) enum Value {
    /// An unbound fast-local or cell slot.
    Undefined,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// A builtin function or exception class.
    Builtin(Builtins),

    // Heap-allocated values (stored in arena)
    Ref(HeapId),

    /// Sentinel value indicating this Value was properly cleaned up via `drop_with_heap`.
    /// Only exists when `dec-ref-check` feature is enabled. If a `Ref` variant is dropped
    /// without calling `drop_with_heap`, the Drop impl will panic.
    #[cfg(feature = "dec-ref-check")]
    Dereferenced,
}

/// Drop implementation that panics if a `Ref` variant is dropped without calling `drop_with_heap`.
/// Only enabled when the `dec-ref-check` feature is active.
#[cfg(feature = "dec-ref-check")]
impl Drop for Value {
    fn drop(&mut self) {
        if let Value::Ref(id) = self {
            panic!("Value::Ref({id:?}) dropped without calling drop_with_heap() - this is a reference counting bug");
        }
    }
}

impl Value {
    #[must_use]
    pub fn py_type(&self, heap: &Heap<impl ResourceTracker>) -> Type {
        match self {
            Self::Undefined => Type::Undefined,
            Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Float(_) => Type::Float,
            Self::Builtin(Builtins::Function(_)) => Type::BuiltinFunction,
            Self::Builtin(Builtins::ExcType(_)) => Type::Type,
            Self::Ref(id) => heap.get(*id).py_type(),
            #[cfg(feature = "dec-ref-check")]
            Self::Dereferenced => panic!("Cannot access Dereferenced object"),
        }
    }

    /// Truthiness.
    #[must_use]
    pub fn py_bool(&self, heap: &Heap<impl ResourceTracker>) -> bool {
        match self {
            Self::Undefined | Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Float(f) => *f != 0.0,
            Self::Builtin(_) => true,
            Self::Ref(id) => heap.get(*id).py_bool(),
            #[cfg(feature = "dec-ref-check")]
            Self::Dereferenced => panic!("Cannot access Dereferenced object"),
        }
    }

    #[must_use]
    pub fn py_repr(&self, heap: &Heap<impl ResourceTracker>) -> String {
        let mut out = String::new();
        // writing to a String never fails
        let _ = self.py_repr_fmt(&mut out, heap, &mut AHashSet::new());
        out
    }

    /// `str()` of the value: strings unquoted, exceptions as their message, else `repr()`.
    #[must_use]
    pub fn py_str(&self, heap: &Heap<impl ResourceTracker>) -> String {
        if let Self::Ref(id) = self {
            match heap.get(*id) {
                HeapData::Str(s) => return s.as_str().to_owned(),
                HeapData::Exception(exc) => return exc.py_str(),
                _ => {}
            }
        }
        self.py_repr(heap)
    }

    pub fn py_repr_fmt(
        &self,
        f: &mut impl Write,
        heap: &Heap<impl ResourceTracker>,
        seen: &mut AHashSet<HeapId>,
    ) -> std::fmt::Result {
        match self {
            Self::Undefined => f.write_str("<undefined>"),
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => float_repr_fmt(*v, f),
            Self::Builtin(Builtins::Function(func)) => write!(f, "<built-in function {func}>"),
            Self::Builtin(Builtins::ExcType(exc_type)) => write!(f, "<type '{exc_type}'>"),
            Self::Ref(id) => {
                if !seen.insert(*id) {
                    return f.write_str("[...]");
                }
                let result = heap.get(*id).py_repr_fmt(f, heap, seen);
                seen.remove(id);
                result
            }
            #[cfg(feature = "dec-ref-check")]
            Self::Dereferenced => panic!("Cannot access Dereferenced object"),
        }
    }

    /// Equality (`==`), structural for strings, sequences and dicts, identity otherwise.
    #[must_use]
    pub fn py_eq(&self, other: &Self, heap: &Heap<impl ResourceTracker>) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b || heap.get(*a).py_eq(heap.get(*b), heap),
            _ => match (self.as_number(), other.as_number()) {
                (Some(Number::Int(a)), Some(Number::Int(b))) => a == b,
                (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
                _ => false,
            },
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`; `None` when the operands are unorderable.
    #[must_use]
    pub fn py_cmp(&self, other: &Self, heap: &Heap<impl ResourceTracker>) -> Option<Ordering> {
        match (self.as_number(), other.as_number()) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => Some(a.cmp(&b)),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            _ => match (self, other) {
                (Self::Ref(a), Self::Ref(b)) => heap.get(*a).py_cmp(heap.get(*b), heap),
                _ => None,
            },
        }
    }

    /// Identity (`is`).
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::Undefined, Self::Undefined) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            _ => false,
        }
    }

    /// Numeric view used by arithmetic and comparisons; bools count as ints.
    #[must_use]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Self::Bool(b) => Some(Number::Int(i64::from(*b))),
            Self::Int(i) => Some(Number::Int(*i)),
            Self::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The contents of a heap string.
    #[must_use]
    pub fn as_str<'h>(&self, heap: &'h Heap<impl ResourceTracker>) -> Option<&'h str> {
        match self {
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Clones a value with proper heap reference counting.
    ///
    /// For immediate values this performs a simple copy. For heap-allocated values this
    /// increments the reference count and returns a new reference to the same heap value.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &mut Heap<impl ResourceTracker>) -> Self {
        match self {
            Self::Ref(id) => {
                heap.inc_ref(*id);
                Self::Ref(*id)
            }
            other => other.clone_immediate(),
        }
    }

    /// Releases a value, decrementing its heap reference count if applicable.
    ///
    /// This method MUST be called before overwriting a slot or discarding a value.
    ///
    /// With `dec-ref-check` enabled, `Ref` variants are replaced with `Dereferenced` and
    /// the original is forgotten to prevent the Drop impl from panicking.
    #[allow(unused_mut)]
    pub fn drop_with_heap(mut self, heap: &mut Heap<impl ResourceTracker>) {
        #[cfg(feature = "dec-ref-check")]
        {
            let old = std::mem::replace(&mut self, Value::Dereferenced);
            if let Self::Ref(id) = &old {
                heap.dec_ref(*id);
                std::mem::forget(old);
            }
        }
        #[cfg(not(feature = "dec-ref-check"))]
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Copies an immediate value. Panics on `Ref`.
    #[must_use]
    pub fn clone_immediate(&self) -> Self {
        match self {
            Self::Ref(_) => panic!("Ref clones must go through clone_with_heap to maintain refcounts"),
            _ => self.copy_for_extend(),
        }
    }

    /// Creates a shallow copy of this Value without incrementing reference counts.
    ///
    /// IMPORTANT: For `Ref` variants the caller MUST call `heap.inc_ref()` separately.
    /// Used to copy values out of a borrowed heap entry before bumping counts.
    #[must_use]
    pub fn copy_for_extend(&self) -> Self {
        match self {
            Self::Undefined => Self::Undefined,
            Self::None => Self::None,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(v) => Self::Int(*v),
            Self::Float(v) => Self::Float(*v),
            Self::Builtin(b) => Self::Builtin(*b),
            Self::Ref(id) => Self::Ref(*id),
            #[cfg(feature = "dec-ref-check")]
            Self::Dereferenced => panic!("Cannot copy Dereferenced object"),
        }
    }

    /// Pushes the heap id (if any) for a container being freed.
    ///
    /// With `dec-ref-check`, also marks the slot `Dereferenced` so dropping the
    /// container afterwards does not panic.
    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        if let Self::Ref(id) = self {
            stack.push(*id);
            #[cfg(feature = "dec-ref-check")]
            {
                let old = std::mem::replace(self, Self::Dereferenced);
                std::mem::forget(old);
            }
        }
    }
}

/// Numeric operand view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

/// Writes a float the way `repr()` does: always with a fractional part.
pub(crate) fn float_repr_fmt(v: f64, f: &mut impl Write) -> std::fmt::Result {
    if v.is_nan() {
        f.write_str("nan")
    } else if v.is_infinite() {
        f.write_str(if v > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(f, "{v:?}")
    }
}
