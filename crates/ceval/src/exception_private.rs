use std::{
    borrow::Cow,
    fmt::{self, Write},
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    heap::{Heap, HeapData},
    resource::ResourceTracker,
    types::{Type, class::class_exc_base, str::string_repr_fmt},
    value::Value,
};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Builtin exception classes.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError").
/// The hierarchy is the classic one, with `StandardError` between `Exception` and most
/// concrete error classes, see [`ExcType::parent`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
pub enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    /// Raised inside a generator when it is closed.
    GeneratorExit,
    Exception,
    /// Signals iterator exhaustion; never escapes a `for` loop.
    StopIteration,
    StandardError,

    // --- ArithmeticError hierarchy ---
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,

    AssertionError,
    AttributeError,
    ImportError,

    // --- LookupError hierarchy ---
    LookupError,
    IndexError,
    KeyError,

    MemoryError,

    // --- NameError hierarchy ---
    NameError,
    /// Subclass of NameError - for reading a fast local before assignment.
    UnboundLocalError,

    // --- RuntimeError hierarchy ---
    RuntimeError,
    NotImplementedError,

    /// Interpreter-level inconsistency visible to the program, e.g. missing locals.
    SystemError,
    TimeoutError,
    TypeError,
    ValueError,

    // --- Warning hierarchy ---
    Warning,
    DeprecationWarning,
}

impl ExcType {
    /// The direct base class, `None` only for `BaseException`.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        let parent = match self {
            Self::BaseException => return None,
            Self::SystemExit | Self::KeyboardInterrupt | Self::GeneratorExit | Self::Exception => Self::BaseException,
            Self::StopIteration | Self::StandardError | Self::Warning => Self::Exception,
            Self::ArithmeticError
            | Self::AssertionError
            | Self::AttributeError
            | Self::ImportError
            | Self::LookupError
            | Self::MemoryError
            | Self::NameError
            | Self::RuntimeError
            | Self::SystemError
            | Self::TimeoutError
            | Self::TypeError
            | Self::ValueError => Self::StandardError,
            Self::OverflowError | Self::ZeroDivisionError => Self::ArithmeticError,
            Self::IndexError | Self::KeyError => Self::LookupError,
            Self::UnboundLocalError => Self::NameError,
            Self::NotImplementedError => Self::RuntimeError,
            Self::DeprecationWarning => Self::Warning,
        };
        Some(parent)
    }

    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        let mut current = Some(self);
        while let Some(exc_type) = current {
            if exc_type == handler_type {
                return true;
            }
            current = exc_type.parent();
        }
        false
    }

    #[must_use]
    pub(crate) fn type_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::TypeError, msg).into()
    }

    #[must_use]
    pub(crate) fn system_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::SystemError, msg).into()
    }

    #[must_use]
    pub(crate) fn import_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::ImportError, msg).into()
    }

    #[must_use]
    pub(crate) fn value_error(msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(Self::ValueError, msg).into()
    }

    /// `NameError: name 'x' is not defined`
    #[must_use]
    pub(crate) fn name_error(name: &str) -> RunError {
        SimpleException::new_msg(Self::NameError, format!("name '{name}' is not defined")).into()
    }

    /// `NameError: global name 'x' is not defined`
    #[must_use]
    pub(crate) fn global_name_error(name: &str) -> RunError {
        SimpleException::new_msg(Self::NameError, format!("global name '{name}' is not defined")).into()
    }

    #[must_use]
    pub(crate) fn unbound_local_error(name: &str) -> RunError {
        SimpleException::new_msg(
            Self::UnboundLocalError,
            format!("local variable '{name}' referenced before assignment"),
        )
        .into()
    }

    #[must_use]
    pub(crate) fn unbound_free_error(name: &str) -> RunError {
        SimpleException::new_msg(
            Self::NameError,
            format!("free variable '{name}' referenced before assignment in enclosing scope"),
        )
        .into()
    }

    #[must_use]
    pub(crate) fn attribute_error(type_: Type, attr: &str) -> RunError {
        SimpleException::new_msg(Self::AttributeError, format!("'{type_}' object has no attribute '{attr}'")).into()
    }

    #[must_use]
    pub(crate) fn attribute_error_msg(msg: String) -> RunError {
        SimpleException::new_msg(Self::AttributeError, msg).into()
    }

    #[must_use]
    pub(crate) fn type_error_not_callable(type_: Type) -> RunError {
        Self::type_error(format!("'{type_}' object is not callable"))
    }

    #[must_use]
    pub(crate) fn type_error_not_iterable(type_: Type) -> RunError {
        Self::type_error(format!("'{type_}' object is not iterable"))
    }

    #[must_use]
    pub(crate) fn type_error_unhashable(type_: Type) -> RunError {
        Self::type_error(format!("unhashable type: '{type_}'"))
    }

    #[must_use]
    pub(crate) fn type_error_not_subscriptable(type_: Type) -> RunError {
        Self::type_error(format!("'{type_}' object is not subscriptable"))
    }

    #[must_use]
    pub(crate) fn type_error_unsupported_operand(op: &str, left: Type, right: Type) -> RunError {
        Self::type_error(format!("unsupported operand type(s) for {op}: '{left}' and '{right}'"))
    }

    /// `f() takes no arguments (2 given)`, used for the no-argument calling convention.
    #[must_use]
    pub(crate) fn type_error_no_args(name: &str, given: usize) -> RunError {
        Self::type_error(format!("{name}() takes no arguments ({given} given)"))
    }

    /// `f() takes exactly one argument (2 given)`, used for the one-argument calling convention.
    #[must_use]
    pub(crate) fn type_error_one_arg(name: &str, given: usize) -> RunError {
        Self::type_error(format!("{name}() takes exactly one argument ({given} given)"))
    }

    /// Arity error for user functions and range-checked natives.
    ///
    /// `qualifier` is one of `exactly`, `at least` or `at most`.
    #[must_use]
    pub(crate) fn type_error_arg_count(name: &str, qualifier: &str, expected: usize, given: usize) -> RunError {
        let plural = if expected == 1 { "" } else { "s" };
        Self::type_error(format!(
            "{name}() takes {qualifier} {expected} argument{plural} ({given} given)"
        ))
    }

    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        Self::type_error(format!("{name}() takes no keyword arguments"))
    }

    /// `f() got multiple values for keyword argument 'x'`
    ///
    /// `callee` is already formatted as name plus description, e.g. `f()`.
    #[must_use]
    pub(crate) fn type_error_multiple_values(callee: &str, key: &str) -> RunError {
        Self::type_error(format!("{callee} got multiple values for keyword argument '{key}'"))
    }

    #[must_use]
    pub(crate) fn type_error_unexpected_keyword(name: &str, key: &str) -> RunError {
        Self::type_error(format!("{name}() got an unexpected keyword argument '{key}'"))
    }

    #[must_use]
    pub(crate) fn type_error_keywords_not_strings(callee: &str) -> RunError {
        Self::type_error(format!("{callee} keywords must be strings"))
    }

    #[must_use]
    pub(crate) fn type_error_star_args(callee: &str) -> RunError {
        Self::type_error(format!("{callee} argument after * must be a sequence"))
    }

    #[must_use]
    pub(crate) fn type_error_star_kwargs(callee: &str) -> RunError {
        Self::type_error(format!("{callee} argument after ** must be a dictionary"))
    }

    #[must_use]
    pub(crate) fn key_error(key: &Value, heap: &Heap<impl ResourceTracker>) -> RunError {
        SimpleException::new_msg(Self::KeyError, key.py_repr(heap)).into()
    }

    #[must_use]
    pub(crate) fn index_error(msg: &str) -> RunError {
        SimpleException::new_msg(Self::IndexError, msg).into()
    }

    #[must_use]
    pub(crate) fn runtime_error_dict_changed_size() -> RunError {
        SimpleException::new_msg(Self::RuntimeError, "dictionary changed size during iteration").into()
    }

    #[must_use]
    pub(crate) fn zero_division() -> RunError {
        SimpleException::new_msg(Self::ZeroDivisionError, "integer division or modulo by zero").into()
    }

    #[must_use]
    pub(crate) fn overflow(op: &str) -> RunError {
        SimpleException::new_msg(Self::OverflowError, format!("integer {op} overflow")).into()
    }
}

/// Simple lightweight representation of an exception.
///
/// This is what collaborators raise; it becomes a heap-allocated exception
/// instance when it enters the unwind machinery.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub(crate) struct SimpleException {
    exc_type: ExcType,
    arg: Option<String>,
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.py_repr_fmt(f)
    }
}

impl SimpleException {
    /// Creates a new exception with the given type and optional argument message.
    #[must_use]
    pub fn new(exc_type: ExcType, arg: Option<String>) -> Self {
        Self { exc_type, arg }
    }

    /// Creates a new exception with the given type and argument message.
    #[must_use]
    pub fn new_msg(exc_type: ExcType, arg: impl Into<String>) -> Self {
        Self {
            exc_type,
            arg: Some(arg.into()),
        }
    }

    /// Creates a new exception with the given type and no argument message.
    #[must_use]
    pub fn new_none(exc_type: ExcType) -> Self {
        Self { exc_type, arg: None }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }

    /// Returns the exception formatted as `ValueError('message')`.
    pub fn py_repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        let type_str: &'static str = self.exc_type.into();
        write!(f, "{type_str}(")?;
        if let Some(arg) = &self.arg {
            string_repr_fmt(arg, f)?;
        }
        f.write_char(')')
    }

    /// `str()` of the exception: the message, or empty.
    #[must_use]
    pub fn py_str(&self) -> String {
        self.arg.clone().unwrap_or_default()
    }
}

/// An exception in flight or recorded as current: `(type, value, traceback)`.
///
/// `exc_type` is an exception class, a string (legacy string exceptions) or the
/// `None` sentinel; `value` defaults to `None`; `traceback` is `None` until the
/// unwind engine attaches frame context.
#[derive(Debug)]
pub(crate) struct ExcInfo {
    pub exc_type: Value,
    pub value: Value,
    pub traceback: Value,
}

impl ExcInfo {
    /// The "no exception" triple.
    #[must_use]
    pub fn none() -> Self {
        Self {
            exc_type: Value::None,
            value: Value::None,
            traceback: Value::None,
        }
    }

    /// Whether this is the "no exception" triple.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self.exc_type, Value::None)
    }

    #[must_use]
    pub fn clone_with_heap(&self, heap: &mut Heap<impl ResourceTracker>) -> Self {
        Self {
            exc_type: self.exc_type.clone_with_heap(heap),
            value: self.value.clone_with_heap(heap),
            traceback: self.traceback.clone_with_heap(heap),
        }
    }

    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        self.exc_type.drop_with_heap(heap);
        self.value.drop_with_heap(heap);
        self.traceback.drop_with_heap(heap);
    }

    pub fn dec_ref_ids(&mut self, stack: &mut Vec<crate::heap::HeapId>) {
        self.exc_type.dec_ref_ids(stack);
        self.value.dec_ref_ids(stack);
        self.traceback.dec_ref_ids(stack);
    }

    /// The builtin exception class this triple belongs to, if it has one.
    ///
    /// Looks through instances so an unnormalized `(instance, None)` pair
    /// answers the same as a normalized one. A user class answers with the
    /// builtin exception it derives from.
    #[must_use]
    pub fn builtin_type(&self, heap: &Heap<impl ResourceTracker>) -> Option<ExcType> {
        match &self.exc_type {
            Value::Builtin(crate::builtins::Builtins::ExcType(exc_type)) => Some(*exc_type),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Exception(exc) => Some(exc.exc_type()),
                HeapData::Class(class) => class.exc_base,
                HeapData::Instance(instance) => class_exc_base(heap, instance.class),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Runtime error types that can occur during execution.
///
/// Three variants:
/// - `Internal`: a caller-contract violation; never seen by program `except` blocks
/// - `Exc`: a program exception raised by a collaborator, not yet materialized
/// - `Raised`: a materialized exception triple, usually propagating out of a callee frame
#[derive(Debug)]
pub(crate) enum RunError {
    /// Internal interpreter error - malformed bytecode or a broken invariant.
    Internal(Cow<'static, str>),
    /// Catchable exception (e.g., ValueError, TypeError).
    Exc(SimpleException),
    /// Catchable exception that already carries heap values and traceback context.
    Raised(ExcInfo),
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(exc)
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is a program exception of `exc_type` (or a subclass).
    #[must_use]
    pub fn matches(&self, exc_type: ExcType, heap: &Heap<impl ResourceTracker>) -> bool {
        match self {
            Self::Internal(_) => false,
            Self::Exc(exc) => exc.exc_type().is_subclass_of(exc_type),
            Self::Raised(info) => info.builtin_type(heap).is_some_and(|t| t.is_subclass_of(exc_type)),
        }
    }

    /// Releases any heap values held by the error.
    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        if let Self::Raised(info) = self {
            info.drop_with_heap(heap);
        }
    }
}
