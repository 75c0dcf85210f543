//! Heap-resident object types.
//!
//! These are the minimal object system the dispatch loop drives: enough
//! containers, callables and namespaces to exercise every instruction, not a
//! full language runtime.

pub(crate) mod class;
pub(crate) mod dict;
pub(crate) mod function;
pub(crate) mod generator;
pub(crate) mod list;
pub(crate) mod method;
pub(crate) mod module;
pub(crate) mod str;
pub(crate) mod traceback;
pub(crate) mod tuple;
pub(crate) mod r#type;

pub(crate) use class::{BoundMethod, Class, Instance};
pub(crate) use dict::{Dict, DictKey};
pub(crate) use function::Function;
pub(crate) use generator::{GenState, Generator};
pub(crate) use list::List;
pub(crate) use method::{MethodKind, NativeMethod};
pub(crate) use module::Module;
pub(crate) use str::Str;
pub(crate) use traceback::{Traceback, TracebackEntry};
pub(crate) use tuple::Tuple;
pub(crate) use r#type::Type;
