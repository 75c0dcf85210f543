//! `RAISE_VARARGS` and the exception-triple validation shared with generator `throw`.

use super::{Frame, VM, signal::Signal};
use crate::{
    args::Kwargs,
    builtins::Builtins,
    exception_private::{ExcInfo, ExcType, RunError, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::class::class_is_subclass,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    /// `RAISE_VARARGS n`: pops `n` of `(type, value, traceback)`, topmost last.
    pub(super) fn raise_varargs(&mut self, frame: &mut Frame, count: u16) -> RunResult<Signal> {
        if count > 3 {
            return Err(RunError::internal(format!("bad RAISE_VARARGS oparg {count}")));
        }
        let traceback = if count >= 3 { frame.pop() } else { Value::None };
        let value = if count >= 2 { frame.pop() } else { Value::None };
        let exc_type = if count >= 1 { Some(frame.pop()) } else { None };
        let (info, reraise) = self.prepare_raise(exc_type, value, traceback)?;
        self.ctx.set_pending(info, &mut self.heap);
        Ok(if reraise { Signal::Reraise } else { Signal::Exception })
    }

    /// Validates and normalizes what a `raise` statement names.
    ///
    /// Without a type, the exception currently being handled is raised again.
    /// Returns the triple and whether it carries a traceback, in which case it
    /// propagates as a re-raise. All arguments are consumed, also on error.
    pub(super) fn prepare_raise(
        &mut self,
        exc_type: Option<Value>,
        value: Value,
        traceback: Value,
    ) -> RunResult<(ExcInfo, bool)> {
        let (mut exc_type, mut value, traceback) = match exc_type {
            Some(exc_type) => (exc_type, value, traceback),
            None => {
                value.drop_with_heap(&mut self.heap);
                traceback.drop_with_heap(&mut self.heap);
                let current = match &self.ctx.current {
                    Some(current) => current.clone_with_heap(&mut self.heap),
                    None => ExcInfo::none(),
                };
                (current.exc_type, current.value, current.traceback)
            }
        };

        let valid_traceback = match &traceback {
            Value::None => true,
            Value::Ref(id) => matches!(self.heap.get(*id), HeapData::Traceback(_)),
            _ => false,
        };
        if !valid_traceback {
            self.release_all([exc_type, value, traceback]);
            return Err(ExcType::type_error("raise: arg 3 must be a traceback or None"));
        }

        while let Some(first) = self.first_tuple_item(&exc_type) {
            exc_type.drop_with_heap(&mut self.heap);
            exc_type = first;
        }

        match self.raise_kind(&exc_type) {
            RaiseKind::String => {
                if let Err(err) = self.ctx.deprecation_warning("raising a string exception is deprecated") {
                    self.release_all([exc_type, value, traceback]);
                    return Err(err);
                }
            }
            RaiseKind::BuiltinClass(base) => {
                let instance_type = match &value {
                    Value::Ref(id) => match self.heap.get(*id) {
                        HeapData::Exception(exc) if exc.exc_type().is_subclass_of(base) => Some(exc.exc_type()),
                        _ => None,
                    },
                    _ => None,
                };
                match instance_type {
                    Some(actual) => exc_type = Value::Builtin(Builtins::ExcType(actual)),
                    None => {
                        let exc = self.new_exception(base, &value);
                        value.drop_with_heap(&mut self.heap);
                        value = self.materialize(exc).value;
                    }
                }
            }
            RaiseKind::UserClass(class_id) => {
                let instance_class = match &value {
                    Value::Ref(id) => match self.heap.get(*id) {
                        HeapData::Instance(instance) if class_is_subclass(&self.heap, instance.class, class_id) => {
                            Some(instance.class)
                        }
                        _ => None,
                    },
                    _ => None,
                };
                match instance_class {
                    Some(actual) => {
                        self.heap.inc_ref(actual);
                        let old = std::mem::replace(&mut exc_type, Value::Ref(actual));
                        old.drop_with_heap(&mut self.heap);
                    }
                    None => {
                        let args = self.constructor_args(value);
                        let class = exc_type.clone_with_heap(&mut self.heap);
                        match self.call_value(class, args, Kwargs::new()) {
                            Ok(instance) => value = instance,
                            Err(err) => {
                                self.release_all([exc_type, traceback]);
                                return Err(err);
                            }
                        }
                    }
                }
            }
            RaiseKind::Instance(class) => {
                if !matches!(value, Value::None) {
                    self.release_all([exc_type, value, traceback]);
                    return Err(ExcType::type_error("instance exception may not have a separate value"));
                }
                value = exc_type;
                exc_type = class;
            }
            RaiseKind::Invalid => {
                let type_name = exc_type.py_type(&self.heap);
                self.release_all([exc_type, value, traceback]);
                return Err(ExcType::type_error(format!(
                    "exceptions must be classes, instances, or strings (deprecated), not {type_name}"
                )));
            }
        }

        let reraise = !matches!(traceback, Value::None);
        Ok((
            ExcInfo {
                exc_type,
                value,
                traceback,
            },
            reraise,
        ))
    }

    /// The exception a builtin class raised with `value` carries.
    pub(super) fn new_exception(&self, exc_type: ExcType, value: &Value) -> SimpleException {
        match value {
            Value::None => SimpleException::new_none(exc_type),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Tuple(tuple) => match tuple.as_slice() {
                    [] => SimpleException::new_none(exc_type),
                    [single] => SimpleException::new_msg(exc_type, single.py_str(&self.heap)),
                    _ => SimpleException::new_msg(exc_type, value.py_repr(&self.heap)),
                },
                _ => SimpleException::new_msg(exc_type, value.py_str(&self.heap)),
            },
            other => SimpleException::new_msg(exc_type, other.py_str(&self.heap)),
        }
    }

    /// Constructor arguments for `raise Class, value`.
    fn constructor_args(&mut self, value: Value) -> Vec<Value> {
        let items = match &value {
            Value::None => Some(Vec::new()),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Tuple(tuple) => Some(tuple.as_slice().iter().map(Value::copy_for_extend).collect()),
                _ => None,
            },
            _ => None,
        };
        match items {
            Some(items) => {
                self.heap.retain_all(&items);
                value.drop_with_heap(&mut self.heap);
                items
            }
            None => vec![value],
        }
    }

    fn first_tuple_item(&mut self, value: &Value) -> Option<Value> {
        let Value::Ref(id) = value else {
            return None;
        };
        let first = match self.heap.get(*id) {
            HeapData::Tuple(tuple) => tuple.as_slice().first()?.copy_for_extend(),
            _ => return None,
        };
        self.heap.retain_all(std::slice::from_ref(&first));
        Some(first)
    }

    fn raise_kind(&mut self, exc_type: &Value) -> RaiseKind {
        match exc_type {
            Value::Builtin(Builtins::ExcType(base)) => RaiseKind::BuiltinClass(*base),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Str(_) => RaiseKind::String,
                HeapData::Class(_) => RaiseKind::UserClass(*id),
                HeapData::Exception(exc) => RaiseKind::Instance(Value::Builtin(Builtins::ExcType(exc.exc_type()))),
                HeapData::Instance(instance) => {
                    let class = instance.class;
                    self.heap.inc_ref(class);
                    RaiseKind::Instance(Value::Ref(class))
                }
                _ => RaiseKind::Invalid,
            },
            _ => RaiseKind::Invalid,
        }
    }
}

/// What the first operand of a `raise` turned out to be.
enum RaiseKind {
    /// A legacy string exception.
    String,
    BuiltinClass(ExcType),
    UserClass(HeapId),
    /// An exception instance; holds an owned reference to its class.
    Instance(Value),
    Invalid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{heap::Heap, io::NoPrint, resource::NoLimitTracker};

    fn vm() -> VM<NoLimitTracker, NoPrint> {
        VM::new(Heap::new(64, NoLimitTracker), NoPrint).unwrap()
    }

    #[test]
    fn bare_raise_without_active_exception_is_a_type_error() {
        let mut vm = vm();
        let err = vm.prepare_raise(None, Value::None, Value::None).unwrap_err();
        let RunError::Exc(exc) = err else { panic!("expected a TypeError") };
        assert_eq!(exc.exc_type(), ExcType::TypeError);
        assert_eq!(
            exc.arg(),
            Some("exceptions must be classes, instances, or strings (deprecated), not NoneType")
        );
    }

    #[test]
    fn class_is_instantiated_with_message() {
        let mut vm = vm();
        let message = vm.new_str("bad").unwrap();
        let (info, reraise) = vm
            .prepare_raise(Some(Value::Builtin(Builtins::ExcType(ExcType::ValueError))), message, Value::None)
            .unwrap();
        assert!(!reraise);
        assert_eq!(info.value.py_str(&vm.heap), "bad");
        assert_eq!(info.builtin_type(&vm.heap), Some(ExcType::ValueError));
        info.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn instance_with_value_is_rejected() {
        let mut vm = vm();
        let instance = vm.materialize(SimpleException::new_none(ExcType::KeyError)).value;
        let err = vm.prepare_raise(Some(instance), Value::Int(1), Value::None).unwrap_err();
        let RunError::Exc(exc) = err else { panic!("expected a TypeError") };
        assert_eq!(exc.arg(), Some("instance exception may not have a separate value"));
    }

    #[test]
    fn bad_traceback_argument() {
        let mut vm = vm();
        let err = vm
            .prepare_raise(Some(Value::Builtin(Builtins::ExcType(ExcType::ValueError))), Value::None, Value::Int(3))
            .unwrap_err();
        assert!(err.matches(ExcType::TypeError, &vm.heap));
    }
}
