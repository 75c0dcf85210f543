//! `LOAD_ATTR` and `STORE_ATTR`.

use super::{Frame, VM};
use crate::{
    exception_private::{ExcType, RunError, RunResult},
    heap::HeapData,
    io::PrintWriter,
    resource::ResourceTracker,
    types::{BoundMethod, DictKey, MethodKind, NativeMethod, Tuple, Type, class::class_lookup},
    value::Value,
};

/// Result of looking an attribute up, before any reference is taken.
enum Lookup {
    /// A borrowed copy of a stored value.
    Found(Value),
    /// A function found on an instance's class; becomes a bound method.
    Method(Value),
    Native(MethodKind),
    Text(String),
    /// `args` of a builtin exception instance.
    ExceptionArgs(Option<String>),
    Missing(RunError),
}

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    /// Looks `name` up on `object`. Consumes `object`.
    pub(super) fn load_attr(&mut self, object: Value, name: &str) -> RunResult<Value> {
        let found = match self.lookup_attr(&object, name) {
            Lookup::Found(value) => {
                self.heap.retain_all(std::slice::from_ref(&value));
                Ok(value)
            }
            Lookup::Method(function) => {
                self.heap.retain_all(std::slice::from_ref(&function));
                let method = BoundMethod {
                    receiver: object,
                    function,
                };
                return Ok(Value::Ref(self.heap.allocate(HeapData::BoundMethod(method))?));
            }
            Lookup::Native(kind) => {
                let method = NativeMethod { receiver: object, kind };
                return Ok(Value::Ref(self.heap.allocate(HeapData::NativeMethod(method))?));
            }
            Lookup::Text(text) => self.new_str(&text),
            Lookup::ExceptionArgs(arg) => self.exception_args(arg),
            Lookup::Missing(err) => Err(err),
        };
        object.drop_with_heap(&mut self.heap);
        found
    }

    fn lookup_attr(&self, object: &Value, name: &str) -> Lookup {
        let Value::Ref(id) = object else {
            return Lookup::Missing(ExcType::attribute_error(object.py_type(&self.heap), name));
        };
        match self.heap.get(*id) {
            HeapData::Module(module) => match module.attrs.get_str(name) {
                Some(value) => Lookup::Found(value.copy_for_extend()),
                None if name == "__name__" => Lookup::Text(module.name.clone()),
                None => Lookup::Missing(ExcType::attribute_error(Type::Module, name)),
            },
            HeapData::Instance(instance) => {
                if let Some(value) = instance.attrs.get_str(name) {
                    return Lookup::Found(value.copy_for_extend());
                }
                if name == "__class__" {
                    return Lookup::Found(Value::Ref(instance.class));
                }
                match class_lookup(&self.heap, instance.class, name) {
                    Some(value) => {
                        let is_function = value
                            .ref_id()
                            .is_some_and(|fid| matches!(self.heap.get(fid), HeapData::Function(_)));
                        if is_function {
                            Lookup::Method(value)
                        } else {
                            Lookup::Found(value)
                        }
                    }
                    None => {
                        let class_name = match self.heap.get(instance.class) {
                            HeapData::Class(class) => class.name.as_str(),
                            _ => "?",
                        };
                        Lookup::Missing(ExcType::attribute_error_msg(format!(
                            "{class_name} instance has no attribute '{name}'"
                        )))
                    }
                }
            }
            HeapData::Class(class) => match class_lookup(&self.heap, *id, name) {
                Some(value) => Lookup::Found(value),
                None if name == "__name__" => Lookup::Text(class.name.clone()),
                None => Lookup::Missing(ExcType::attribute_error_msg(format!(
                    "class {} has no attribute '{name}'",
                    class.name
                ))),
            },
            HeapData::Exception(exc) => match name {
                "args" => Lookup::ExceptionArgs(exc.arg().map(str::to_owned)),
                "message" => Lookup::Text(exc.arg().unwrap_or_default().to_owned()),
                _ => Lookup::Missing(ExcType::attribute_error(Type::Exception(exc.exc_type()), name)),
            },
            data => {
                let type_ = data.py_type();
                match MethodKind::lookup(type_, name) {
                    Some(kind) => Lookup::Native(kind),
                    None => Lookup::Missing(ExcType::attribute_error(type_, name)),
                }
            }
        }
    }

    fn exception_args(&mut self, arg: Option<String>) -> RunResult<Value> {
        let items = match arg {
            Some(arg) => vec![self.new_str(&arg)?],
            None => Vec::new(),
        };
        Ok(Value::Ref(self.heap.allocate(HeapData::Tuple(Tuple::new(items)))?))
    }

    /// `STORE_ATTR`: TOS is the object, TOS1 the value.
    pub(super) fn store_attr_op(&mut self, frame: &mut Frame, name: &str) -> RunResult<()> {
        let object = frame.pop();
        let value = frame.pop();
        let result = self.set_attr(&object, name, value);
        object.drop_with_heap(&mut self.heap);
        result
    }

    /// Binds `name` on an instance, class or module. Consumes `value`.
    pub(super) fn set_attr(&mut self, object: &Value, name: &str, value: Value) -> RunResult<()> {
        let type_ = object.py_type(&self.heap);
        let Some(id) = object.ref_id().filter(|_| matches!(type_, Type::Instance | Type::Class | Type::Module)) else {
            value.drop_with_heap(&mut self.heap);
            return Err(ExcType::attribute_error(type_, name));
        };
        let key = match self.new_str(name) {
            Ok(key) => key,
            Err(err) => {
                value.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        let displaced = self.heap.with_entry_mut(id, |_, data| {
            let attrs = match data {
                HeapData::Instance(instance) => &mut instance.attrs,
                HeapData::Class(class) => &mut class.attrs,
                HeapData::Module(module) => &mut module.attrs,
                _ => return Err((key, value)),
            };
            Ok(attrs.insert(DictKey::str(name), key, value))
        });
        match displaced {
            Ok(Some((unused_key, old))) => {
                unused_key.drop_with_heap(&mut self.heap);
                old.drop_with_heap(&mut self.heap);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err((key, value)) => {
                key.drop_with_heap(&mut self.heap);
                value.drop_with_heap(&mut self.heap);
                Err(ExcType::attribute_error(type_, name))
            }
        }
    }
}
