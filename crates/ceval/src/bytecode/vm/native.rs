//! Builtin functions, native methods and the iteration protocol they share
//! with `GET_ITER`/`FOR_ITER`.

use super::{VM, context::TraceEvent, generator::GenInput};
use crate::{
    args::{ArgValues, Kwargs},
    builtins::{Builtins, BuiltinsFunctions, CallConvention},
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    for_iterator::ForIterator,
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::{
        Dict, List, MethodKind, Tuple, Type,
        class::{class_derives_from, class_is_subclass},
        dict::{dict_get, dict_set, dict_set_str},
        str::normalize_index,
    },
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    /// Calls a builtin function, reporting the call to the trace hook.
    pub(super) fn call_builtin(&mut self, function: BuiltinsFunctions, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
        let name: &'static str = function.into();
        if !kwargs.is_empty() && !function.convention().accepts_keywords() {
            self.release_all(args);
            kwargs.drop_with_heap(&mut self.heap);
            return Err(ExcType::type_error_no_kwargs(name));
        }
        self.ctx.trace(&TraceEvent::NativeCall { name });
        let args = ArgValues::from_vec(args);
        let result = match function {
            BuiltinsFunctions::Abs => self.builtin_abs(args),
            BuiltinsFunctions::Dict => self.builtin_dict(args, kwargs),
            BuiltinsFunctions::Import => self.builtin_import(args),
            BuiltinsFunctions::Isinstance => self.builtin_isinstance(args),
            BuiltinsFunctions::Iter => match args.get_one_arg(name, &mut self.heap) {
                Ok(value) => self.get_iter(value),
                Err(err) => Err(err),
            },
            BuiltinsFunctions::Len => self.builtin_len(args),
            BuiltinsFunctions::List => self.builtin_sequence(args, true),
            BuiltinsFunctions::Tuple => self.builtin_sequence(args, false),
            BuiltinsFunctions::Range => self.builtin_range(args),
            BuiltinsFunctions::Repr => self.builtin_repr(args),
            BuiltinsFunctions::Str => self.builtin_str(args),
        };
        let event = match &result {
            Ok(_) => TraceEvent::NativeReturn { name },
            Err(_) => TraceEvent::NativeException { name },
        };
        self.ctx.trace(&event);
        result
    }

    fn builtin_abs(&mut self, args: ArgValues) -> RunResult<Value> {
        let value = args.get_one_arg("abs", &mut self.heap)?;
        match value {
            Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| ExcType::overflow("absolute value")),
            Value::Bool(b) => Ok(Value::Int(i64::from(b))),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => {
                let type_ = other.py_type(&self.heap);
                other.drop_with_heap(&mut self.heap);
                Err(ExcType::type_error(format!("bad operand type for abs(): '{type_}'")))
            }
        }
    }

    /// `dict()`, `dict(mapping)`, `dict(pairs)`, each optionally with keywords.
    fn builtin_dict(&mut self, args: ArgValues, kwargs: Kwargs) -> RunResult<Value> {
        let args = match args.get_range("dict", 0, 1, &mut self.heap) {
            Ok(args) => args,
            Err(err) => {
                kwargs.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        let dict_id = match self.heap.allocate(HeapData::Dict(Dict::new())) {
            Ok(id) => id,
            Err(err) => {
                self.release_all(args);
                kwargs.drop_with_heap(&mut self.heap);
                return Err(err.into());
            }
        };
        let dict = Value::Ref(dict_id);
        let mut filled = Ok(());
        if let Some(source) = args.into_iter().next() {
            filled = self.dict_update(dict_id, source);
        }
        let mut kwargs = kwargs.into_iter();
        if filled.is_ok() {
            for (key, value) in kwargs.by_ref() {
                if let Err(err) = dict_set_str(&mut self.heap, dict_id, &key, value) {
                    filled = Err(err);
                    break;
                }
            }
        }
        self.release_all(kwargs.map(|(_, value)| value));
        match filled {
            Ok(()) => Ok(dict),
            Err(err) => {
                dict.drop_with_heap(&mut self.heap);
                Err(err)
            }
        }
    }

    /// Fills `dict_id` from a dict or from an iterable of pairs. Consumes `source`.
    fn dict_update(&mut self, dict_id: HeapId, source: Value) -> RunResult<()> {
        let entries = match &source {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Dict(dict) => Some(
                    dict.iter()
                        .map(|(key, value)| (key.copy_for_extend(), value.copy_for_extend()))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            },
            _ => None,
        };
        if let Some(entries) = entries {
            for (key, value) in &entries {
                self.heap.retain_all(std::slice::from_ref(key));
                self.heap.retain_all(std::slice::from_ref(value));
            }
            source.drop_with_heap(&mut self.heap);
            let mut entries = entries.into_iter();
            while let Some((key, value)) = entries.next() {
                if let Err(err) = dict_set(&mut self.heap, dict_id, key, value) {
                    self.release_all(entries.flat_map(|(key, value)| [key, value]));
                    return Err(err);
                }
            }
            return Ok(());
        }

        let items = self.collect_iterable(source)?;
        let mut items = items.into_iter().enumerate();
        while let Some((index, item)) = items.next() {
            let failure = match self.sequence_items(&item).map(<[Value; 2]>::try_from) {
                Some(Ok(pair)) => {
                    self.heap.retain_all(&pair);
                    item.drop_with_heap(&mut self.heap);
                    let [key, value] = pair;
                    match dict_set(&mut self.heap, dict_id, key, value) {
                        Ok(()) => continue,
                        Err(err) => err,
                    }
                }
                Some(Err(other)) => {
                    let len = other.len();
                    self.heap.retain_all(&other);
                    self.release_all(other);
                    item.drop_with_heap(&mut self.heap);
                    ExcType::value_error(format!(
                        "dictionary update sequence element #{index} has length {len}; 2 is required"
                    ))
                }
                None => {
                    item.drop_with_heap(&mut self.heap);
                    ExcType::type_error(format!(
                        "cannot convert dictionary update sequence element #{index} to a sequence"
                    ))
                }
            };
            self.release_all(items.map(|(_, item)| item));
            return Err(failure);
        }
        Ok(())
    }

    /// Borrowed copies of a list's or tuple's items.
    fn sequence_items(&self, value: &Value) -> Option<Vec<Value>> {
        let Value::Ref(id) = value else {
            return None;
        };
        match self.heap.get(*id) {
            HeapData::List(list) => Some(list.as_slice().iter().map(Value::copy_for_extend).collect()),
            HeapData::Tuple(tuple) => Some(tuple.as_slice().iter().map(Value::copy_for_extend).collect()),
            _ => None,
        }
    }

    /// `__import__(name, globals=None, locals=None, fromlist=None, level=-1)`,
    /// resolved against the modules registered by the host.
    fn builtin_import(&mut self, args: ArgValues) -> RunResult<Value> {
        let args = args.get_range("__import__", 1, 5, &mut self.heap)?;
        let name = args[0].as_str(&self.heap).map(str::to_owned);
        let type_ = args[0].py_type(&self.heap);
        self.release_all(args);
        let Some(name) = name else {
            return Err(ExcType::type_error(format!(
                "__import__() argument 1 must be string, not {type_}"
            )));
        };
        match self.modules.get(&name) {
            Some(&module) => {
                log::debug!("import '{name}' resolved to a registered module");
                self.heap.inc_ref(module);
                Ok(Value::Ref(module))
            }
            None => Err(ExcType::import_error(format!("No module named {name}"))),
        }
    }

    fn builtin_isinstance(&mut self, args: ArgValues) -> RunResult<Value> {
        let args = args.get_range("isinstance", 2, 2, &mut self.heap)?;
        let result = self.is_instance(&args[0], &args[1]);
        self.release_all(args);
        result.map(Value::Bool)
    }

    /// Whether `object` is an instance of `class`, a class or a tuple of them.
    pub(super) fn is_instance(&self, object: &Value, class: &Value) -> RunResult<bool> {
        match class {
            Value::Builtin(Builtins::ExcType(exc_type)) => Ok(match object {
                Value::Ref(id) => match self.heap.get(*id) {
                    HeapData::Exception(exc) => exc.exc_type().is_subclass_of(*exc_type),
                    HeapData::Instance(instance) => class_derives_from(&self.heap, instance.class, *exc_type),
                    _ => false,
                },
                _ => false,
            }),
            Value::Ref(class_id) => match self.heap.get(*class_id) {
                HeapData::Class(_) => Ok(match object {
                    Value::Ref(id) => match self.heap.get(*id) {
                        HeapData::Instance(instance) => class_is_subclass(&self.heap, instance.class, *class_id),
                        _ => false,
                    },
                    _ => false,
                }),
                HeapData::Tuple(tuple) => {
                    for item in tuple.as_slice() {
                        if self.is_instance(object, item)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                _ => Err(isinstance_arg_error()),
            },
            _ => Err(isinstance_arg_error()),
        }
    }

    fn builtin_len(&mut self, args: ArgValues) -> RunResult<Value> {
        let value = args.get_one_arg("len", &mut self.heap)?;
        let len = match &value {
            Value::Ref(id) => self.heap.get(*id).py_len(),
            _ => None,
        };
        let type_ = value.py_type(&self.heap);
        value.drop_with_heap(&mut self.heap);
        match len {
            Some(len) => Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX))),
            None => Err(ExcType::type_error(format!("object of type '{type_}' has no len()"))),
        }
    }

    /// `list(iterable)` and `tuple(iterable)`.
    fn builtin_sequence(&mut self, args: ArgValues, is_list: bool) -> RunResult<Value> {
        let name = if is_list { "list" } else { "tuple" };
        let args = args.get_range(name, 0, 1, &mut self.heap)?;
        let items = match args.into_iter().next() {
            Some(source) => self.collect_iterable(source)?,
            None => Vec::new(),
        };
        let data = if is_list {
            HeapData::List(List::new(items))
        } else {
            HeapData::Tuple(Tuple::new(items))
        };
        Ok(Value::Ref(self.heap.allocate(data)?))
    }

    /// `range([start,] stop[, step])`, returning a list.
    fn builtin_range(&mut self, args: ArgValues) -> RunResult<Value> {
        let args = args.get_range("range", 1, 3, &mut self.heap)?;
        let mut bounds = [0_i64; 3];
        for (slot, arg) in bounds.iter_mut().zip(&args) {
            match arg {
                Value::Int(i) => *slot = *i,
                Value::Bool(b) => *slot = i64::from(*b),
                other => {
                    let type_ = other.py_type(&self.heap);
                    self.release_all(args);
                    return Err(ExcType::type_error(format!(
                        "range() integer argument expected, got {type_}."
                    )));
                }
            }
        }
        let (start, stop, step) = match args.len() {
            1 => (0, bounds[0], 1),
            2 => (bounds[0], bounds[1], 1),
            _ => (bounds[0], bounds[1], bounds[2]),
        };
        self.release_all(args);
        if step == 0 {
            return Err(ExcType::value_error("range() step argument must not be zero"));
        }
        let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
        let count = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / -step + 1
        } else {
            0
        };
        let count = usize::try_from(count).map_err(|_| ExcType::overflow("range() result"))?;
        let items: Vec<Value> = (0..count)
            .map(|i| Value::Int((start + step * i as i128) as i64))
            .collect();
        Ok(Value::Ref(self.heap.allocate(HeapData::List(List::new(items)))?))
    }

    fn builtin_repr(&mut self, args: ArgValues) -> RunResult<Value> {
        let value = args.get_one_arg("repr", &mut self.heap)?;
        let text = value.py_repr(&self.heap);
        value.drop_with_heap(&mut self.heap);
        self.new_str(&text)
    }

    fn builtin_str(&mut self, args: ArgValues) -> RunResult<Value> {
        let args = args.get_range("str", 0, 1, &mut self.heap)?;
        let Some(value) = args.into_iter().next() else {
            return self.new_str("");
        };
        if let Value::Ref(id) = &value
            && matches!(self.heap.get(*id), HeapData::Str(_))
        {
            return Ok(value);
        }
        let text = value.py_str(&self.heap);
        value.drop_with_heap(&mut self.heap);
        self.new_str(&text)
    }

    /// Calls a native method on its receiver. Consumes everything.
    pub(super) fn call_method(
        &mut self,
        kind: MethodKind,
        receiver: Value,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> RunResult<Value> {
        let name = kind.name();
        if !kwargs.is_empty() {
            receiver.drop_with_heap(&mut self.heap);
            self.release_all(args);
            kwargs.drop_with_heap(&mut self.heap);
            return Err(ExcType::type_error_no_kwargs(name));
        }
        self.ctx.trace(&TraceEvent::NativeCall { name });
        let args = ArgValues::from_vec(args);
        let result = match kind.convention() {
            CallConvention::NoArgs => match args.check_zero_args(name, &mut self.heap) {
                Ok(()) => self.method_no_args(kind, &receiver),
                Err(err) => Err(err),
            },
            CallConvention::OneArg => match args.get_one_arg(name, &mut self.heap) {
                Ok(arg) => self.method_one_arg(kind, &receiver, arg),
                Err(err) => Err(err),
            },
            CallConvention::VarArgs | CallConvention::VarArgsKeywords => self.method_var_args(kind, &receiver, args),
        };
        receiver.drop_with_heap(&mut self.heap);
        let event = match &result {
            Ok(_) => TraceEvent::NativeReturn { name },
            Err(_) => TraceEvent::NativeException { name },
        };
        self.ctx.trace(&event);
        result
    }

    fn method_no_args(&mut self, kind: MethodKind, receiver: &Value) -> RunResult<Value> {
        let id = receiver_id(receiver)?;
        match kind {
            MethodKind::Keys => {
                let keys: Vec<Value> = match self.heap.get(id) {
                    HeapData::Dict(dict) => dict.iter().map(|(key, _)| key.copy_for_extend()).collect(),
                    _ => return Err(RunError::internal("keys() receiver is not a dict")),
                };
                self.heap.retain_all(&keys);
                Ok(Value::Ref(self.heap.allocate(HeapData::List(List::new(keys)))?))
            }
            MethodKind::Upper => {
                let upper = match self.heap.get(id) {
                    HeapData::Str(s) => s.as_str().to_ascii_uppercase(),
                    _ => return Err(RunError::internal("upper() receiver is not a str")),
                };
                self.new_str(&upper)
            }
            MethodKind::Next => self.generator_step(id, GenInput::Send(Value::None)),
            _ => Err(RunError::internal(format!("{kind}() dispatched with the wrong convention"))),
        }
    }

    fn method_one_arg(&mut self, kind: MethodKind, receiver: &Value, arg: Value) -> RunResult<Value> {
        let id = match receiver_id(receiver) {
            Ok(id) => id,
            Err(err) => {
                arg.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        match kind {
            MethodKind::Append => {
                let rejected = match self.heap.get_mut(id) {
                    HeapData::List(list) => {
                        list.as_vec_mut().push(arg);
                        None
                    }
                    _ => Some(arg),
                };
                match rejected {
                    None => Ok(Value::None),
                    Some(arg) => {
                        arg.drop_with_heap(&mut self.heap);
                        Err(RunError::internal("append() receiver is not a list"))
                    }
                }
            }
            MethodKind::Join => self.str_join(id, arg),
            MethodKind::Send => self.generator_step(id, GenInput::Send(arg)),
            _ => {
                arg.drop_with_heap(&mut self.heap);
                Err(RunError::internal(format!("{kind}() dispatched with the wrong convention")))
            }
        }
    }

    fn method_var_args(&mut self, kind: MethodKind, receiver: &Value, args: ArgValues) -> RunResult<Value> {
        let id = match receiver_id(receiver) {
            Ok(id) => id,
            Err(err) => {
                args.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        match kind {
            MethodKind::Pop => {
                let args = args.get_range("pop", 0, 1, &mut self.heap)?;
                let index = match args.first() {
                    None => -1,
                    Some(Value::Int(i)) => *i,
                    Some(other) => {
                        let type_ = other.py_type(&self.heap);
                        self.release_all(args);
                        return Err(ExcType::type_error(format!("an integer is required, got {type_}")));
                    }
                };
                self.release_all(args);
                let popped = match self.heap.get_mut(id) {
                    HeapData::List(list) => {
                        let items = list.as_vec_mut();
                        if items.is_empty() {
                            return Err(ExcType::index_error("pop from empty list"));
                        }
                        match normalize_index(index, items.len()) {
                            Some(i) => items.remove(i),
                            None => return Err(ExcType::index_error("pop index out of range")),
                        }
                    }
                    _ => return Err(RunError::internal("pop() receiver is not a list")),
                };
                Ok(popped)
            }
            MethodKind::Get => {
                let (key, default) = args.get_one_two_args("get", &mut self.heap)?;
                let found = dict_get(&mut self.heap, id, &key);
                key.drop_with_heap(&mut self.heap);
                match found {
                    Ok(Some(value)) => {
                        if let Some(default) = default {
                            default.drop_with_heap(&mut self.heap);
                        }
                        Ok(value)
                    }
                    Ok(None) => Ok(default.unwrap_or(Value::None)),
                    Err(err) => {
                        if let Some(default) = default {
                            default.drop_with_heap(&mut self.heap);
                        }
                        Err(err)
                    }
                }
            }
            MethodKind::Throw => {
                let mut args = args.get_range("throw", 1, 3, &mut self.heap)?.into_iter();
                let exc_type = args.next();
                let value = args.next().unwrap_or(Value::None);
                let traceback = args.next().unwrap_or(Value::None);
                let (info, _) = self.prepare_raise(exc_type, value, traceback)?;
                self.generator_step(id, GenInput::Throw(info))
            }
            _ => {
                args.drop_with_heap(&mut self.heap);
                Err(RunError::internal(format!("{kind}() dispatched with the wrong convention")))
            }
        }
    }

    /// `sep.join(iterable)`.
    fn str_join(&mut self, sep_id: HeapId, iterable: Value) -> RunResult<Value> {
        let items = self.collect_iterable(iterable)?;
        let mut parts = Vec::with_capacity(items.len());
        let mut failure = None;
        for (index, item) in items.iter().enumerate() {
            match item.as_str(&self.heap) {
                Some(part) => parts.push(part.to_owned()),
                None => {
                    failure = Some(ExcType::type_error(format!(
                        "sequence item {index}: expected string, {} found",
                        item.py_type(&self.heap)
                    )));
                    break;
                }
            }
        }
        self.release_all(items);
        if let Some(err) = failure {
            return Err(err);
        }
        let joined = match self.heap.get(sep_id) {
            HeapData::Str(sep) => parts.join(sep.as_str()),
            _ => return Err(RunError::internal("join() receiver is not a str")),
        };
        self.new_str(&joined)
    }

    /// `next()`, `send()` and `throw()`: exhaustion surfaces as `StopIteration`.
    fn generator_step(&mut self, gen_id: HeapId, input: GenInput) -> RunResult<Value> {
        match self.resume(gen_id, input)? {
            Some(value) => Ok(value),
            None => Err(SimpleException::new_none(ExcType::StopIteration).into()),
        }
    }

    /// `GET_ITER`: iterators and generators are their own iterators.
    pub(super) fn get_iter(&mut self, value: Value) -> RunResult<Value> {
        if let Value::Ref(id) = &value
            && matches!(self.heap.get(*id), HeapData::Iterator(_) | HeapData::Generator(_))
        {
            return Ok(value);
        }
        match ForIterator::new(value, &mut self.heap) {
            Ok(iter) => Ok(Value::Ref(self.heap.allocate(HeapData::Iterator(iter))?)),
            Err(value) => {
                let type_ = value.py_type(&self.heap);
                value.drop_with_heap(&mut self.heap);
                Err(ExcType::type_error_not_iterable(type_))
            }
        }
    }

    /// Advances an iterator, returning `None` once it is exhausted.
    ///
    /// A generator that raises `StopIteration` counts as exhausted.
    pub(super) fn iter_next(&mut self, id: HeapId) -> RunResult<Option<Value>> {
        match self.heap.get(id).py_type() {
            Type::Iterator => self.heap.with_entry_mut(id, |heap, data| match data {
                HeapData::Iterator(iter) => iter.for_next(heap),
                _ => Ok(None),
            }),
            Type::Generator => match self.resume(id, GenInput::Send(Value::None)) {
                Err(err) if err.matches(ExcType::StopIteration, &self.heap) => {
                    err.drop_with_heap(&mut self.heap);
                    Ok(None)
                }
                other => other,
            },
            type_ => Err(ExcType::type_error(format!("'{type_}' object is not an iterator"))),
        }
    }

    /// Drains any iterable into a vector. Consumes `value`.
    pub(super) fn collect_iterable(&mut self, value: Value) -> RunResult<Vec<Value>> {
        let iter = self.get_iter(value)?;
        let Some(id) = iter.ref_id() else {
            iter.drop_with_heap(&mut self.heap);
            return Err(RunError::internal("iterator is not a heap object"));
        };
        let mut items = Vec::new();
        let outcome = loop {
            match self.iter_next(id) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        iter.drop_with_heap(&mut self.heap);
        match outcome {
            Ok(()) => Ok(items),
            Err(err) => {
                self.release_all(items);
                Err(err)
            }
        }
    }
}

fn receiver_id(receiver: &Value) -> RunResult<HeapId> {
    receiver
        .ref_id()
        .ok_or_else(|| RunError::internal("native method receiver is not a heap object"))
}

fn isinstance_arg_error() -> RunError {
    ExcType::type_error("isinstance() arg 2 must be a class, type, or tuple of classes and types")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{heap::Heap, io::NoPrint, resource::NoLimitTracker};

    fn vm() -> VM<NoLimitTracker, NoPrint> {
        VM::new(Heap::new(64, NoLimitTracker), NoPrint).unwrap()
    }

    fn call(vm: &mut VM<NoLimitTracker, NoPrint>, function: BuiltinsFunctions, args: Vec<Value>) -> RunResult<Value> {
        vm.call_builtin(function, args, Kwargs::new())
    }

    fn message(err: RunError) -> String {
        let RunError::Exc(exc) = err else { panic!("expected a simple exception") };
        exc.arg().unwrap_or_default().to_owned()
    }

    #[test]
    fn range_counts() {
        let mut vm = vm();
        let list = call(&mut vm, BuiltinsFunctions::Range, vec![Value::Int(10), Value::Int(0), Value::Int(-3)]).unwrap();
        assert_eq!(list.py_repr(&vm.heap), "[10, 7, 4, 1]");
        list.drop_with_heap(&mut vm.heap);
        let err = call(&mut vm, BuiltinsFunctions::Range, vec![Value::Int(1), Value::Int(2), Value::Int(0)]).unwrap_err();
        assert_eq!(message(err), "range() step argument must not be zero");
    }

    #[test]
    fn len_and_abs_errors() {
        let mut vm = vm();
        let err = call(&mut vm, BuiltinsFunctions::Len, vec![Value::Int(1)]).unwrap_err();
        assert_eq!(message(err), "object of type 'int' has no len()");
        let err = call(&mut vm, BuiltinsFunctions::Len, vec![]).unwrap_err();
        assert_eq!(message(err), "len() takes exactly one argument (0 given)");
        let err = call(&mut vm, BuiltinsFunctions::Abs, vec![Value::Int(i64::MIN)]).unwrap_err();
        assert!(err.matches(ExcType::OverflowError, &vm.heap));
        let result = call(&mut vm, BuiltinsFunctions::Abs, vec![Value::Int(-4)]).unwrap();
        assert!(matches!(result, Value::Int(4)));
    }

    #[test]
    fn keywords_rejected_by_plain_builtins() {
        let mut vm = vm();
        let mut kwargs = Kwargs::new();
        kwargs.insert("x".to_owned(), Value::Int(1)).unwrap();
        let err = vm.call_builtin(BuiltinsFunctions::Len, vec![], kwargs).unwrap_err();
        assert_eq!(message(err), "len() takes no keyword arguments");
    }

    #[test]
    fn dict_from_pairs_and_keywords() {
        let mut vm = vm();
        let a = vm.new_str("a").unwrap();
        let pair = Value::Ref(vm.heap.allocate(HeapData::Tuple(Tuple::new(vec![a, Value::Int(1)]))).unwrap());
        let pairs = Value::Ref(vm.heap.allocate(HeapData::List(List::new(vec![pair]))).unwrap());
        let mut kwargs = Kwargs::new();
        kwargs.insert("b".to_owned(), Value::Int(2)).unwrap();
        let dict = vm.call_builtin(BuiltinsFunctions::Dict, vec![pairs], kwargs).unwrap();
        assert_eq!(dict.py_repr(&vm.heap), "{'a': 1, 'b': 2}");
        dict.drop_with_heap(&mut vm.heap);

        let bad = Value::Ref(vm.heap.allocate(HeapData::List(List::new(vec![Value::Int(3)]))).unwrap());
        let err = call(&mut vm, BuiltinsFunctions::Dict, vec![bad]).unwrap_err();
        assert_eq!(message(err), "cannot convert dictionary update sequence element #0 to a sequence");
    }

    #[test]
    fn import_unknown_module() {
        let mut vm = vm();
        let name = vm.new_str("os.path").unwrap();
        let err = call(&mut vm, BuiltinsFunctions::Import, vec![name]).unwrap_err();
        assert!(err.matches(ExcType::ImportError, &vm.heap));
        assert_eq!(message(err), "No module named os.path");
    }

    #[test]
    fn list_pop_and_join() {
        let mut vm = vm();
        let list = Value::Ref(vm.heap.allocate(HeapData::List(List::new(vec![]))).unwrap());
        let receiver = list.clone_with_heap(&mut vm.heap);
        let err = vm.call_method(MethodKind::Pop, receiver, vec![], Kwargs::new()).unwrap_err();
        assert_eq!(message(err), "pop from empty list");

        let receiver = list.clone_with_heap(&mut vm.heap);
        vm.call_method(MethodKind::Append, receiver, vec![Value::Int(5)], Kwargs::new())
            .unwrap();
        let sep = vm.new_str("-").unwrap();
        let item = list.clone_with_heap(&mut vm.heap);
        let err = vm
            .call_method(MethodKind::Join, sep, vec![item], Kwargs::new())
            .unwrap_err();
        assert_eq!(message(err), "sequence item 0: expected string, int found");

        let receiver = list.clone_with_heap(&mut vm.heap);
        let popped = vm.call_method(MethodKind::Pop, receiver, vec![], Kwargs::new()).unwrap();
        assert!(matches!(popped, Value::Int(5)));
        list.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn iterating_a_string() {
        let mut vm = vm();
        let s = vm.new_str("ab").unwrap();
        let items = vm.collect_iterable(s).unwrap();
        let text: Vec<String> = items.iter().map(|item| item.py_str(&vm.heap)).collect();
        assert_eq!(text, ["a", "b"]);
        vm.release_all(items);
        let err = vm.collect_iterable(Value::Int(1)).unwrap_err();
        assert_eq!(message(err), "'int' object is not iterable");
    }
}
