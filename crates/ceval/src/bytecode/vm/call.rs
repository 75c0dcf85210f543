//! The call binder: `CALL_FUNCTION*` operand decoding and argument binding
//! for every kind of callable.

use std::rc::Rc;

use super::{Frame, VM};
use crate::{
    args::Kwargs,
    builtins::{Builtins, BuiltinsFunctions},
    bytecode::{CALL_FLAG_KW, CALL_FLAG_VAR, CodeFlags, Opcode, code::Code},
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::{
        Dict, Generator, Instance, MethodKind, Tuple, Type,
        class::{class_exc_base, class_lookup},
        dict::dict_set_str,
    },
    value::Value,
};

/// What a callee turned out to be, resolved once per call.
#[derive(Debug, Clone, Copy)]
enum Callable {
    Builtin(BuiltinsFunctions),
    ExcClass(ExcType),
    NativeMethod(MethodKind),
    Function(HeapId),
    BoundMethod,
    Class(HeapId),
    /// An instance, called through its class's `__call__`.
    Instance(HeapId),
    NotCallable(Type),
}

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    /// `CALL_FUNCTION` and its `*args`/`**kwargs` variants.
    ///
    /// Stack, bottom to top: callee, positionals, keyword `(name, value)`
    /// pairs, then `*args` and `**kwargs` when the opcode says so.
    pub(super) fn call_op(&mut self, frame: &mut Frame, opcode: Opcode, arg: u16) -> RunResult<()> {
        let flags = (opcode as u8 - Opcode::CallFunction as u8) & 3;
        let [positional, keywords] = arg.to_le_bytes();
        let positional = usize::from(positional);
        let pair_values = 2 * usize::from(keywords);
        let has_star = flags & CALL_FLAG_VAR != 0;
        let has_star_star = flags & CALL_FLAG_KW != 0;
        let needed = 1 + positional + pair_values + usize::from(has_star) + usize::from(has_star_star);
        if frame.stack_len() < needed {
            return Err(RunError::internal(format!(
                "malformed call site: {needed} operands needed, {} on the stack",
                frame.stack_len()
            )));
        }
        let star_kwargs = has_star_star.then(|| frame.pop());
        let star_args = has_star.then(|| frame.pop());
        let pairs = frame.pop_n(pair_values);
        let args = frame.pop_n(positional);
        let callee = frame.pop();
        let result = if flags == 0 {
            self.call_simple(callee, args, pairs)?
        } else {
            self.call_ext(callee, args, pairs, star_args, star_kwargs)?
        };
        frame.push(result);
        Ok(())
    }

    /// Plain `CALL_FUNCTION`: tries the fast path before building keywords.
    fn call_simple(&mut self, callee: Value, mut args: Vec<Value>, pairs: Vec<Value>) -> RunResult<Value> {
        let callee = self.unpack_bound_method(callee, &mut args);
        if pairs.is_empty() {
            let fast = match &callee {
                Value::Ref(id) => matches!(self.heap.get(*id), HeapData::Function(f) if f.accepts_fast_call(args.len())),
                _ => false,
            };
            if fast {
                return self.call_fast(callee, args);
            }
            return self.call_value(callee, args, Kwargs::new());
        }
        let mut kwargs = Kwargs::new();
        if let Err(err) = self.merge_pairs(&callee, pairs, &mut kwargs) {
            callee.drop_with_heap(&mut self.heap);
            self.release_all(args);
            kwargs.drop_with_heap(&mut self.heap);
            return Err(err);
        }
        self.call_value(callee, args, kwargs)
    }

    /// `CALL_FUNCTION_VAR`/`_KW`/`_VAR_KW`: merges `**kwargs`, `*args` and the
    /// call-site keywords before calling.
    fn call_ext(
        &mut self,
        callee: Value,
        mut args: Vec<Value>,
        pairs: Vec<Value>,
        star_args: Option<Value>,
        star_kwargs: Option<Value>,
    ) -> RunResult<Value> {
        let mut kwargs = Kwargs::new();
        let mut pending_star = star_args;
        let mut pending_pairs = Some(pairs);
        let merged = (|| -> RunResult<()> {
            if let Some(mapping) = star_kwargs {
                self.extend_from_mapping(&callee, mapping, &mut kwargs)?;
            }
            if let Some(sequence) = pending_star.take() {
                let items = self.star_items(&callee, sequence)?;
                args.extend(items);
            }
            if let Some(pairs) = pending_pairs.take() {
                self.merge_pairs(&callee, pairs, &mut kwargs)?;
            }
            Ok(())
        })();
        if let Err(err) = merged {
            if let Some(sequence) = pending_star {
                sequence.drop_with_heap(&mut self.heap);
            }
            if let Some(pairs) = pending_pairs {
                self.release_all(pairs);
            }
            callee.drop_with_heap(&mut self.heap);
            self.release_all(args);
            kwargs.drop_with_heap(&mut self.heap);
            return Err(err);
        }
        self.call_value(callee, args, kwargs)
    }

    /// Calls any callable with already-merged arguments.
    pub(crate) fn call_value(&mut self, callee: Value, mut args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
        match self.classify(&callee) {
            Callable::Builtin(function) => self.call_builtin(function, args, kwargs),
            Callable::ExcClass(exc_type) => self.construct_exception(exc_type, args, kwargs),
            Callable::NativeMethod(kind) => {
                let receiver = match &callee {
                    Value::Ref(id) => match self.heap.get(*id) {
                        HeapData::NativeMethod(method) => method.receiver.copy_for_extend(),
                        _ => Value::None,
                    },
                    _ => Value::None,
                };
                self.heap.retain_all(std::slice::from_ref(&receiver));
                callee.drop_with_heap(&mut self.heap);
                self.call_method(kind, receiver, args, kwargs)
            }
            Callable::Function(id) => self.call_function(callee, id, args, kwargs),
            Callable::BoundMethod => {
                let function = self.unpack_bound_method(callee, &mut args);
                self.call_value(function, args, kwargs)
            }
            Callable::Class(id) => self.construct_instance(callee, id, args, kwargs),
            Callable::Instance(id) => {
                let class = match self.heap.get(id) {
                    HeapData::Instance(instance) => instance.class,
                    _ => id,
                };
                match class_lookup(&self.heap, class, "__call__") {
                    Some(method) => {
                        self.heap.retain_all(std::slice::from_ref(&method));
                        args.insert(0, callee);
                        self.call_value(method, args, kwargs)
                    }
                    None => {
                        let description = self.describe_callee(&callee);
                        callee.drop_with_heap(&mut self.heap);
                        self.release_all(args);
                        kwargs.drop_with_heap(&mut self.heap);
                        Err(ExcType::attribute_error_msg(format!("{description} has no __call__ method")))
                    }
                }
            }
            Callable::NotCallable(type_) => {
                callee.drop_with_heap(&mut self.heap);
                self.release_all(args);
                kwargs.drop_with_heap(&mut self.heap);
                Err(ExcType::type_error_not_callable(type_))
            }
        }
    }

    fn classify(&self, callee: &Value) -> Callable {
        match callee {
            Value::Builtin(Builtins::Function(function)) => Callable::Builtin(*function),
            Value::Builtin(Builtins::ExcType(exc_type)) => Callable::ExcClass(*exc_type),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Function(_) => Callable::Function(*id),
                HeapData::BoundMethod(_) => Callable::BoundMethod,
                HeapData::NativeMethod(method) => Callable::NativeMethod(method.kind),
                HeapData::Class(_) => Callable::Class(*id),
                HeapData::Instance(_) => Callable::Instance(*id),
                other => Callable::NotCallable(other.py_type()),
            },
            other => Callable::NotCallable(other.py_type(&self.heap)),
        }
    }

    /// Replaces a bound method by its function, prepending the receiver to `args`.
    fn unpack_bound_method(&mut self, callee: Value, args: &mut Vec<Value>) -> Value {
        let Value::Ref(id) = &callee else {
            return callee;
        };
        let (receiver, function) = match self.heap.get(*id) {
            HeapData::BoundMethod(method) => (method.receiver.copy_for_extend(), method.function.copy_for_extend()),
            _ => return callee,
        };
        self.heap.retain_all(std::slice::from_ref(&receiver));
        self.heap.retain_all(std::slice::from_ref(&function));
        callee.drop_with_heap(&mut self.heap);
        args.insert(0, receiver);
        function
    }

    /// How error messages name a callee: `f()`, `C constructor`, `C instance`.
    fn describe_callee(&self, callee: &Value) -> String {
        match callee {
            Value::Builtin(Builtins::ExcType(exc_type)) => format!("{exc_type} constructor"),
            Value::Builtin(builtin) => format!("{}()", builtin.name()),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Function(function) => format!("{}()", function.name()),
                HeapData::BoundMethod(method) => self.describe_callee(&method.function),
                HeapData::NativeMethod(method) => format!("{}()", method.kind),
                HeapData::Class(class) => format!("{} constructor", class.name),
                HeapData::Instance(instance) => match self.heap.get(instance.class) {
                    HeapData::Class(class) => format!("{} instance", class.name),
                    _ => "instance".to_owned(),
                },
                other => format!("{} object", other.py_type()),
            },
            other => format!("{} object", other.py_type(&self.heap)),
        }
    }

    /// Adds call-site `(name, value)` pairs to `kwargs`. Consumes `pairs`.
    fn merge_pairs(&mut self, callee: &Value, pairs: Vec<Value>, kwargs: &mut Kwargs) -> RunResult<()> {
        let mut pairs = pairs.into_iter();
        while let Some(key) = pairs.next() {
            let Some(value) = pairs.next() else {
                key.drop_with_heap(&mut self.heap);
                break;
            };
            let Some(name) = key.as_str(&self.heap).map(str::to_owned) else {
                let description = self.describe_callee(callee);
                self.release_all([key, value]);
                self.release_all(pairs);
                return Err(ExcType::type_error_keywords_not_strings(&description));
            };
            key.drop_with_heap(&mut self.heap);
            if let Err((name, value)) = kwargs.insert(name, value) {
                let description = self.describe_callee(callee);
                value.drop_with_heap(&mut self.heap);
                self.release_all(pairs);
                return Err(ExcType::type_error_multiple_values(&description, &name));
            }
        }
        Ok(())
    }

    /// Copies a `**kwargs` dict into `kwargs`. Consumes `mapping`.
    fn extend_from_mapping(&mut self, callee: &Value, mapping: Value, kwargs: &mut Kwargs) -> RunResult<()> {
        let entries: Option<Vec<(Option<String>, Value)>> = match &mapping {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Dict(dict) => Some(
                    dict.iter()
                        .map(|(key, value)| (key.as_str(&self.heap).map(str::to_owned), value.copy_for_extend()))
                        .collect(),
                ),
                _ => None,
            },
            _ => None,
        };
        let Some(entries) = entries else {
            let description = self.describe_callee(callee);
            mapping.drop_with_heap(&mut self.heap);
            return Err(ExcType::type_error_star_kwargs(&description));
        };
        for (_, value) in &entries {
            self.heap.retain_all(std::slice::from_ref(value));
        }
        mapping.drop_with_heap(&mut self.heap);

        let mut entries = entries.into_iter();
        while let Some((key, value)) = entries.next() {
            let failure = match key {
                Some(name) => match kwargs.insert(name, value) {
                    Ok(()) => continue,
                    Err((name, value)) => {
                        value.drop_with_heap(&mut self.heap);
                        ExcType::type_error_multiple_values(&self.describe_callee(callee), &name)
                    }
                },
                None => {
                    value.drop_with_heap(&mut self.heap);
                    ExcType::type_error_keywords_not_strings(&self.describe_callee(callee))
                }
            };
            self.release_all(entries.map(|(_, value)| value));
            return Err(failure);
        }
        Ok(())
    }

    /// The items of a `*args` operand. Consumes `sequence`.
    fn star_items(&mut self, callee: &Value, sequence: Value) -> RunResult<Vec<Value>> {
        let tuple_items = match &sequence {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Tuple(tuple) => Some(tuple.as_slice().iter().map(Value::copy_for_extend).collect::<Vec<_>>()),
                _ => None,
            },
            _ => None,
        };
        if let Some(items) = tuple_items {
            self.heap.retain_all(&items);
            sequence.drop_with_heap(&mut self.heap);
            return Ok(items);
        }
        match self.collect_iterable(sequence) {
            Ok(items) => Ok(items),
            Err(err) if err.matches(ExcType::TypeError, &self.heap) => {
                err.drop_with_heap(&mut self.heap);
                Err(ExcType::type_error_star_args(&self.describe_callee(callee)))
            }
            Err(err) => Err(err),
        }
    }

    /// Calls a simple function whose positionals map one to one onto its
    /// first fast locals.
    fn call_fast(&mut self, callee: Value, args: Vec<Value>) -> RunResult<Value> {
        let parts = match &callee {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Function(function) => Some((Rc::clone(&function.code), function.globals)),
                _ => None,
            },
            _ => None,
        };
        let Some((code, globals)) = parts else {
            callee.drop_with_heap(&mut self.heap);
            self.release_all(args);
            return Err(RunError::internal("fast call on a non-function"));
        };
        self.heap.inc_ref(globals);
        callee.drop_with_heap(&mut self.heap);
        let mut frame = match self.new_frame(code, globals) {
            Ok(frame) => frame,
            Err(err) => {
                self.release_all(args);
                return Err(err);
            }
        };
        for (slot, arg) in frame.fast_locals.iter_mut().zip(args) {
            *slot = arg;
        }
        self.eval_frame(frame)
    }

    /// Binds arguments for a user function and runs it, or returns a
    /// generator for generator code.
    fn call_function(&mut self, callee: Value, func_id: HeapId, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
        let (code, globals, defaults, closure) = match self.heap.get(func_id) {
            HeapData::Function(function) => (
                Rc::clone(&function.code),
                function.globals,
                function.defaults.iter().map(Value::copy_for_extend).collect::<Vec<_>>(),
                function.closure.clone(),
            ),
            _ => {
                callee.drop_with_heap(&mut self.heap);
                self.release_all(args);
                kwargs.drop_with_heap(&mut self.heap);
                return Err(RunError::internal("function call on a non-function"));
            }
        };
        self.heap.inc_ref(globals);
        self.heap.retain_all(&defaults);
        for cell in &closure {
            self.heap.inc_ref(*cell);
        }
        callee.drop_with_heap(&mut self.heap);

        let frame = self.bind_arguments(code, globals, defaults, closure, args, kwargs)?;
        if frame.code.flags().contains(CodeFlags::GENERATOR) {
            let id = self.heap.allocate(HeapData::Generator(Generator::new(frame)))?;
            log::trace!("created generator {id:?}");
            return Ok(Value::Ref(id));
        }
        self.eval_frame(frame)
    }

    /// Builds the callee frame. Takes ownership of every argument.
    fn bind_arguments(
        &mut self,
        code: Rc<Code>,
        globals: HeapId,
        defaults: Vec<Value>,
        closure: Vec<HeapId>,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> RunResult<Frame> {
        let mut frame = match self.new_frame(Rc::clone(&code), globals) {
            Ok(frame) => frame,
            Err(err) => {
                self.release_all(defaults);
                self.release_all(args);
                kwargs.drop_with_heap(&mut self.heap);
                for cell in closure {
                    self.heap.dec_ref(cell);
                }
                return Err(err);
            }
        };
        let mut bound = self.bind_into(&mut frame, &code, &defaults, args, kwargs);
        if bound.is_ok() {
            bound = self.init_cells(&mut frame, &code);
        }
        self.release_all(defaults);
        frame.cells.extend(closure);
        match bound {
            Ok(()) => Ok(frame),
            Err(err) => {
                frame.drop_with_heap(&mut self.heap);
                Err(err)
            }
        }
    }

    /// Places positionals, keywords, defaults and the `*args`/`**kwargs`
    /// collectors into the frame's fast locals.
    fn bind_into(
        &mut self,
        frame: &mut Frame,
        code: &Code,
        defaults: &[Value],
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> RunResult<()> {
        let name = code.name();
        let argcount = code.argcount();
        let flags = code.flags();
        let has_varargs = flags.contains(CodeFlags::VARARGS);
        let has_varkw = flags.contains(CodeFlags::VARKEYWORDS);
        let nargs = args.len();
        let nkw = kwargs.len();
        let defcount = defaults.len();

        let total_args = argcount + usize::from(has_varargs) + usize::from(has_varkw);
        if total_args > frame.fast_locals.len() {
            self.release_all(args);
            kwargs.drop_with_heap(&mut self.heap);
            return Err(RunError::internal(format!(
                "code object '{name}' declares more arguments than locals"
            )));
        }

        if total_args == 0 {
            if nargs + nkw > 0 {
                self.release_all(args);
                kwargs.drop_with_heap(&mut self.heap);
                return Err(ExcType::type_error_no_args(name, nargs + nkw));
            }
            return Ok(());
        }

        let mut kwdict = None;
        if has_varkw {
            let id = match self.heap.allocate(HeapData::Dict(Dict::new())) {
                Ok(id) => id,
                Err(err) => {
                    self.release_all(args);
                    kwargs.drop_with_heap(&mut self.heap);
                    return Err(err.into());
                }
            };
            frame.fast_locals[argcount + usize::from(has_varargs)] = Value::Ref(id);
            kwdict = Some(id);
        }

        if nargs > argcount && !has_varargs {
            self.release_all(args);
            kwargs.drop_with_heap(&mut self.heap);
            let qualifier = if defcount > 0 { "at most" } else { "exactly" };
            return Err(ExcType::type_error_arg_count(name, qualifier, argcount, nargs + nkw));
        }

        let mut args = args.into_iter();
        for (slot, arg) in frame.fast_locals[..argcount].iter_mut().zip(args.by_ref()) {
            *slot = arg;
        }
        if has_varargs {
            let extra: Vec<Value> = args.collect();
            match self.heap.allocate(HeapData::Tuple(Tuple::new(extra))) {
                Ok(id) => frame.fast_locals[argcount] = Value::Ref(id),
                Err(err) => {
                    kwargs.drop_with_heap(&mut self.heap);
                    return Err(err.into());
                }
            }
        }

        let params = &code.varnames()[..argcount];
        let mut keywords = kwargs.into_iter();
        while let Some((key, value)) = keywords.next() {
            let failure = match params.iter().position(|param| *param == key) {
                Some(slot) if frame.fast_locals[slot].is_undefined() => {
                    frame.fast_locals[slot] = value;
                    continue;
                }
                Some(_) => {
                    value.drop_with_heap(&mut self.heap);
                    ExcType::type_error_multiple_values(&format!("{name}()"), &key)
                }
                None => match kwdict {
                    Some(dict_id) => match dict_set_str(&mut self.heap, dict_id, &key, value) {
                        Ok(()) => continue,
                        Err(err) => err,
                    },
                    None => {
                        value.drop_with_heap(&mut self.heap);
                        ExcType::type_error_unexpected_keyword(name, &key)
                    }
                },
            };
            self.release_all(keywords.map(|(_, value)| value));
            return Err(failure);
        }

        if nargs < argcount {
            let required = argcount.saturating_sub(defcount);
            if frame.fast_locals[nargs.min(required)..required].iter().any(Value::is_undefined) {
                let given = frame.fast_locals[..argcount].iter().filter(|v| !v.is_undefined()).count();
                let qualifier = if has_varargs || defcount > 0 { "at least" } else { "exactly" };
                return Err(ExcType::type_error_arg_count(name, qualifier, required, given));
            }
            for (i, default) in defaults.iter().enumerate() {
                let Some(slot) = (argcount + i).checked_sub(defcount) else {
                    continue;
                };
                if slot >= nargs && frame.fast_locals[slot].is_undefined() {
                    frame.fast_locals[slot] = default.clone_with_heap(&mut self.heap);
                }
            }
        }
        Ok(())
    }

    /// Creates the frame's own cells. A cell named like an argument starts
    /// with that argument's value.
    pub(crate) fn init_cells(&mut self, frame: &mut Frame, code: &Code) -> RunResult<()> {
        let flags = code.flags();
        let total_args = (code.argcount()
            + usize::from(flags.contains(CodeFlags::VARARGS))
            + usize::from(flags.contains(CodeFlags::VARKEYWORDS)))
        .min(frame.fast_locals.len());
        for cell_name in code.cellvars() {
            let initial = match code.varnames()[..total_args].iter().position(|arg| arg == cell_name) {
                Some(slot) => frame.fast_locals[slot].clone_with_heap(&mut self.heap),
                None => Value::Undefined,
            };
            let cell = self.heap.allocate(HeapData::Cell(initial))?;
            frame.cells.push(cell);
        }
        Ok(())
    }

    /// Calling a class: creates the instance and runs `__init__` on it.
    fn construct_instance(
        &mut self,
        callee: Value,
        class_id: HeapId,
        mut args: Vec<Value>,
        kwargs: Kwargs,
    ) -> RunResult<Value> {
        let init = class_lookup(&self.heap, class_id, "__init__");
        if let Some(init) = &init {
            self.heap.retain_all(std::slice::from_ref(init));
        }
        // without `__init__`, exception classes keep their positional args like builtin exceptions do
        let keeps_args = init.is_none() && class_exc_base(&self.heap, class_id).is_some();
        let accepts = init.is_some() || (keeps_args && kwargs.is_empty()) || (args.is_empty() && kwargs.is_empty());
        if !accepts {
            callee.drop_with_heap(&mut self.heap);
            self.release_all(args);
            kwargs.drop_with_heap(&mut self.heap);
            return Err(ExcType::type_error("this constructor takes no arguments"));
        }
        self.heap.inc_ref(class_id);
        callee.drop_with_heap(&mut self.heap);
        let allocated = self.heap.allocate(HeapData::Instance(Instance {
            class: class_id,
            attrs: Dict::new(),
        }));
        let instance = match allocated {
            Ok(id) => Value::Ref(id),
            Err(err) => {
                if let Some(init) = init {
                    init.drop_with_heap(&mut self.heap);
                }
                self.release_all(args);
                kwargs.drop_with_heap(&mut self.heap);
                return Err(err.into());
            }
        };
        let Some(init) = init else {
            if keeps_args {
                let stored = match self.heap.allocate(HeapData::Tuple(Tuple::new(args))) {
                    Ok(id) => self.set_attr(&instance, "args", Value::Ref(id)),
                    Err(err) => Err(err.into()),
                };
                if let Err(err) = stored {
                    instance.drop_with_heap(&mut self.heap);
                    return Err(err);
                }
            }
            return Ok(instance);
        };
        args.insert(0, instance.clone_with_heap(&mut self.heap));
        match self.call_value(init, args, kwargs) {
            Ok(Value::None) => Ok(instance),
            Ok(other) => {
                other.drop_with_heap(&mut self.heap);
                instance.drop_with_heap(&mut self.heap);
                Err(ExcType::type_error("__init__() should return None"))
            }
            Err(err) => {
                instance.drop_with_heap(&mut self.heap);
                Err(err)
            }
        }
    }

    /// Calling a builtin exception class.
    fn construct_exception(&mut self, exc_type: ExcType, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
        if !kwargs.is_empty() {
            self.release_all(args);
            kwargs.drop_with_heap(&mut self.heap);
            return Err(ExcType::type_error(format!("{exc_type} does not take keyword arguments")));
        }
        let exc = match args.as_slice() {
            [] => SimpleException::new_none(exc_type),
            [single] => SimpleException::new_msg(exc_type, single.py_str(&self.heap)),
            many => {
                let items: Vec<String> = many.iter().map(|arg| arg.py_repr(&self.heap)).collect();
                SimpleException::new_msg(exc_type, format!("({})", items.join(", ")))
            }
        };
        self.release_all(args);
        Ok(Value::Ref(self.heap.allocate(HeapData::Exception(exc))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{CodeBuilder, Const},
        heap::Heap,
        io::NoPrint,
        resource::NoLimitTracker,
    };

    fn vm() -> VM<NoLimitTracker, NoPrint> {
        VM::new(Heap::new(64, NoLimitTracker), NoPrint).unwrap()
    }

    /// `def name(params): return <last param>` as a function value.
    fn function(vm: &mut VM<NoLimitTracker, NoPrint>, builder: CodeBuilder, defaults: Vec<Value>) -> Value {
        let code = Rc::new(builder.build().unwrap());
        let globals = vm.heap.allocate(HeapData::Dict(Dict::new())).unwrap();
        let function = crate::types::Function {
            code,
            globals,
            defaults,
            closure: vec![],
        };
        Value::Ref(vm.heap.allocate(HeapData::Function(function)).unwrap())
    }

    fn message(err: RunError) -> String {
        let RunError::Exc(exc) = err else { panic!("expected a simple exception") };
        exc.arg().unwrap_or_default().to_owned()
    }

    #[test]
    fn keyword_binding_and_defaults() {
        let mut vm = vm();
        let mut builder = CodeBuilder::function("f", &["x", "y"]);
        builder.load_fast("y").return_value();
        let f = function(&mut vm, builder, vec![Value::Int(10)]);

        let callee = f.clone_with_heap(&mut vm.heap);
        let result = vm.call_value(callee, vec![Value::Int(1)], Kwargs::new()).unwrap();
        assert!(matches!(result, Value::Int(10)));

        let mut kwargs = Kwargs::new();
        kwargs.insert("y".to_owned(), Value::Int(2)).unwrap();
        let callee = f.clone_with_heap(&mut vm.heap);
        let result = vm.call_value(callee, vec![Value::Int(1)], kwargs).unwrap();
        assert!(matches!(result, Value::Int(2)));

        let mut kwargs = Kwargs::new();
        kwargs.insert("x".to_owned(), Value::Int(2)).unwrap();
        let callee = f.clone_with_heap(&mut vm.heap);
        let err = vm.call_value(callee, vec![Value::Int(1)], kwargs).unwrap_err();
        assert_eq!(message(err), "f() got multiple values for keyword argument 'x'");

        let callee = f.clone_with_heap(&mut vm.heap);
        let err = vm.call_value(callee, vec![], Kwargs::new()).unwrap_err();
        assert_eq!(message(err), "f() takes at least 1 argument (0 given)");

        let callee = f.clone_with_heap(&mut vm.heap);
        let args = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let err = vm.call_value(callee, args, Kwargs::new()).unwrap_err();
        assert_eq!(message(err), "f() takes at most 2 arguments (3 given)");
        f.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn unexpected_keyword_and_zero_params() {
        let mut vm = vm();
        let mut builder = CodeBuilder::function("g", &[]);
        builder.load_const(Const::None).return_value();
        let g = function(&mut vm, builder, vec![]);

        let mut kwargs = Kwargs::new();
        kwargs.insert("z".to_owned(), Value::Int(1)).unwrap();
        let callee = g.clone_with_heap(&mut vm.heap);
        let err = vm.call_value(callee, vec![], kwargs).unwrap_err();
        assert_eq!(message(err), "g() takes no arguments (1 given)");

        let mut builder = CodeBuilder::function("h", &["a"]);
        builder.load_const(Const::None).return_value();
        let h = function(&mut vm, builder, vec![]);
        let mut kwargs = Kwargs::new();
        kwargs.insert("a".to_owned(), Value::Int(1)).unwrap();
        kwargs.insert("b".to_owned(), Value::Int(2)).unwrap();
        let callee = h.clone_with_heap(&mut vm.heap);
        let err = vm.call_value(callee, vec![], kwargs).unwrap_err();
        assert_eq!(message(err), "h() got an unexpected keyword argument 'b'");
        g.drop_with_heap(&mut vm.heap);
        h.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn varargs_collect_extras() {
        let mut vm = vm();
        let mut builder = CodeBuilder::function("v", &["a"]);
        builder.varargs("rest").varkeywords("kw");
        builder.load_fast("rest").return_value();
        let v = function(&mut vm, builder, vec![]);
        let mut kwargs = Kwargs::new();
        kwargs.insert("extra".to_owned(), Value::Int(9)).unwrap();
        let callee = v.clone_with_heap(&mut vm.heap);
        let rest = vm
            .call_value(callee, vec![Value::Int(1), Value::Int(2), Value::Int(3)], kwargs)
            .unwrap();
        assert_eq!(rest.py_repr(&vm.heap), "(2, 3)");
        rest.drop_with_heap(&mut vm.heap);
        v.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn calling_an_int_fails() {
        let mut vm = vm();
        let err = vm.call_value(Value::Int(3), vec![], Kwargs::new()).unwrap_err();
        assert_eq!(message(err), "'int' object is not callable");
    }
}
