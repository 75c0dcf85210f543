//! Public interface for running code objects.

use std::rc::Rc;

use crate::{
    args::Kwargs,
    bytecode::{
        Code,
        vm::{InterruptHandle, TraceHook, VM, WarningPolicy},
    },
    exception_private::{ExcInfo, RunError},
    exception_public::{EvalError, EvalException, StackFrame},
    heap::{Heap, HeapData, HeapId},
    io::{PrintWriter, StdPrint},
    object::EvalObject,
    resource::{NoLimitTracker, ResourceTracker},
    types::{
        Dict, DictKey, Module,
        class::class_exc_base,
        dict::{allocate_str, dict_get_str, dict_set_str},
    },
    value::Value,
};

/// Initial heap capacity; the arena grows past it as needed.
const HEAP_CAPACITY: usize = 256;

/// An interpreter instance: one heap, one globals dict, one execution context.
///
/// Modules run against the same globals, so a later `run_module` sees what an
/// earlier one defined.
///
/// # Example
/// ```
/// use ceval::{CodeBuilder, Const, EvalObject, Interpreter};
///
/// let mut b = CodeBuilder::new("<module>");
/// b.load_const(Const::Int(20)).load_const(Const::Int(22));
/// b.emit(ceval::Opcode::BinaryAdd).return_value();
/// let mut interp = Interpreter::new();
/// assert_eq!(interp.run_module(b.build().unwrap()).unwrap(), EvalObject::Int(42));
/// ```
#[derive(Debug)]
pub struct Interpreter<T: ResourceTracker = NoLimitTracker, P: PrintWriter = StdPrint> {
    vm: VM<T, P>,
    globals: HeapId,
}

impl Interpreter<NoLimitTracker, StdPrint> {
    /// An interpreter with no resource limits, printing to stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_print_writer(StdPrint)
    }
}

impl Default for Interpreter<NoLimitTracker, StdPrint> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PrintWriter> Interpreter<NoLimitTracker, P> {
    /// An interpreter with no resource limits and a custom print writer.
    ///
    /// # Panics
    /// Never in practice: without limits, setting up the builtins cannot fail.
    #[must_use]
    pub fn with_print_writer(print_writer: P) -> Self {
        Self::with_tracker(NoLimitTracker, print_writer).expect("an unlimited heap cannot refuse the builtins")
    }
}

impl<T: ResourceTracker, P: PrintWriter> Interpreter<T, P> {
    /// Creates an interpreter whose allocations, run time and recursion depth
    /// are checked by `tracker`.
    ///
    /// # Errors
    /// Returns `EvalError::Exception` if the limits are too tight to set up the
    /// builtins and globals.
    pub fn with_tracker(tracker: T, print_writer: P) -> Result<Self, EvalError> {
        let mut heap = Heap::new(HEAP_CAPACITY, tracker);
        let globals = heap
            .allocate(HeapData::Dict(Dict::new()))
            .map_err(|err| setup_failure(err.into()))?;
        let mut vm = VM::new(heap, print_writer).map_err(setup_failure)?;
        let name = allocate_str(&mut vm.heap, "__main__").map_err(|err| setup_failure(err.into()))?;
        dict_set_str(&mut vm.heap, globals, "__name__", name).map_err(setup_failure)?;
        Ok(Self { vm, globals })
    }

    /// Runs module-level code against the interpreter's globals and returns
    /// the value of its final `RETURN_VALUE`.
    ///
    /// # Errors
    /// `EvalError::Exception` for an exception nothing caught,
    /// `EvalError::Internal` for malformed bytecode.
    pub fn run_module(&mut self, code: Code) -> Result<EvalObject, EvalError> {
        let code = Rc::new(code);
        log::debug!("run module '{}'", code.name());
        self.vm.heap.inc_ref(self.globals);
        let result = self
            .vm
            .new_frame(Rc::clone(&code), self.globals)
            .and_then(|mut frame| match self.vm.init_cells(&mut frame, &code) {
                Ok(()) => Ok(frame),
                Err(err) => {
                    frame.drop_with_heap(&mut self.vm.heap);
                    Err(err)
                }
            })
            .and_then(|frame| self.vm.eval_frame(frame));
        self.finish(result)
    }

    /// Calls the global `name` with positional `args`.
    ///
    /// # Errors
    /// A `NameError` exception if `name` is not bound, otherwise as for
    /// [`Self::run_module`].
    pub fn call(&mut self, name: &str, args: Vec<EvalObject>) -> Result<EvalObject, EvalError> {
        let Some(callee) = dict_get_str(&mut self.vm.heap, self.globals, name) else {
            return Err(EvalError::Exception(EvalException {
                exc_type: "NameError".to_owned(),
                message: Some(format!("name '{name}' is not defined")),
                traceback: Vec::new(),
            }));
        };
        let mut values = Vec::with_capacity(args.len());
        for arg in &args {
            match arg.to_value(&mut self.vm.heap) {
                Ok(value) => values.push(value),
                Err(err) => {
                    self.vm.release_all(values);
                    callee.drop_with_heap(&mut self.vm.heap);
                    return Err(self.convert_error(err.into()));
                }
            }
        }
        let result = self.vm.call_value(callee, values, Kwargs::default());
        self.finish(result)
    }

    /// The value bound to `name` in the globals.
    #[must_use]
    pub fn global(&mut self, name: &str) -> Option<EvalObject> {
        let value = dict_get_str(&mut self.vm.heap, self.globals, name)?;
        let object = EvalObject::from_value(&value, &self.vm.heap);
        value.drop_with_heap(&mut self.vm.heap);
        Some(object)
    }

    /// Binds `name` in the globals.
    ///
    /// # Errors
    /// Fails if the value cannot be allocated or is an output-only `Repr`.
    pub fn set_global(&mut self, name: &str, value: &EvalObject) -> Result<(), EvalError> {
        let value = match value.to_value(&mut self.vm.heap) {
            Ok(value) => value,
            Err(err) => return Err(self.convert_error(err.into())),
        };
        dict_set_str(&mut self.vm.heap, self.globals, name, value).map_err(|err| self.convert_error(err))
    }

    /// Makes a module importable under `name`, replacing any earlier one.
    ///
    /// # Errors
    /// Fails if an attribute cannot be allocated.
    pub fn register_module<S: AsRef<str>>(
        &mut self,
        name: &str,
        attrs: impl IntoIterator<Item = (S, EvalObject)>,
    ) -> Result<(), EvalError> {
        let mut module = Module::new(name);
        for (attr, object) in attrs {
            let attr = attr.as_ref();
            let entry = object.to_value(&mut self.vm.heap).and_then(|value| {
                match allocate_str(&mut self.vm.heap, attr) {
                    Ok(key) => Ok((key, value)),
                    Err(err) => {
                        value.drop_with_heap(&mut self.vm.heap);
                        Err(err)
                    }
                }
            });
            let (key, value) = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    module.attrs.drop_with_heap(&mut self.vm.heap);
                    return Err(self.convert_error(err.into()));
                }
            };
            if let Some((old_key, old_value)) = module.attrs.insert(DictKey::str(attr), key, value) {
                self.vm.release_all([old_key, old_value]);
            }
        }
        let id = match self.vm.heap.allocate(HeapData::Module(module)) {
            Ok(id) => id,
            Err(err) => return Err(self.convert_error(err.into())),
        };
        log::debug!("registered module '{name}'");
        if let Some(old) = self.vm.modules.insert(name.to_owned(), id) {
            self.vm.heap.dec_ref(old);
        }
        Ok(())
    }

    /// Installs a hook called on exception propagation and native calls.
    pub fn set_trace_hook(&mut self, hook: impl TraceHook + 'static) {
        self.vm.ctx.trace_hook = Some(Box::new(hook));
    }

    pub fn clear_trace_hook(&mut self) {
        self.vm.ctx.trace_hook = None;
    }

    pub fn set_warning_policy(&mut self, policy: WarningPolicy) {
        self.vm.ctx.warning_policy = policy;
    }

    /// A handle other threads can use to raise `KeyboardInterrupt` in running code.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.vm.ctx.interrupt.clone()
    }

    #[must_use]
    pub fn print_writer(&self) -> &P {
        &self.vm.print_writer
    }

    pub fn print_writer_mut(&mut self) -> &mut P {
        &mut self.vm.print_writer
    }

    /// Whether an `except` block is still marked as handling an exception.
    /// Always `false` between runs unless the interpreter state is broken.
    #[must_use]
    pub fn has_active_exception(&self) -> bool {
        self.vm.ctx.current.is_some()
    }

    /// Number of objects alive on the heap, including the builtins, globals
    /// and registered modules.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.vm.heap.live_count()
    }

    /// Reference count of the object bound to the global `name`, `None` for
    /// unbound names and immediate values.
    #[cfg(feature = "ref-count-return")]
    #[must_use]
    pub fn global_refcount(&self, name: &str) -> Option<usize> {
        let HeapData::Dict(globals) = self.vm.heap.get(self.globals) else {
            return None;
        };
        let id = globals.get_str(name)?.ref_id()?;
        Some(self.vm.heap.get_refcount(id))
    }

    fn finish(&mut self, result: Result<Value, RunError>) -> Result<EvalObject, EvalError> {
        if let Some(info) = self.vm.ctx.pending.take() {
            info.drop_with_heap(&mut self.vm.heap);
        }
        match result {
            Ok(value) => {
                let object = EvalObject::from_value(&value, &self.vm.heap);
                value.drop_with_heap(&mut self.vm.heap);
                Ok(object)
            }
            Err(err) => Err(self.convert_error(err)),
        }
    }

    fn convert_error(&mut self, err: RunError) -> EvalError {
        let info = match err {
            RunError::Internal(msg) => {
                log::debug!("internal error: {msg}");
                return EvalError::Internal(msg.into_owned());
            }
            RunError::Exc(exc) => self.vm.materialize(exc),
            RunError::Raised(info) => info,
        };
        let exception = self.describe(&info);
        info.drop_with_heap(&mut self.vm.heap);
        log::debug!("uncaught {}", exception.summary());
        EvalError::Exception(exception)
    }

    fn describe(&self, info: &ExcInfo) -> EvalException {
        let heap = &self.vm.heap;
        let message = match &info.value {
            Value::None => None,
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Exception(exc) => exc.arg().map(str::to_owned),
                HeapData::Instance(instance) if class_exc_base(heap, instance.class).is_some() => {
                    instance.args_message(heap)
                }
                _ => Some(info.value.py_str(heap)),
            },
            other => Some(other.py_str(heap)),
        };
        let traceback = match &info.traceback {
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Traceback(tb) => tb
                    .entries()
                    .iter()
                    .map(|entry| StackFrame {
                        name: entry.name.clone(),
                        offset: entry.offset,
                    })
                    .collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        EvalException {
            exc_type: self.vm.exc_type_name(info),
            message,
            traceback,
        }
    }
}

/// Converts an error raised while the interpreter is still being set up,
/// before there is a heap to describe it with.
fn setup_failure(err: RunError) -> EvalError {
    match err {
        RunError::Internal(msg) => EvalError::Internal(msg.into_owned()),
        RunError::Exc(exc) => EvalError::Exception(EvalException {
            exc_type: exc.exc_type().to_string(),
            message: exc.arg().map(str::to_owned),
            traceback: Vec::new(),
        }),
        RunError::Raised(info) => {
            // the heap these values point into is already gone
            std::mem::forget(info);
            EvalError::Internal("interpreter setup raised a heap exception".to_owned())
        }
    }
}
