//! Constants, sequence building, functions, classes and `FOR_ITER`.

use std::rc::Rc;

use super::{Frame, VM, signal::Signal};
use crate::{
    builtins::Builtins,
    bytecode::code::{Code, Const},
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::{Class, Function, List, Tuple},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    pub(super) fn load_const(&mut self, frame: &mut Frame, code: &Code, arg: u16) -> RunResult<()> {
        let Some(constant) = code.constants().get(usize::from(arg)) else {
            return Err(RunError::internal(format!(
                "constant index {arg} out of range in '{}'",
                code.name()
            )));
        };
        let value = self.const_value(constant)?;
        frame.push(value);
        Ok(())
    }

    fn const_value(&mut self, constant: &Const) -> RunResult<Value> {
        Ok(match constant {
            Const::None => Value::None,
            Const::Bool(b) => Value::Bool(*b),
            Const::Int(i) => Value::Int(*i),
            Const::Float(f) => Value::Float(*f),
            Const::Str(s) => self.new_str(s)?,
            Const::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.const_value(item) {
                        Ok(value) => values.push(value),
                        Err(err) => {
                            self.release_all(values);
                            return Err(err);
                        }
                    }
                }
                Value::Ref(self.heap.allocate(HeapData::Tuple(Tuple::new(values)))?)
            }
            Const::Code(code) => Value::Ref(self.heap.allocate(HeapData::Code(Rc::clone(code)))?),
        })
    }

    /// `BUILD_TUPLE` / `BUILD_LIST`: the top `count` entries, bottom first.
    pub(super) fn build_sequence(&mut self, frame: &mut Frame, count: u16, is_list: bool) -> RunResult<()> {
        let items = frame.pop_n(usize::from(count));
        let data = if is_list {
            HeapData::List(List::new(items))
        } else {
            HeapData::Tuple(Tuple::new(items))
        };
        let id = self.heap.allocate(data)?;
        frame.push(Value::Ref(id));
        Ok(())
    }

    /// `MAKE_FUNCTION(n)` pops the code and `n` defaults; `MAKE_CLOSURE(n)`
    /// also pops a tuple of cells between them.
    pub(super) fn make_function(&mut self, frame: &mut Frame, ndefaults: u16, closure: bool) -> RunResult<()> {
        let code_value = frame.pop();
        let code = match code_value.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Code(code)) => Some(Rc::clone(code)),
            _ => None,
        };
        code_value.drop_with_heap(&mut self.heap);
        let Some(code) = code else {
            return Err(RunError::internal("MAKE_FUNCTION expects a code object"));
        };

        let cells = if closure {
            let cells_value = frame.pop();
            let cells = self.closure_cells(&cells_value, &code);
            cells_value.drop_with_heap(&mut self.heap);
            cells?
        } else {
            Vec::new()
        };
        let defaults = frame.pop_n(usize::from(ndefaults));

        self.heap.inc_ref(frame.globals);
        let function = Function {
            code,
            globals: frame.globals,
            defaults,
            closure: cells,
        };
        let id = self.heap.allocate(HeapData::Function(function))?;
        frame.push(Value::Ref(id));
        Ok(())
    }

    /// Takes a reference to every cell in a closure tuple.
    fn closure_cells(&mut self, cells: &Value, code: &Code) -> RunResult<Vec<HeapId>> {
        let ids: Option<Vec<HeapId>> = match cells.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Tuple(tuple)) => tuple
                .as_slice()
                .iter()
                .map(|cell| cell.ref_id().filter(|id| matches!(self.heap.get(*id), HeapData::Cell(_))))
                .collect(),
            _ => None,
        };
        let Some(ids) = ids.filter(|ids| ids.len() == code.freevars().len()) else {
            return Err(RunError::internal(format!(
                "MAKE_CLOSURE for '{}' expects a tuple of {} cells",
                code.name(),
                code.freevars().len()
            )));
        };
        for &id in &ids {
            self.heap.inc_ref(id);
        }
        Ok(ids)
    }

    /// `BUILD_CLASS`: TOS is the methods dict, TOS1 the bases tuple and TOS2
    /// the class name.
    pub(super) fn build_class(&mut self, frame: &mut Frame) -> RunResult<()> {
        let methods = frame.pop();
        let bases = frame.pop();
        let name = frame.pop();
        let class = self.new_class(&name, &bases, &methods);
        self.release_all([methods, bases, name]);
        let id = self.heap.allocate(HeapData::Class(class?))?;
        frame.push(Value::Ref(id));
        Ok(())
    }

    fn new_class(&mut self, name: &Value, bases: &Value, methods: &Value) -> RunResult<Class> {
        let Some(class_name) = name.as_str(&self.heap).map(str::to_owned) else {
            return Err(ExcType::type_error("class name must be a string"));
        };
        let mut exc_base = None;
        let base_ids: Vec<HeapId> = match bases.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Tuple(tuple)) => {
                let mut ids = Vec::with_capacity(tuple.len());
                for base in tuple.as_slice() {
                    match base {
                        Value::Builtin(Builtins::ExcType(exc_type)) => {
                            exc_base = exc_base.or(Some(*exc_type));
                        }
                        Value::Ref(id) => match self.heap.get(*id) {
                            HeapData::Class(class) => {
                                exc_base = exc_base.or(class.exc_base);
                                ids.push(*id);
                            }
                            _ => return Err(ExcType::type_error("base must be a class")),
                        },
                        _ => return Err(ExcType::type_error("base must be a class")),
                    }
                }
                ids
            }
            _ => return Err(ExcType::type_error("bases must be a tuple")),
        };
        let Some(methods_id) = methods
            .ref_id()
            .filter(|id| matches!(self.heap.get(*id), HeapData::Dict(_)))
        else {
            return Err(ExcType::type_error("class body must produce a dict"));
        };

        let attrs = self.heap.with_entry_mut(methods_id, |heap, data| match data {
            HeapData::Dict(dict) => Some(dict.clone_with_heap(heap)),
            _ => None,
        });
        let Some(attrs) = attrs else {
            return Err(RunError::internal("class methods mapping changed type"));
        };
        for &id in &base_ids {
            self.heap.inc_ref(id);
        }
        log::trace!("build class '{class_name}' with {} bases", base_ids.len());
        Ok(Class {
            name: class_name,
            bases: base_ids,
            exc_base,
            attrs,
        })
    }

    /// `FOR_ITER`: pushes the next item, or pops the exhausted iterator.
    ///
    /// On error the iterator stays on the stack for the unwind to release.
    pub(super) fn for_iter(&mut self, frame: &mut Frame) -> RunResult<Signal> {
        let Some(id) = frame.peek().ref_id() else {
            return Err(RunError::internal("FOR_ITER expects an iterator on the stack"));
        };
        match self.iter_next(id)? {
            Some(item) => {
                frame.push(item);
                Ok(Signal::Normal)
            }
            None => {
                frame.pop().drop_with_heap(&mut self.heap);
                Ok(Signal::IterationEnded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::CodeBuilder,
        heap::Heap,
        io::NoPrint,
        resource::NoLimitTracker,
        types::Dict,
    };

    fn vm() -> VM<NoLimitTracker, NoPrint> {
        VM::new(Heap::new(64, NoLimitTracker), NoPrint).unwrap()
    }

    fn module_frame(vm: &mut VM<NoLimitTracker, NoPrint>, code: Code) -> Frame {
        let globals = vm.heap.allocate(HeapData::Dict(Dict::new())).unwrap();
        vm.new_frame(Rc::new(code), globals).unwrap()
    }

    #[test]
    fn nested_tuple_constant() {
        let mut vm = vm();
        let mut builder = CodeBuilder::new("<module>");
        builder.load_const(Const::Tuple(vec![Const::Int(1), Const::Str("a".to_owned())]));
        let code = builder.build().unwrap();
        let mut frame = module_frame(&mut vm, code.clone());
        vm.load_const(&mut frame, &code, 0).unwrap();
        let value = frame.pop();
        assert_eq!(value.py_repr(&vm.heap), "(1, 'a')");
        value.drop_with_heap(&mut vm.heap);
        assert!(vm.load_const(&mut frame, &code, 9).is_err());
        frame.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn function_takes_defaults_in_order() {
        let mut vm = vm();
        let mut body = CodeBuilder::function("f", &["a", "b"]);
        body.load_fast("b").return_value();
        let body = Rc::new(body.build().unwrap());
        let mut frame = module_frame(&mut vm, CodeBuilder::new("<module>").build().unwrap());

        frame.push(Value::Int(1));
        frame.push(Value::Int(2));
        let code_id = vm.heap.allocate(HeapData::Code(body)).unwrap();
        frame.push(Value::Ref(code_id));
        vm.make_function(&mut frame, 2, false).unwrap();
        let function = frame.pop();
        let HeapData::Function(f) = vm.heap.get(function.ref_id().unwrap()) else { panic!("not a function") };
        assert!(matches!(f.defaults.as_slice(), [Value::Int(1), Value::Int(2)]));
        assert_eq!(f.name(), "f");
        function.drop_with_heap(&mut vm.heap);
        frame.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn class_bases_must_be_classes() {
        let mut vm = vm();
        let mut frame = module_frame(&mut vm, CodeBuilder::new("<module>").build().unwrap());
        let name = vm.new_str("C").unwrap();
        frame.push(name);
        let bases = vm.heap.allocate(HeapData::Tuple(Tuple::new(vec![Value::Int(1)]))).unwrap();
        frame.push(Value::Ref(bases));
        let methods = vm.heap.allocate(HeapData::Dict(Dict::new())).unwrap();
        frame.push(Value::Ref(methods));
        let err = vm.build_class(&mut frame).unwrap_err();
        let RunError::Exc(exc) = err else { panic!("expected a TypeError") };
        assert_eq!(exc.arg(), Some("base must be a class"));
        assert_eq!(frame.stack_len(), 0);
        frame.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn exception_base_is_inherited() {
        fn build(vm: &mut VM<NoLimitTracker, NoPrint>, frame: &mut Frame, name: &str, base: Value) -> Value {
            let name = vm.new_str(name).unwrap();
            frame.push(name);
            let bases = vm.heap.allocate(HeapData::Tuple(Tuple::new(vec![base]))).unwrap();
            frame.push(Value::Ref(bases));
            let methods = vm.heap.allocate(HeapData::Dict(Dict::new())).unwrap();
            frame.push(Value::Ref(methods));
            vm.build_class(frame).unwrap();
            frame.pop()
        }
        let mut vm = vm();
        let mut frame = module_frame(&mut vm, CodeBuilder::new("<module>").build().unwrap());
        let parent = build(&mut vm, &mut frame, "E", Value::Builtin(Builtins::ExcType(ExcType::KeyError)));
        let child_base = parent.clone_with_heap(&mut vm.heap);
        let child = build(&mut vm, &mut frame, "F", child_base);

        let HeapData::Class(class) = vm.heap.get(child.ref_id().unwrap()) else { panic!("expected a class") };
        assert_eq!(class.exc_base, Some(ExcType::KeyError));
        assert_eq!(class.bases.len(), 1);
        assert!(vm.exception_matches(&child, &Value::Builtin(Builtins::ExcType(ExcType::LookupError))));
        assert!(!vm.exception_matches(&child, &Value::Builtin(Builtins::ExcType(ExcType::ValueError))));

        vm.release_all([child, parent]);
        frame.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn for_iter_pops_exhausted_iterator() {
        let mut vm = vm();
        let mut frame = module_frame(&mut vm, CodeBuilder::new("<module>").build().unwrap());
        let list = vm.heap.allocate(HeapData::List(List::new(vec![Value::Int(5)]))).unwrap();
        let iter = vm.get_iter(Value::Ref(list)).unwrap();
        frame.push(iter);
        assert!(matches!(vm.for_iter(&mut frame).unwrap(), Signal::Normal));
        assert!(matches!(frame.pop(), Value::Int(5)));
        assert!(matches!(vm.for_iter(&mut frame).unwrap(), Signal::IterationEnded));
        assert_eq!(frame.stack_len(), 0);
        frame.drop_with_heap(&mut vm.heap);
    }
}
