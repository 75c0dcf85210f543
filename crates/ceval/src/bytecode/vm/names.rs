//! Name resolution: locals, globals, builtins, fast locals and cells.

use super::{Frame, VM};
use crate::{
    bytecode::code::Code,
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::dict::{dict_get_str, dict_set_str},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    /// `LOAD_NAME`: locals, then globals, then builtins.
    pub(super) fn load_name(&mut self, frame: &Frame, name: &str) -> RunResult<Value> {
        let Some(locals) = frame.locals else {
            return Err(ExcType::system_error(format!("no locals when loading '{name}'")));
        };
        if let Some(value) = self.lookup_mapping(locals, name)? {
            return Ok(value);
        }
        if let Some(value) = dict_get_str(&mut self.heap, frame.globals, name) {
            return Ok(value);
        }
        if let Some(value) = dict_get_str(&mut self.heap, frame.builtins, name) {
            return Ok(value);
        }
        Err(ExcType::name_error(name))
    }

    /// `STORE_NAME`: binds in the locals mapping.
    pub(super) fn store_name(&mut self, frame: &mut Frame, name: &str) -> RunResult<()> {
        let value = frame.pop();
        self.store_local(frame, name, value)
    }

    /// Binds `name` in the frame's locals mapping. Consumes `value`.
    pub(super) fn store_local(&mut self, frame: &Frame, name: &str, value: Value) -> RunResult<()> {
        let Some(locals) = frame.locals else {
            value.drop_with_heap(&mut self.heap);
            return Err(ExcType::system_error(format!("no locals found when storing '{name}'")));
        };
        if matches!(self.heap.get(locals), HeapData::Dict(_)) {
            return dict_set_str(&mut self.heap, locals, name, value);
        }
        let key = match self.new_str(name) {
            Ok(key) => key,
            Err(err) => {
                value.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        self.heap.inc_ref(locals);
        let container = Value::Ref(locals);
        let result = self.set_item(&container, key, value);
        container.drop_with_heap(&mut self.heap);
        result
    }

    /// `LOAD_GLOBAL`: globals, then builtins.
    pub(super) fn load_global(&mut self, frame: &Frame, name: &str) -> RunResult<Value> {
        if let Some(value) = dict_get_str(&mut self.heap, frame.globals, name) {
            return Ok(value);
        }
        if let Some(value) = dict_get_str(&mut self.heap, frame.builtins, name) {
            return Ok(value);
        }
        Err(ExcType::global_name_error(name))
    }

    pub(super) fn store_global(&mut self, frame: &mut Frame, name: &str) -> RunResult<()> {
        let value = frame.pop();
        dict_set_str(&mut self.heap, frame.globals, name, value)
    }

    /// `LOAD_FAST`: an unbound slot raises `UnboundLocalError`.
    pub(super) fn load_fast(&mut self, frame: &mut Frame, code: &Code, arg: u16) -> RunResult<()> {
        let index = usize::from(arg);
        let value = match frame.fast_locals.get(index) {
            Some(Value::Undefined) => {
                let name = code.varnames().get(index).map_or("?", String::as_str);
                return Err(ExcType::unbound_local_error(name));
            }
            Some(value) => value.clone_with_heap(&mut self.heap),
            None => return Err(fast_index_error(code, arg)),
        };
        frame.push(value);
        Ok(())
    }

    pub(super) fn store_fast(&mut self, frame: &mut Frame, arg: u16) -> RunResult<()> {
        let value = frame.pop();
        match frame.fast_locals.get_mut(usize::from(arg)) {
            Some(slot) => {
                let old = std::mem::replace(slot, value);
                old.drop_with_heap(&mut self.heap);
                Ok(())
            }
            None => {
                value.drop_with_heap(&mut self.heap);
                Err(fast_index_error(&frame.code, arg))
            }
        }
    }

    /// `LOAD_DEREF`: an empty cell raises `UnboundLocalError` for the frame's
    /// own cells and `NameError` for cells received from the enclosing scope.
    pub(super) fn load_deref(&mut self, frame: &mut Frame, code: &Code, arg: u16) -> RunResult<()> {
        let index = usize::from(arg);
        let Some(&cell) = frame.cells.get(index) else {
            return Err(RunError::internal(format!(
                "cell index {arg} out of range in '{}'",
                code.name()
            )));
        };
        let value = self.heap.get_cell_value(cell);
        if value.is_undefined() {
            let name = code.cell_name(index).unwrap_or("?");
            return Err(if index < code.cellvars().len() {
                ExcType::unbound_local_error(name)
            } else {
                ExcType::unbound_free_error(name)
            });
        }
        frame.push(value);
        Ok(())
    }

    /// Looks `name` up in a locals mapping. A missing key is `None`, also for
    /// mappings that signal it with `KeyError`.
    fn lookup_mapping(&mut self, mapping: HeapId, name: &str) -> RunResult<Option<Value>> {
        if matches!(self.heap.get(mapping), HeapData::Dict(_)) {
            return Ok(dict_get_str(&mut self.heap, mapping, name));
        }
        let key = self.new_str(name)?;
        self.heap.inc_ref(mapping);
        let container = Value::Ref(mapping);
        let result = self.get_item(&container, &key);
        container.drop_with_heap(&mut self.heap);
        key.drop_with_heap(&mut self.heap);
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.matches(ExcType::KeyError, &self.heap) => {
                err.drop_with_heap(&mut self.heap);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

fn fast_index_error(code: &Code, arg: u16) -> RunError {
    RunError::internal(format!("fast local index {arg} out of range in '{}'", code.name()))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

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

    fn message(err: RunError) -> String {
        let RunError::Exc(exc) = err else { panic!("expected a simple exception") };
        exc.arg().unwrap_or_default().to_owned()
    }

    #[test]
    fn lookup_order_and_errors() {
        let mut vm = vm();
        let code = Rc::new(CodeBuilder::new("<module>").build().unwrap());
        let globals = vm.heap.allocate(HeapData::Dict(Dict::new())).unwrap();
        let mut frame = vm.new_frame(code, globals).unwrap();

        let len = vm.load_name(&frame, "len").unwrap();
        assert_eq!(len.py_repr(&vm.heap), "<built-in function len>");
        frame.push(Value::Int(3));
        vm.store_name(&mut frame, "len").unwrap();
        let shadowed = vm.load_global(&frame, "len").unwrap();
        assert!(matches!(shadowed, Value::Int(3)));

        let err = vm.load_name(&frame, "missing").unwrap_err();
        assert_eq!(message(err), "name 'missing' is not defined");
        let err = vm.load_global(&frame, "missing").unwrap_err();
        assert_eq!(message(err), "global name 'missing' is not defined");
        frame.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn unbound_fast_local() {
        let mut vm = vm();
        let mut builder = CodeBuilder::function("f", &["a"]);
        builder.load_fast("b");
        let code = Rc::new(builder.build().unwrap());
        let globals = vm.heap.allocate(HeapData::Dict(Dict::new())).unwrap();
        let mut frame = vm.new_frame(Rc::clone(&code), globals).unwrap();
        let err = vm.load_fast(&mut frame, &code, 1).unwrap_err();
        assert_eq!(
            message(err),
            "local variable 'b' referenced before assignment"
        );
        let err = vm.load_name(&frame, "a").unwrap_err();
        assert!(err.matches(ExcType::SystemError, &vm.heap));
        frame.drop_with_heap(&mut vm.heap);
    }
}
