//! `IMPORT_NAME`, `IMPORT_FROM` and `IMPORT_STAR`.

use super::{Frame, VM};
use crate::{
    args::Kwargs,
    exception_private::{ExcType, RunResult},
    heap::HeapData,
    io::PrintWriter,
    resource::ResourceTracker,
    types::dict::dict_get_str,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    /// Pops the fromlist, replaces the level on top with the imported module.
    pub(super) fn import_name(&mut self, frame: &mut Frame, name: &str) -> RunResult<()> {
        let Some(import) = dict_get_str(&mut self.heap, frame.builtins, "__import__") else {
            return Err(ExcType::import_error("__import__ not found"));
        };
        let fromlist = frame.pop();
        let level = frame.pop();

        let mut args = Vec::with_capacity(5);
        match self.new_str(name) {
            Ok(name) => args.push(name),
            Err(err) => {
                self.release_all([import, fromlist, level]);
                return Err(err);
            }
        }
        self.heap.inc_ref(frame.globals);
        args.push(Value::Ref(frame.globals));
        args.push(match frame.locals {
            Some(locals) => {
                self.heap.inc_ref(locals);
                Value::Ref(locals)
            }
            None => Value::None,
        });
        args.push(fromlist);
        if matches!(level, Value::Int(-1)) {
            level.drop_with_heap(&mut self.heap);
        } else {
            args.push(level);
        }

        let module = self.call_value(import, args, Kwargs::default())?;
        frame.push(module);
        Ok(())
    }

    /// Pushes `name` loaded from the module on top of the stack.
    pub(super) fn import_from(&mut self, frame: &mut Frame, name: &str) -> RunResult<()> {
        let module = frame.peek().clone_with_heap(&mut self.heap);
        match self.load_attr(module, name) {
            Ok(value) => {
                frame.push(value);
                Ok(())
            }
            Err(err) if err.matches(ExcType::AttributeError, &self.heap) => {
                err.drop_with_heap(&mut self.heap);
                Err(ExcType::import_error(format!("cannot import name {name}")))
            }
            Err(err) => Err(err),
        }
    }

    /// Binds the module's `__all__`, or every public attribute, in the locals.
    pub(super) fn import_star(&mut self, frame: &mut Frame) -> RunResult<()> {
        let module = frame.pop();
        let bindings = self.star_bindings(&module);
        module.drop_with_heap(&mut self.heap);
        let bindings = bindings?;
        if frame.locals.is_none() {
            self.release_all(bindings.into_iter().map(|(_, value)| value));
            return Err(ExcType::system_error("no locals found during 'import *'"));
        }

        let mut bindings = bindings.into_iter();
        while let Some((name, value)) = bindings.next() {
            if let Err(err) = self.store_local(frame, &name, value) {
                self.release_all(bindings.map(|(_, value)| value));
                return Err(err);
            }
        }
        Ok(())
    }

    /// The `(name, value)` pairs `import *` binds, each value an owned reference.
    fn star_bindings(&mut self, module: &Value) -> RunResult<Vec<(String, Value)>> {
        let Some((id, HeapData::Module(m))) = module.ref_id().map(|id| (id, self.heap.get(id))) else {
            return Err(ExcType::import_error(
                "from-import-* object has no __dict__ and no __all__",
            ));
        };

        let names: Vec<String> = match m.attrs.get_str("__all__").and_then(Value::ref_id) {
            Some(all) => {
                let items = match self.heap.get(all) {
                    HeapData::List(list) => list.as_slice(),
                    HeapData::Tuple(tuple) => tuple.as_slice(),
                    _ => return Err(ExcType::type_error("__all__ must be a list or tuple of strings")),
                };
                items
                    .iter()
                    .map(|item| {
                        item.as_str(&self.heap)
                            .map(str::to_owned)
                            .ok_or_else(|| ExcType::type_error("__all__ must be a list or tuple of strings"))
                    })
                    .collect::<RunResult<_>>()?
            }
            None => m
                .attrs
                .iter()
                .filter_map(|(key, _)| key.as_str(&self.heap))
                .filter(|name| !name.starts_with('_'))
                .map(str::to_owned)
                .collect(),
        };

        let mut bindings = Vec::with_capacity(names.len());
        for name in names {
            let found = match self.heap.get(id) {
                HeapData::Module(m) => m.attrs.get_str(&name).map(Value::copy_for_extend),
                _ => None,
            };
            let Some(value) = found else {
                #[cfg(feature = "dec-ref-check")]
                std::mem::forget(bindings);
                return Err(ExcType::attribute_error_msg(format!(
                    "'module' object has no attribute '{name}'"
                )));
            };
            bindings.push((name, value));
        }
        for (_, value) in &bindings {
            self.heap.retain_all(std::slice::from_ref(value));
        }
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        bytecode::CodeBuilder,
        exception_private::RunError,
        heap::Heap,
        io::NoPrint,
        resource::NoLimitTracker,
        types::{Dict, DictKey, Module, dict::{allocate_str, dict_set_str}},
    };

    fn vm() -> VM<NoLimitTracker, NoPrint> {
        VM::new(Heap::new(64, NoLimitTracker), NoPrint).unwrap()
    }

    fn message(err: RunError) -> String {
        let RunError::Exc(exc) = err else { panic!("expected a simple exception") };
        exc.arg().unwrap_or_default().to_owned()
    }

    fn register(vm: &mut VM<NoLimitTracker, NoPrint>) {
        let id = vm.heap.allocate(HeapData::Module(Module::new("shapes"))).unwrap();
        let value = vm.new_str("square").unwrap();
        vm.heap.with_entry_mut(id, |heap, data| {
            let HeapData::Module(module) = data else { unreachable!() };
            for (name, value) in [("name", value), ("sides", Value::Int(4)), ("_hidden", Value::None)] {
                let key = allocate_str(heap, name).unwrap();
                assert!(module.attrs.insert(DictKey::str(name), key, value).is_none());
            }
        });
        vm.modules.insert("shapes".to_owned(), id);
    }

    fn module_frame(vm: &mut VM<NoLimitTracker, NoPrint>) -> Frame {
        let code = Rc::new(CodeBuilder::new("<module>").build().unwrap());
        let globals = vm.heap.allocate(HeapData::Dict(Dict::new())).unwrap();
        vm.new_frame(code, globals).unwrap()
    }

    #[test]
    fn import_from_and_star() {
        let mut vm = vm();
        register(&mut vm);
        let mut frame = module_frame(&mut vm);

        frame.push(Value::Int(-1));
        frame.push(Value::None);
        vm.import_name(&mut frame, "shapes").unwrap();
        vm.import_from(&mut frame, "sides").unwrap();
        assert!(matches!(frame.pop(), Value::Int(4)));
        let err = vm.import_from(&mut frame, "circle").unwrap_err();
        assert_eq!(message(err), "cannot import name circle");

        vm.import_star(&mut frame).unwrap();
        let globals = frame.globals;
        let name = dict_get_str(&mut vm.heap, globals, "name").unwrap();
        assert_eq!(name.as_str(&vm.heap), Some("square"));
        name.drop_with_heap(&mut vm.heap);
        assert!(dict_get_str(&mut vm.heap, globals, "_hidden").is_none());
        frame.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn non_callable_import_hook() {
        let mut vm = vm();
        let mut frame = module_frame(&mut vm);
        let builtins = frame.builtins;
        dict_set_str(&mut vm.heap, builtins, "__import__", Value::None).unwrap();
        frame.push(Value::Int(-1));
        frame.push(Value::None);
        let err = vm.import_name(&mut frame, "shapes").unwrap_err();
        assert!(err.matches(ExcType::TypeError, &vm.heap));
        err.drop_with_heap(&mut vm.heap);
        frame.drop_with_heap(&mut vm.heap);
    }

    #[test]
    fn missing_import_hook() {
        let mut vm = vm();
        let mut frame = module_frame(&mut vm);
        let builtins = frame.builtins;
        vm.heap.with_entry_mut(builtins, |heap, data| {
            let HeapData::Dict(dict) = data else { unreachable!() };
            if let Some((key, value)) = dict.remove(&DictKey::str("__import__")) {
                key.drop_with_heap(heap);
                value.drop_with_heap(heap);
            }
        });
        frame.push(Value::Int(-1));
        frame.push(Value::None);
        let err = vm.import_name(&mut frame, "shapes").unwrap_err();
        assert_eq!(message(err), "__import__ not found");
        assert_eq!(frame.stack_len(), 2);
        frame.drop_with_heap(&mut vm.heap);
    }
}
