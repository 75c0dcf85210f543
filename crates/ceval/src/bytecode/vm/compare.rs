//! `COMPARE_OP`, including `in`, identity and `except` clause matching.

use std::cmp::Ordering;

use super::{Frame, VM};
use crate::{
    builtins::Builtins,
    bytecode::CompareOp,
    exception_private::{ExcType, RunResult},
    heap::HeapData,
    io::PrintWriter,
    resource::ResourceTracker,
    types::{
        DictKey,
        class::{class_derives_from, class_is_subclass},
    },
    value::{Number, Value},
};

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    pub(super) fn compare_op(&mut self, frame: &mut Frame, op: CompareOp) -> RunResult<()> {
        let right = frame.pop();
        let left = frame.pop();
        if op.is_rich()
            && let (Value::Int(a), Value::Int(b)) = (&left, &right)
        {
            frame.push(Value::Bool(ordering_holds(op, a.cmp(b))));
            return Ok(());
        }
        let result = self.compare_values(op, &left, &right);
        self.release_all([left, right]);
        frame.push(Value::Bool(result?));
        Ok(())
    }

    fn compare_values(&mut self, op: CompareOp, left: &Value, right: &Value) -> RunResult<bool> {
        match op {
            CompareOp::Eq => Ok(left.py_eq(right, &self.heap)),
            CompareOp::Ne => Ok(!left.py_eq(right, &self.heap)),
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
                if let (Some(a), Some(b)) = (left.as_number(), right.as_number())
                    && !matches!((a, b), (Number::Int(_), Number::Int(_)))
                {
                    let (a, b) = (a.as_f64(), b.as_f64());
                    return Ok(match op {
                        CompareOp::Lt => a < b,
                        CompareOp::Le => a <= b,
                        CompareOp::Gt => a > b,
                        _ => a >= b,
                    });
                }
                match left.py_cmp(right, &self.heap) {
                    Some(ordering) => Ok(ordering_holds(op, ordering)),
                    None => Err(ExcType::type_error(format!(
                        "unorderable types: {}() {} {}()",
                        left.py_type(&self.heap),
                        op.symbol(),
                        right.py_type(&self.heap)
                    ))),
                }
            }
            CompareOp::In => self.contains(right, left),
            CompareOp::NotIn => self.contains(right, left).map(|found| !found),
            CompareOp::Is => Ok(left.is(right)),
            CompareOp::IsNot => Ok(!left.is(right)),
            CompareOp::ExceptionMatch => Ok(self.exception_matches(left, right)),
        }
    }

    /// `item in container`.
    fn contains(&self, container: &Value, item: &Value) -> RunResult<bool> {
        let data = container.ref_id().map(|id| self.heap.get(id));
        match data {
            Some(HeapData::List(list)) => Ok(list.as_slice().iter().any(|v| v.py_eq(item, &self.heap))),
            Some(HeapData::Tuple(tuple)) => Ok(tuple.as_slice().iter().any(|v| v.py_eq(item, &self.heap))),
            Some(HeapData::Dict(dict)) => Ok(dict.contains(&DictKey::from_value(item, &self.heap)?)),
            Some(HeapData::Str(s)) => match item.as_str(&self.heap) {
                Some(needle) => Ok(s.as_str().contains(needle)),
                None => Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    item.py_type(&self.heap)
                ))),
            },
            _ => Err(ExcType::type_error(format!(
                "argument of type '{}' is not iterable",
                container.py_type(&self.heap)
            ))),
        }
    }

    /// Whether the exception class `given` is caught by the handler `spec`:
    /// a class, a tuple of them, or a string exception.
    pub(super) fn exception_matches(&self, given: &Value, spec: &Value) -> bool {
        match spec {
            Value::Builtin(Builtins::ExcType(handler)) => match given {
                Value::Builtin(Builtins::ExcType(raised)) => raised.is_subclass_of(*handler),
                Value::Ref(id) => match self.heap.get(*id) {
                    HeapData::Exception(exc) => exc.exc_type().is_subclass_of(*handler),
                    HeapData::Class(_) => class_derives_from(&self.heap, *id, *handler),
                    HeapData::Instance(instance) => class_derives_from(&self.heap, instance.class, *handler),
                    _ => false,
                },
                _ => false,
            },
            Value::Ref(spec_id) => match self.heap.get(*spec_id) {
                HeapData::Tuple(tuple) => tuple.as_slice().iter().any(|item| self.exception_matches(given, item)),
                HeapData::Class(_) => match given.ref_id().map(|id| (id, self.heap.get(id))) {
                    Some((id, HeapData::Class(_))) => class_is_subclass(&self.heap, id, *spec_id),
                    Some((_, HeapData::Instance(instance))) => class_is_subclass(&self.heap, instance.class, *spec_id),
                    _ => false,
                },
                HeapData::Str(_) => given.py_eq(spec, &self.heap),
                _ => given.is(spec),
            },
            _ => given.is(spec),
        }
    }
}

fn ordering_holds(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::Ne => ordering.is_ne(),
        CompareOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exception_private::RunError,
        heap::Heap,
        io::NoPrint,
        resource::NoLimitTracker,
        types::{List, Tuple},
    };

    fn vm() -> VM<NoLimitTracker, NoPrint> {
        VM::new(Heap::new(64, NoLimitTracker), NoPrint).unwrap()
    }

    #[test]
    fn int_fast_path_matches_generic_path() {
        let mut vm = vm();
        let pairs = [(1, 2), (2, 2), (3, 2), (-5, 7)];
        let ops = [CompareOp::Lt, CompareOp::Le, CompareOp::Eq, CompareOp::Ne, CompareOp::Gt, CompareOp::Ge];
        for (a, b) in pairs {
            for op in ops {
                let fast = ordering_holds(op, a.cmp(&b));
                let generic = vm.compare_values(op, &Value::Int(a), &Value::Float(b as f64)).unwrap();
                assert_eq!(fast, generic, "{a} {} {b}", op.symbol());
            }
        }
    }

    #[test]
    fn unorderable_and_membership() {
        let mut vm = vm();
        let s = vm.new_str("abc").unwrap();
        let err = vm.compare_values(CompareOp::Lt, &Value::Int(1), &s).unwrap_err();
        let RunError::Exc(exc) = err else { panic!("expected a TypeError") };
        assert_eq!(exc.arg(), Some("unorderable types: int() < str()"));

        let b = vm.new_str("b").unwrap();
        assert!(vm.compare_values(CompareOp::In, &b, &s).unwrap());
        let list = Value::Ref(vm.heap.allocate(HeapData::List(List::new(vec![Value::Int(1)]))).unwrap());
        assert!(vm.compare_values(CompareOp::NotIn, &Value::Int(2), &list).unwrap());
        assert!(!vm.compare_values(CompareOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
        vm.release_all([s, b, list]);
    }

    #[test]
    fn exception_matching() {
        let mut vm = vm();
        let key_error = Value::Builtin(Builtins::ExcType(ExcType::KeyError));
        let lookup_error = Value::Builtin(Builtins::ExcType(ExcType::LookupError));
        assert!(vm.exception_matches(&key_error, &lookup_error));
        assert!(!vm.exception_matches(&lookup_error, &key_error));

        let value_error = Value::Builtin(Builtins::ExcType(ExcType::ValueError));
        let handlers = Value::Ref(
            vm.heap
                .allocate(HeapData::Tuple(Tuple::new(vec![value_error, lookup_error])))
                .unwrap(),
        );
        assert!(vm.exception_matches(&key_error, &handlers));

        let raised = vm.new_str("oops").unwrap();
        let handler = vm.new_str("oops").unwrap();
        assert!(vm.exception_matches(&raised, &handler));
        vm.release_all([handlers, raised, handler]);
    }
}
