//! Arithmetic, concatenation and the subscript protocol.

use super::{Frame, VM};
use crate::{
    args::Kwargs,
    exception_private::{ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::{
        List, Str, Tuple, Type,
        class::class_lookup,
        dict::{dict_get, dict_set},
        str::normalize_index,
    },
    value::{Number, Value},
};

/// The binary operators the instruction set carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinaryOp {
    Add,
    Sub,
    Mul,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Add => "addition",
            Self::Sub => "subtraction",
            Self::Mul => "multiplication",
        }
    }
}

/// Which sequence type a concatenation or repetition produces.
#[derive(Debug, Clone, Copy)]
enum SeqKind {
    Str,
    List,
    Tuple,
}

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    /// `BINARY_ADD`, `BINARY_SUBTRACT`, `BINARY_MULTIPLY`.
    pub(super) fn binary_op(&mut self, frame: &mut Frame, op: BinaryOp) -> RunResult<()> {
        let right = frame.pop();
        let left = frame.pop();
        let result = self.binary_value(op, &left, &right);
        self.release_all([left, right]);
        frame.push(result?);
        Ok(())
    }

    fn binary_value(&mut self, op: BinaryOp, left: &Value, right: &Value) -> RunResult<Value> {
        match (left.as_number(), right.as_number()) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => {
                let result = match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                };
                return result.map(Value::Int).ok_or_else(|| ExcType::overflow(op.verb()));
            }
            (Some(a), Some(b)) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                return Ok(Value::Float(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                }));
            }
            _ => {}
        }

        let left_seq = self.seq_kind(left);
        let right_seq = self.seq_kind(right);
        match (op, left_seq, right_seq) {
            (BinaryOp::Add, Some(kind), Some(_)) if same_kind(kind, right_seq) => {
                let (Some(a), Some(b)) = (left.ref_id(), right.ref_id()) else {
                    return Err(RunError::internal("sequence without a heap object"));
                };
                self.concat(kind, a, b)
            }
            (BinaryOp::Mul, Some(kind), _) => match right.as_int() {
                Some(count) => self.repeat(kind, left, count),
                None => Err(ExcType::type_error(format!(
                    "can't multiply sequence by non-int of type '{}'",
                    right.py_type(&self.heap)
                ))),
            },
            (BinaryOp::Mul, None, Some(kind)) => match left.as_int() {
                Some(count) => self.repeat(kind, right, count),
                None => Err(ExcType::type_error(format!(
                    "can't multiply sequence by non-int of type '{}'",
                    left.py_type(&self.heap)
                ))),
            },
            _ => Err(ExcType::type_error_unsupported_operand(
                op.symbol(),
                left.py_type(&self.heap),
                right.py_type(&self.heap),
            )),
        }
    }

    fn seq_kind(&self, value: &Value) -> Option<SeqKind> {
        match self.heap.get(value.ref_id()?) {
            HeapData::Str(_) => Some(SeqKind::Str),
            HeapData::List(_) => Some(SeqKind::List),
            HeapData::Tuple(_) => Some(SeqKind::Tuple),
            _ => None,
        }
    }

    fn concat(&mut self, kind: SeqKind, left: HeapId, right: HeapId) -> RunResult<Value> {
        if let SeqKind::Str = kind {
            let joined = match (self.heap.get(left), self.heap.get(right)) {
                (HeapData::Str(a), HeapData::Str(b)) => format!("{}{}", a.as_str(), b.as_str()),
                _ => return Err(RunError::internal("str concatenation on a non-str")),
            };
            return self.new_str(&joined);
        }
        let mut items = self.borrowed_items(left);
        items.extend(self.borrowed_items(right));
        self.heap.retain_all(&items);
        self.allocate_seq(kind, items)
    }

    fn repeat(&mut self, kind: SeqKind, sequence: &Value, count: i64) -> RunResult<Value> {
        let count = usize::try_from(count).unwrap_or(0);
        let Some(id) = sequence.ref_id() else {
            return Err(RunError::internal("sequence without a heap object"));
        };
        if let SeqKind::Str = kind {
            let repeated = match self.heap.get(id) {
                HeapData::Str(s) => {
                    s.as_str().len().checked_mul(count).ok_or_else(|| ExcType::overflow("repeat"))?;
                    s.as_str().repeat(count)
                }
                _ => return Err(RunError::internal("str repetition on a non-str")),
            };
            return self.new_str(&repeated);
        }
        let once = self.borrowed_items(id);
        once.len().checked_mul(count).ok_or_else(|| ExcType::overflow("repeat"))?;
        let mut items = Vec::with_capacity(once.len() * count);
        for _ in 0..count {
            items.extend(once.iter().map(Value::copy_for_extend));
        }
        self.heap.retain_all(&items);
        #[cfg(feature = "dec-ref-check")]
        std::mem::forget(once);
        self.allocate_seq(kind, items)
    }

    /// Copies of a list's or tuple's items that do not own a reference yet.
    fn borrowed_items(&self, id: HeapId) -> Vec<Value> {
        match self.heap.get(id) {
            HeapData::List(list) => list.as_slice().iter().map(Value::copy_for_extend).collect(),
            HeapData::Tuple(tuple) => tuple.as_slice().iter().map(Value::copy_for_extend).collect(),
            _ => Vec::new(),
        }
    }

    fn allocate_seq(&mut self, kind: SeqKind, items: Vec<Value>) -> RunResult<Value> {
        let data = match kind {
            SeqKind::List => HeapData::List(List::new(items)),
            SeqKind::Tuple => HeapData::Tuple(Tuple::new(items)),
            SeqKind::Str => {
                self.release_all(items);
                return Err(RunError::internal("str built from items"));
            }
        };
        Ok(Value::Ref(self.heap.allocate(data)?))
    }

    /// `BINARY_SUBSCR`: TOS is the key, TOS1 the container.
    pub(super) fn binary_subscr(&mut self, frame: &mut Frame) -> RunResult<()> {
        let key = frame.pop();
        let container = frame.pop();
        let result = self.get_item(&container, &key);
        self.release_all([container, key]);
        frame.push(result?);
        Ok(())
    }

    /// `STORE_SUBSCR`: `TOS1[TOS] = TOS2`.
    pub(super) fn store_subscr(&mut self, frame: &mut Frame) -> RunResult<()> {
        let key = frame.pop();
        let container = frame.pop();
        let value = frame.pop();
        let result = self.set_item(&container, key, value);
        container.drop_with_heap(&mut self.heap);
        result
    }

    /// `STORE_MAP`: stores `TOS1` under key `TOS` in the dict at `TOS2`,
    /// leaving the dict on the stack.
    pub(super) fn store_map(&mut self, frame: &mut Frame) -> RunResult<()> {
        let key = frame.pop();
        let value = frame.pop();
        let Some(dict_id) = frame.peek().ref_id() else {
            self.release_all([key, value]);
            return Err(RunError::internal("STORE_MAP target is not a dict"));
        };
        dict_set(&mut self.heap, dict_id, key, value)
    }

    /// `container[key]`, returning a new reference.
    pub(super) fn get_item(&mut self, container: &Value, key: &Value) -> RunResult<Value> {
        let Some(id) = container.ref_id() else {
            return Err(ExcType::type_error_not_subscriptable(container.py_type(&self.heap)));
        };
        let type_ = self.heap.get(id).py_type();
        match type_ {
            Type::List | Type::Tuple => {
                let name = if type_ == Type::List { "list" } else { "tuple" };
                let index = self.index_of(key, name)?;
                let item = match self.heap.get(id) {
                    HeapData::List(list) => normalize_index(index, list.len()).map(|i| list.as_slice()[i].copy_for_extend()),
                    HeapData::Tuple(tuple) => {
                        normalize_index(index, tuple.len()).map(|i| tuple.as_slice()[i].copy_for_extend())
                    }
                    _ => None,
                };
                let Some(item) = item else {
                    return Err(ExcType::index_error(&format!("{name} index out of range")));
                };
                self.heap.retain_all(std::slice::from_ref(&item));
                Ok(item)
            }
            Type::Str => {
                let index = match key.as_int() {
                    Some(index) => index,
                    None => {
                        return Err(ExcType::type_error(format!(
                            "string indices must be integers, not {}",
                            key.py_type(&self.heap)
                        )));
                    }
                };
                let c = match self.heap.get(id) {
                    HeapData::Str(s) => s.char_at(index),
                    _ => None,
                };
                let Some(c) = c else {
                    return Err(ExcType::index_error("string index out of range"));
                };
                Ok(Value::Ref(self.heap.allocate(HeapData::Str(Str::new(c.to_string())))?))
            }
            Type::Dict => match dict_get(&mut self.heap, id, key)? {
                Some(value) => Ok(value),
                None => Err(ExcType::key_error(key, &self.heap)),
            },
            Type::Instance => {
                let key = key.clone_with_heap(&mut self.heap);
                match self.call_special(container, "__getitem__", vec![key])? {
                    Some(value) => Ok(value),
                    None => Err(self.missing_special(container, "__getitem__")),
                }
            }
            other => Err(ExcType::type_error_not_subscriptable(other)),
        }
    }

    /// `container[key] = value`. Consumes `key` and `value`.
    pub(super) fn set_item(&mut self, container: &Value, key: Value, value: Value) -> RunResult<()> {
        let Some(id) = container.ref_id() else {
            let type_ = container.py_type(&self.heap);
            self.release_all([key, value]);
            return Err(ExcType::type_error(format!(
                "'{type_}' object does not support item assignment"
            )));
        };
        match self.heap.get(id).py_type() {
            Type::List => {
                let index = match self.index_of(&key, "list") {
                    Ok(index) => index,
                    Err(err) => {
                        self.release_all([key, value]);
                        return Err(err);
                    }
                };
                key.drop_with_heap(&mut self.heap);
                let replaced = match self.heap.get_mut(id) {
                    HeapData::List(list) => {
                        let items = list.as_vec_mut();
                        match normalize_index(index, items.len()) {
                            Some(i) => Ok(std::mem::replace(&mut items[i], value)),
                            None => Err(value),
                        }
                    }
                    _ => Err(value),
                };
                match replaced {
                    Ok(old) => {
                        old.drop_with_heap(&mut self.heap);
                        Ok(())
                    }
                    Err(value) => {
                        value.drop_with_heap(&mut self.heap);
                        Err(ExcType::index_error("list assignment index out of range"))
                    }
                }
            }
            Type::Dict => dict_set(&mut self.heap, id, key, value),
            Type::Instance => match self.call_special(container, "__setitem__", vec![key, value])? {
                Some(result) => {
                    result.drop_with_heap(&mut self.heap);
                    Ok(())
                }
                None => Err(self.missing_special(container, "__setitem__")),
            },
            type_ => {
                self.release_all([key, value]);
                Err(ExcType::type_error(format!(
                    "'{type_}' object does not support item assignment"
                )))
            }
        }
    }

    /// Calls a special method found on an instance's class. Returns `None`
    /// (releasing `args`) when the class does not define it.
    pub(super) fn call_special(&mut self, instance: &Value, name: &str, args: Vec<Value>) -> RunResult<Option<Value>> {
        let class = match instance.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Instance(data)) => data.class,
            _ => {
                self.release_all(args);
                return Ok(None);
            }
        };
        let Some(method) = class_lookup(&self.heap, class, name) else {
            self.release_all(args);
            return Ok(None);
        };
        self.heap.retain_all(std::slice::from_ref(&method));
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(instance.clone_with_heap(&mut self.heap));
        full.extend(args);
        self.call_value(method, full, Kwargs::new()).map(Some)
    }

    fn missing_special(&self, instance: &Value, name: &str) -> RunError {
        let class_name = match instance.ref_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Instance(data)) => match self.heap.get(data.class) {
                HeapData::Class(class) => class.name.clone(),
                _ => "?".to_owned(),
            },
            _ => "?".to_owned(),
        };
        ExcType::attribute_error_msg(format!("{class_name} instance has no attribute '{name}'"))
    }

    fn index_of(&self, key: &Value, container: &str) -> RunResult<i64> {
        key.as_int().ok_or_else(|| {
            ExcType::type_error(format!(
                "{container} indices must be integers, not {}",
                key.py_type(&self.heap)
            ))
        })
    }
}

fn same_kind(kind: SeqKind, other: Option<SeqKind>) -> bool {
    matches!(
        (kind, other),
        (SeqKind::Str, Some(SeqKind::Str)) | (SeqKind::List, Some(SeqKind::List)) | (SeqKind::Tuple, Some(SeqKind::Tuple))
    )
}
