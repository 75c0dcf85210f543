use std::rc::Rc;

use crate::{bytecode::Code, heap::HeapId, value::Value};

/// A user function created by `MAKE_FUNCTION` or `MAKE_CLOSURE`.
///
/// Holds owned references to its globals dict, its default values and, for
/// closures, the cells of the enclosing scope (matching `code.freevars`).
#[derive(Debug)]
pub(crate) struct Function {
    pub code: Rc<Code>,
    pub globals: HeapId,
    pub defaults: Vec<Value>,
    pub closure: Vec<HeapId>,
}

impl Function {
    #[must_use]
    pub fn name(&self) -> &str {
        self.code.name()
    }

    /// Whether a call with `positional` arguments and no keywords can bind
    /// straight into the fast-local slots.
    #[must_use]
    pub fn accepts_fast_call(&self, positional: usize) -> bool {
        self.defaults.is_empty() && self.code.is_simple() && self.code.argcount() == positional
    }

    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.push(self.globals);
        stack.extend(self.closure.iter().copied());
        for value in &mut self.defaults {
            value.dec_ref_ids(stack);
        }
    }
}
