use std::{cell::Cell, rc::Rc};

use crate::{
    bytecode::{Code, Opcode},
    exception_private::{ExcInfo, RunError, RunResult},
    heap::{Heap, HeapId},
    resource::ResourceTracker,
    value::Value,
};

/// Maximum nesting of loop/try blocks in one frame.
pub(crate) const MAX_BLOCKS: usize = 20;

/// Stands in for a missing operand when an instruction reads past the bottom
/// of the stack.
static MISSING: Value = Value::Undefined;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Loop,
    Except,
    Finally,
}

/// A loop or try marker on the block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    pub kind: BlockKind,
    /// Absolute offset the unwind engine resumes at.
    pub handler: usize,
    /// Operand stack depth when the block was entered.
    pub level: usize,
}

/// A single activation record.
///
/// Every `Value` and `HeapId` held here is an owned reference: the frame must
/// be released with [`Frame::drop_with_heap`], or through a generator's
/// `dec_ref_ids` when it is suspended inside one.
#[derive(Debug)]
pub(crate) struct Frame {
    pub code: Rc<Code>,
    /// Offset of the next instruction to fetch.
    pub ip: usize,
    /// Offset of the instruction currently executing, for tracebacks.
    pub last_ip: usize,
    stack: Vec<Value>,
    /// Set when an instruction read past the bottom of `stack`; the dispatch
    /// loop turns it into an internal error once the instruction returns.
    underflow: Cell<bool>,
    blocks: Vec<Block>,
    /// Fast-local slots, `Value::Undefined` until assigned.
    pub fast_locals: Vec<Value>,
    /// Cells for `code.cellvars` followed by the closure cells for `code.freevars`.
    pub cells: Vec<HeapId>,
    /// The locals mapping; `None` for optimized function frames.
    pub locals: Option<HeapId>,
    pub globals: HeapId,
    pub builtins: HeapId,
    /// The context's current exception as it was before this frame first
    /// entered an `except` handler. Restored when the frame exits.
    pub saved_exc: Option<ExcInfo>,
}

impl Frame {
    /// Creates a frame. Takes ownership of the `globals`, `builtins` and
    /// `locals` references.
    #[must_use]
    pub fn new(code: Rc<Code>, globals: HeapId, builtins: HeapId, locals: Option<HeapId>) -> Self {
        let fast_locals = (0..code.nlocals()).map(|_| Value::Undefined).collect();
        let cells = Vec::with_capacity(code.ncells());
        Self {
            code,
            ip: 0,
            last_ip: 0,
            stack: Vec::with_capacity(8),
            underflow: Cell::new(false),
            blocks: Vec::new(),
            fast_locals,
            cells,
            locals,
            globals,
            builtins,
            saved_exc: None,
        }
    }

    /// Fetches the instruction at `ip` and advances past it.
    pub fn fetch(&mut self) -> RunResult<(Opcode, u16)> {
        let bytecode = self.code.bytecode();
        let Some(&byte) = bytecode.get(self.ip) else {
            return Err(RunError::internal(format!(
                "instruction pointer {} outside code object '{}' ({} bytes)",
                self.ip,
                self.code.name(),
                bytecode.len()
            )));
        };
        let opcode = Opcode::try_from(byte).map_err(|err| RunError::internal(err.to_string()))?;
        if !opcode.has_arg() {
            self.ip += 1;
            return Ok((opcode, 0));
        }
        match bytecode.get(self.ip + 1..self.ip + 3) {
            Some(&[lo, hi]) => {
                self.ip += 3;
                Ok((opcode, u16::from_le_bytes([lo, hi])))
            }
            _ => Err(RunError::internal(format!("truncated operand for {opcode} at offset {}", self.ip))),
        }
    }

    /// Jumps forward `delta` bytes from the end of the current instruction.
    pub fn jump_relative(&mut self, delta: u16) {
        self.ip += usize::from(delta);
    }

    pub fn jump_absolute(&mut self, target: usize) {
        self.ip = target;
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops the top of the stack, or `Value::Undefined` on underflow.
    #[inline]
    pub fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_else(|| {
            self.underflow.set(true);
            Value::Undefined
        })
    }

    #[must_use]
    pub fn peek(&self) -> &Value {
        self.stack.last().unwrap_or_else(|| {
            self.underflow.set(true);
            &MISSING
        })
    }

    /// Pops `n` values, returned bottom-most first.
    ///
    /// On underflow the whole stack is taken and padded with `Value::Undefined`.
    pub fn pop_n(&mut self, n: usize) -> Vec<Value> {
        match self.stack.len().checked_sub(n) {
            Some(at) => self.stack.split_off(at),
            None => {
                self.underflow.set(true);
                let mut values = std::mem::take(&mut self.stack);
                values.resize_with(n, || Value::Undefined);
                values
            }
        }
    }

    #[must_use]
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Whether an instruction read past the bottom of the stack since the
    /// last call. Clears the flag.
    pub fn take_underflow(&self) -> bool {
        self.underflow.replace(false)
    }

    /// `[a, b] -> [b, a]`
    pub fn rot_two(&mut self) {
        let len = self.stack.len();
        if len < 2 {
            self.underflow.set(true);
            return;
        }
        self.stack.swap(len - 1, len - 2);
    }

    /// `[a, b, c] -> [c, a, b]`
    pub fn rot_three(&mut self) {
        let len = self.stack.len();
        if len < 3 {
            self.underflow.set(true);
            return;
        }
        self.stack[len - 3..].rotate_right(1);
    }

    /// Releases operand entries top-down until the depth is `level`.
    pub fn release_to(&mut self, level: usize, heap: &mut Heap<impl ResourceTracker>) {
        while self.stack.len() > level {
            self.pop().drop_with_heap(heap);
        }
    }

    pub fn push_block(&mut self, kind: BlockKind, handler: usize) -> RunResult<()> {
        if self.blocks.len() >= MAX_BLOCKS {
            return Err(RunError::internal(format!("block stack overflow in '{}'", self.code.name())));
        }
        self.blocks.push(Block {
            kind,
            handler,
            level: self.stack.len(),
        });
        Ok(())
    }

    /// Re-pushes a block popped by the unwind engine, keeping its depth snapshot.
    pub fn restore_block(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn pop_block(&mut self) -> RunResult<Block> {
        self.blocks
            .pop()
            .ok_or_else(|| RunError::internal(format!("block stack underflow in '{}'", self.code.name())))
    }

    #[must_use]
    pub fn has_blocks(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// Whether the frame has run any instruction yet.
    #[must_use]
    pub fn started(&self) -> bool {
        self.ip > 0
    }

    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        for value in &mut self.stack {
            value.dec_ref_ids(stack);
        }
        for value in &mut self.fast_locals {
            value.dec_ref_ids(stack);
        }
        stack.extend(self.cells.iter().copied());
        stack.extend(self.locals);
        stack.push(self.globals);
        stack.push(self.builtins);
        if let Some(saved) = &mut self.saved_exc {
            saved.dec_ref_ids(stack);
        }
    }

    /// Releases every reference the frame holds.
    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        for value in self.stack {
            value.drop_with_heap(heap);
        }
        for value in self.fast_locals {
            value.drop_with_heap(heap);
        }
        for cell in self.cells {
            heap.dec_ref(cell);
        }
        if let Some(locals) = self.locals {
            heap.dec_ref(locals);
        }
        heap.dec_ref(self.globals);
        heap.dec_ref(self.builtins);
        if let Some(saved) = self.saved_exc {
            saved.drop_with_heap(heap);
        }
    }
}
