//! The dispatch loop.
//!
//! Each frame runs in its own native activation of [`VM::run_frame`]: calls
//! recurse into it, and generators keep their frame on the heap between runs.
//! Every instruction either completes normally or produces a [`Signal`] that
//! the unwind engine routes through the frame's block stack.

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod context;
mod frame;
mod generator;
mod import;
mod names;
mod native;
mod print;
mod raise;
mod signal;
mod unwind;

use std::rc::Rc;

use ahash::AHashMap;
pub use context::{HookError, InterruptHandle, TraceEvent, TraceHook, WarningPolicy};
pub(crate) use context::ExecContext;
pub(crate) use frame::Frame;
use frame::BlockKind;
pub(crate) use signal::FrameExit;
use signal::Signal;

use crate::{
    builtins::{Builtins, create_builtins},
    bytecode::{CodeFlags, CompareOp, Opcode, code::Code},
    exception_private::{ExcInfo, ExcType, RunError, RunResult, SimpleException},
    heap::{Heap, HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::{Dict, dict::allocate_str},
    value::Value,
};

/// The virtual machine: heap, builtins, registered modules and the shared
/// execution context.
#[derive(Debug)]
pub(crate) struct VM<T: ResourceTracker, P: PrintWriter> {
    pub heap: Heap<T>,
    pub ctx: ExecContext,
    /// The builtins dict every frame resolves names against last.
    pub builtins: HeapId,
    /// Modules registered by the host, looked up by `__import__`.
    pub modules: AHashMap<String, HeapId>,
    pub print_writer: P,
}

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    pub fn new(mut heap: Heap<T>, print_writer: P) -> RunResult<Self> {
        let builtins = create_builtins(&mut heap)?;
        Ok(Self {
            heap,
            ctx: ExecContext::default(),
            builtins,
            modules: AHashMap::new(),
            print_writer,
        })
    }

    /// Creates a frame for `code`, choosing its locals from the code flags.
    ///
    /// Takes ownership of the `globals` reference.
    pub fn new_frame(&mut self, code: Rc<Code>, globals: HeapId) -> RunResult<Frame> {
        let flags = code.flags();
        let locals = if flags.contains(CodeFlags::OPTIMIZED) {
            None
        } else if flags.contains(CodeFlags::NEWLOCALS) {
            match self.heap.allocate(HeapData::Dict(Dict::new())) {
                Ok(id) => Some(id),
                Err(err) => {
                    self.heap.dec_ref(globals);
                    return Err(err.into());
                }
            }
        } else {
            self.heap.inc_ref(globals);
            Some(globals)
        };
        self.heap.inc_ref(self.builtins);
        Ok(Frame::new(code, globals, self.builtins, locals))
    }

    /// Runs a non-generator frame to completion and releases it.
    pub fn eval_frame(&mut self, mut frame: Frame) -> RunResult<Value> {
        let result = self.run_frame_guarded(&mut frame, None);
        frame.drop_with_heap(&mut self.heap);
        match result? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(value) => {
                value.drop_with_heap(&mut self.heap);
                Err(RunError::internal("yield outside a generator"))
            }
        }
    }

    /// Runs `frame` with the depth accounting and exception-state bookkeeping
    /// every activation needs.
    ///
    /// `injected` replaces the first instruction's outcome; generator `throw`
    /// uses it to raise at the suspension point.
    pub fn run_frame_guarded(&mut self, frame: &mut Frame, injected: Option<Signal>) -> RunResult<FrameExit> {
        let depth = self.ctx.depth + 1;
        if let Err(err) = self.heap.tracker().check_recursion_depth(depth) {
            if let Some(Signal::Return(value) | Signal::Yield(value)) = injected {
                value.drop_with_heap(&mut self.heap);
            }
            return Err(err.into());
        }
        self.ctx.depth = depth;
        log::trace!("enter frame '{}' at depth {depth}", frame.code.name());
        let result = self.run_frame(frame, injected);
        self.ctx.depth -= 1;
        self.reset_exc_info(frame);
        log::trace!("leave frame '{}'", frame.code.name());
        result
    }

    fn run_frame(&mut self, frame: &mut Frame, mut injected: Option<Signal>) -> RunResult<FrameExit> {
        loop {
            let signal = match injected.take() {
                Some(signal) => signal,
                None => self.step(frame)?,
            };
            match signal {
                Signal::Normal => {}
                Signal::Yield(value) => return Ok(FrameExit::Yield(value)),
                other => {
                    if let Some(exit) = self.unwind(frame, other)? {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    /// Executes one instruction.
    ///
    /// Program exceptions come back as `Signal::Exception` with the pending
    /// slot filled; only internal errors are returned as `Err`.
    fn step(&mut self, frame: &mut Frame) -> RunResult<Signal> {
        frame.last_ip = frame.ip;
        if self.ctx.interrupt.is_pending() && self.ctx.interrupt.take() {
            log::debug!("interrupt delivered in '{}'", frame.code.name());
            return self.raise_error(SimpleException::new_none(ExcType::KeyboardInterrupt).into());
        }
        if let Err(err) = self.heap.tracker().check_time() {
            return self.raise_error(err.into());
        }
        let code = Rc::clone(&frame.code);
        let (opcode, arg) = frame.fetch()?;
        let result = self.execute(frame, &code, opcode, arg);
        if frame.take_underflow() {
            match result {
                Ok(Signal::Return(value) | Signal::Yield(value)) => value.drop_with_heap(&mut self.heap),
                Ok(Signal::Exception | Signal::Reraise) => {
                    if let Some(info) = self.ctx.pending.take() {
                        info.drop_with_heap(&mut self.heap);
                    }
                }
                Err(err) => err.drop_with_heap(&mut self.heap),
                Ok(_) => {}
            }
            return Err(RunError::internal(format!(
                "operand stack underflow at {opcode} (offset {}) in '{}'",
                frame.last_ip,
                code.name()
            )));
        }
        match result {
            Ok(Signal::IterationEnded) => {
                frame.jump_relative(arg);
                Ok(Signal::Normal)
            }
            Ok(signal) => Ok(signal),
            Err(err) => self.raise_error(err),
        }
    }

    /// Routes an error into the unwind machinery, leaving internal errors alone.
    pub fn raise_error(&mut self, err: RunError) -> RunResult<Signal> {
        match err {
            RunError::Internal(_) => Err(err),
            RunError::Exc(exc) => {
                let info = self.materialize(exc);
                self.ctx.set_pending(info, &mut self.heap);
                Ok(Signal::Exception)
            }
            RunError::Raised(info) => {
                self.ctx.set_pending(info, &mut self.heap);
                Ok(Signal::Exception)
            }
        }
    }

    /// Turns a collaborator's exception into a `(class, instance, None)` triple.
    ///
    /// If the instance cannot be allocated the value stays `None`; the class
    /// alone still identifies the exception.
    pub fn materialize(&mut self, exc: SimpleException) -> ExcInfo {
        let exc_type = exc.exc_type();
        let value = match self.heap.allocate(HeapData::Exception(exc)) {
            Ok(id) => Value::Ref(id),
            Err(err) => {
                log::debug!("could not allocate {exc_type} instance: {err}");
                Value::None
            }
        };
        ExcInfo {
            exc_type: Value::Builtin(Builtins::ExcType(exc_type)),
            value,
            traceback: Value::None,
        }
    }

    /// Releases every value in `values`.
    pub fn release_all(&mut self, values: impl IntoIterator<Item = Value>) {
        for value in values {
            value.drop_with_heap(&mut self.heap);
        }
    }

    /// Allocates a heap string.
    pub fn new_str(&mut self, s: &str) -> RunResult<Value> {
        Ok(allocate_str(&mut self.heap, s)?)
    }

    fn execute(&mut self, frame: &mut Frame, code: &Code, opcode: Opcode, arg: u16) -> RunResult<Signal> {
        match opcode {
            Opcode::PopTop => frame.pop().drop_with_heap(&mut self.heap),
            Opcode::RotTwo => frame.rot_two(),
            Opcode::RotThree => frame.rot_three(),
            Opcode::DupTop => {
                let top = frame.peek().clone_with_heap(&mut self.heap);
                frame.push(top);
            }
            Opcode::UnaryNot => {
                let value = frame.pop();
                let result = !value.py_bool(&self.heap);
                value.drop_with_heap(&mut self.heap);
                frame.push(Value::Bool(result));
            }
            Opcode::BinaryAdd => self.binary_op(frame, binary::BinaryOp::Add)?,
            Opcode::BinarySubtract => self.binary_op(frame, binary::BinaryOp::Sub)?,
            Opcode::BinaryMultiply => self.binary_op(frame, binary::BinaryOp::Mul)?,
            Opcode::BinarySubscr => self.binary_subscr(frame)?,
            Opcode::StoreSubscr => self.store_subscr(frame)?,
            Opcode::StoreMap => self.store_map(frame)?,
            Opcode::GetIter => {
                let value = frame.pop();
                let iter = self.get_iter(value)?;
                frame.push(iter);
            }
            Opcode::ForIter => return self.for_iter(frame),
            Opcode::PrintItem => self.print_item(frame),
            Opcode::PrintNewline => self.print_newline(),
            Opcode::BreakLoop => return Ok(Signal::Break),
            Opcode::ContinueLoop => return Ok(Signal::Continue(usize::from(arg))),
            Opcode::LoadLocals => {
                let Some(locals) = frame.locals else {
                    return Err(ExcType::system_error("no locals"));
                };
                self.heap.inc_ref(locals);
                frame.push(Value::Ref(locals));
            }
            Opcode::ReturnValue => return Ok(Signal::Return(frame.pop())),
            Opcode::YieldValue => return Ok(Signal::Yield(frame.pop())),
            Opcode::ImportStar => self.import_star(frame)?,
            Opcode::PopBlock => {
                let block = frame.pop_block()?;
                frame.release_to(block.level, &mut self.heap);
            }
            Opcode::EndFinally => return self.end_finally(frame),
            Opcode::BuildClass => self.build_class(frame)?,
            Opcode::StoreName => self.store_name(frame, name_at(code, arg)?)?,
            Opcode::LoadName => {
                let value = self.load_name(frame, name_at(code, arg)?)?;
                frame.push(value);
            }
            Opcode::StoreGlobal => self.store_global(frame, name_at(code, arg)?)?,
            Opcode::LoadGlobal => {
                let value = self.load_global(frame, name_at(code, arg)?)?;
                frame.push(value);
            }
            Opcode::StoreAttr => self.store_attr_op(frame, name_at(code, arg)?)?,
            Opcode::LoadAttr => {
                let object = frame.pop();
                let value = self.load_attr(object, name_at(code, arg)?)?;
                frame.push(value);
            }
            Opcode::LoadConst => self.load_const(frame, code, arg)?,
            Opcode::BuildTuple => self.build_sequence(frame, arg, false)?,
            Opcode::BuildList => self.build_sequence(frame, arg, true)?,
            Opcode::BuildMap => {
                let id = self.heap.allocate(HeapData::Dict(Dict::new()))?;
                frame.push(Value::Ref(id));
            }
            Opcode::CompareOp => {
                let op = CompareOp::from_repr(arg)
                    .ok_or_else(|| RunError::internal(format!("unknown comparison operator {arg}")))?;
                self.compare_op(frame, op)?;
            }
            Opcode::ImportName => self.import_name(frame, name_at(code, arg)?)?,
            Opcode::ImportFrom => self.import_from(frame, name_at(code, arg)?)?,
            Opcode::JumpForward => frame.jump_relative(arg),
            Opcode::JumpAbsolute => frame.jump_absolute(usize::from(arg)),
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let value = frame.pop();
                let truth = value.py_bool(&self.heap);
                value.drop_with_heap(&mut self.heap);
                if truth == (opcode == Opcode::PopJumpIfTrue) {
                    frame.jump_absolute(usize::from(arg));
                }
            }
            Opcode::SetupLoop => frame.push_block(BlockKind::Loop, frame.ip + usize::from(arg))?,
            Opcode::SetupExcept => frame.push_block(BlockKind::Except, frame.ip + usize::from(arg))?,
            Opcode::SetupFinally => frame.push_block(BlockKind::Finally, frame.ip + usize::from(arg))?,
            Opcode::LoadFast => self.load_fast(frame, code, arg)?,
            Opcode::StoreFast => self.store_fast(frame, arg)?,
            Opcode::RaiseVarargs => return self.raise_varargs(frame, arg),
            Opcode::CallFunction
            | Opcode::CallFunctionVar
            | Opcode::CallFunctionKw
            | Opcode::CallFunctionVarKw => self.call_op(frame, opcode, arg)?,
            Opcode::MakeFunction => self.make_function(frame, arg, false)?,
            Opcode::MakeClosure => self.make_function(frame, arg, true)?,
            Opcode::LoadClosure => {
                let cell = cell_at(frame, arg)?;
                self.heap.inc_ref(cell);
                frame.push(Value::Ref(cell));
            }
            Opcode::LoadDeref => self.load_deref(frame, code, arg)?,
            Opcode::StoreDeref => {
                let cell = cell_at(frame, arg)?;
                let value = frame.pop();
                self.heap.set_cell_value(cell, value);
            }
        }
        Ok(Signal::Normal)
    }
}

impl<T: ResourceTracker, P: PrintWriter> Drop for VM<T, P> {
    fn drop(&mut self) {
        self.ctx.clear(&mut self.heap);
    }
}

fn name_at(code: &Code, arg: u16) -> RunResult<&str> {
    code.names()
        .get(usize::from(arg))
        .map(String::as_str)
        .ok_or_else(|| RunError::internal(format!("name index {arg} out of range in '{}'", code.name())))
}

fn cell_at(frame: &Frame, arg: u16) -> RunResult<HeapId> {
    frame
        .cells
        .get(usize::from(arg))
        .copied()
        .ok_or_else(|| RunError::internal(format!("cell index {arg} out of range in '{}'", frame.code.name())))
}
