//! The unwind engine: routes non-normal signals through the block stack,
//! and the per-frame exception state that `except` handlers see.

use super::{
    Frame, FrameExit, VM,
    context::TraceEvent,
    frame::{Block, BlockKind},
    signal::Signal,
};
use crate::{
    builtins::Builtins,
    bytecode::why,
    exception_private::{ExcInfo, RunError, RunResult},
    heap::HeapData,
    io::PrintWriter,
    resource::ResourceTracker,
    types::{Traceback, TracebackEntry},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    /// Pops blocks until one absorbs `signal`.
    ///
    /// Returns `Ok(None)` once execution continues at a handler, or the
    /// frame's exit when the block stack runs out. An exception that runs out
    /// of blocks leaves the frame as `Err(RunError::Raised)`.
    pub(super) fn unwind(&mut self, frame: &mut Frame, signal: Signal) -> RunResult<Option<FrameExit>> {
        let signal = match signal {
            Signal::Exception => {
                self.attach_traceback(frame);
                self.report_exception(frame);
                Signal::Exception
            }
            // a re-raise keeps its traceback and is not reported again
            Signal::Reraise => Signal::Exception,
            other => other,
        };

        while frame.has_blocks() {
            let block = frame.pop_block()?;
            if block.kind == BlockKind::Loop
                && let Signal::Continue(target) = signal
            {
                frame.restore_block(block);
                frame.jump_absolute(target);
                return Ok(None);
            }
            frame.release_to(block.level, &mut self.heap);
            if block.kind == BlockKind::Loop && matches!(signal, Signal::Break) {
                log::trace!("break absorbed by loop in '{}'", frame.code.name());
                frame.jump_absolute(block.handler);
                return Ok(None);
            }
            if block.kind == BlockKind::Finally
                || (block.kind == BlockKind::Except && matches!(signal, Signal::Exception))
            {
                self.enter_handler(frame, block, signal)?;
                return Ok(None);
            }
        }

        frame.release_to(0, &mut self.heap);
        match signal {
            Signal::Return(value) => Ok(Some(FrameExit::Return(value))),
            Signal::Exception => {
                let info = self
                    .ctx
                    .pending
                    .take()
                    .ok_or_else(|| RunError::internal("exception signal without a pending exception"))?;
                Err(RunError::Raised(info))
            }
            Signal::Break => Err(RunError::internal("'break' outside loop")),
            Signal::Continue(_) => Err(RunError::internal("'continue' not properly in loop")),
            Signal::Normal | Signal::Reraise | Signal::Yield(_) | Signal::IterationEnded => {
                Err(RunError::internal("unwind received a signal it cannot route"))
            }
        }
    }

    /// Pushes what the handler at `block` needs to resume or re-raise `signal`,
    /// then jumps there.
    fn enter_handler(&mut self, frame: &mut Frame, block: Block, signal: Signal) -> RunResult<()> {
        log::debug!(
            "{:?} block at {} in '{}' absorbs {signal:?}",
            block.kind,
            block.handler,
            frame.code.name()
        );
        match signal {
            Signal::Exception => {
                let mut info = self
                    .ctx
                    .pending
                    .take()
                    .ok_or_else(|| RunError::internal("exception signal without a pending exception"))?;
                if block.kind == BlockKind::Except {
                    info = self.normalize(info);
                    let current = info.clone_with_heap(&mut self.heap);
                    self.set_exc_info(frame, current);
                }
                frame.push(info.traceback);
                frame.push(info.value);
                frame.push(info.exc_type);
            }
            Signal::Return(value) => {
                frame.push(value);
                frame.push(Value::Int(why::RETURN));
            }
            Signal::Continue(target) => {
                frame.push(Value::Int(i64::try_from(target).unwrap_or(i64::MAX)));
                frame.push(Value::Int(why::CONTINUE));
            }
            Signal::Break => frame.push(Value::Int(why::BREAK)),
            Signal::Normal | Signal::Reraise | Signal::Yield(_) | Signal::IterationEnded => {
                return Err(RunError::internal("unwind received a signal it cannot route"));
            }
        }
        frame.jump_absolute(block.handler);
        Ok(())
    }

    /// `END_FINALLY`: pops what `enter_handler` pushed and resumes it.
    pub(super) fn end_finally(&mut self, frame: &mut Frame) -> RunResult<Signal> {
        let tag = frame.pop();
        match tag {
            Value::None => Ok(Signal::Normal),
            Value::Int(why::RETURN) => Ok(Signal::Return(frame.pop())),
            Value::Int(why::BREAK) => Ok(Signal::Break),
            Value::Int(why::CONTINUE) => {
                let target = frame.pop();
                match target.as_int().and_then(|t| usize::try_from(t).ok()) {
                    Some(target) => Ok(Signal::Continue(target)),
                    None => {
                        target.drop_with_heap(&mut self.heap);
                        Err(RunError::internal("'finally' pops bad continue target"))
                    }
                }
            }
            Value::Int(other) => Err(RunError::internal(format!("'finally' pops bad signal tag {other}"))),
            exc_type if self.is_exception_class(&exc_type) => {
                let value = frame.pop();
                let traceback = frame.pop();
                let info = ExcInfo {
                    exc_type,
                    value,
                    traceback,
                };
                self.ctx.set_pending(info, &mut self.heap);
                Ok(Signal::Reraise)
            }
            other => {
                other.drop_with_heap(&mut self.heap);
                Err(RunError::internal("'finally' pops bad exception"))
            }
        }
    }

    /// Whether `value` can be the class slot of an exception triple.
    fn is_exception_class(&self, value: &Value) -> bool {
        match value {
            Value::Builtin(Builtins::ExcType(_)) => true,
            Value::Ref(id) => matches!(self.heap.get(*id), HeapData::Class(_) | HeapData::Str(_)),
            _ => false,
        }
    }

    /// Makes sure a builtin exception class is paired with an instance of itself.
    ///
    /// User classes are instantiated when raised, and string exceptions have no
    /// instance, so only builtin classes need work here.
    pub(super) fn normalize(&mut self, info: ExcInfo) -> ExcInfo {
        let Value::Builtin(Builtins::ExcType(exc_type)) = info.exc_type else {
            return info;
        };
        if let Value::Ref(id) = &info.value
            && matches!(self.heap.get(*id), HeapData::Exception(_))
        {
            return info;
        }
        let exc = self.new_exception(exc_type, &info.value);
        let instance = self.materialize(exc);
        info.value.drop_with_heap(&mut self.heap);
        ExcInfo {
            exc_type: info.exc_type,
            value: instance.value,
            traceback: info.traceback,
        }
    }

    /// Prepends this frame to the pending exception's traceback.
    fn attach_traceback(&mut self, frame: &Frame) {
        let Some(pending) = &self.ctx.pending else {
            return;
        };
        let previous = match &pending.traceback {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Traceback(tb) => Some(tb),
                _ => None,
            },
            _ => None,
        };
        let entry = TracebackEntry {
            name: frame.code.name().to_owned(),
            offset: frame.last_ip,
        };
        let traceback = Traceback::here(entry, previous);
        match self.heap.allocate(HeapData::Traceback(traceback)) {
            Ok(id) => {
                if let Some(pending) = &mut self.ctx.pending {
                    let old = std::mem::replace(&mut pending.traceback, Value::Ref(id));
                    old.drop_with_heap(&mut self.heap);
                }
            }
            Err(err) => log::debug!("traceback entry for '{}' dropped: {err}", frame.code.name()),
        }
    }

    fn report_exception(&mut self, frame: &Frame) {
        if self.ctx.trace_hook.is_none() {
            return;
        }
        let exc_type = match &self.ctx.pending {
            Some(info) => self.exc_type_name(info),
            None => return,
        };
        self.ctx.trace(&TraceEvent::Exception {
            function: frame.code.name(),
            offset: frame.last_ip,
            exc_type: &exc_type,
        });
    }

    /// Class name of an exception triple, or the text of a string exception.
    pub(crate) fn exc_type_name(&self, info: &ExcInfo) -> String {
        match &info.exc_type {
            Value::Builtin(builtin) => builtin.name().to_owned(),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Class(class) => class.name.clone(),
                HeapData::Str(s) => s.as_str().to_owned(),
                _ => info.exc_type.py_repr(&self.heap),
            },
            other => other.py_repr(&self.heap),
        }
    }

    /// Records `info` as the exception being handled.
    ///
    /// The first time a frame handles an exception, the caller's current
    /// exception is saved in the frame so it can be restored on exit.
    pub(super) fn set_exc_info(&mut self, frame: &mut Frame, info: ExcInfo) {
        let previous = self.ctx.current.replace(info).unwrap_or_else(ExcInfo::none);
        if frame.saved_exc.is_none() {
            frame.saved_exc = Some(previous);
        } else {
            previous.drop_with_heap(&mut self.heap);
        }
    }

    /// Restores the exception state saved by [`Self::set_exc_info`], if the
    /// frame handled anything.
    pub(super) fn reset_exc_info(&mut self, frame: &mut Frame) {
        let Some(saved) = frame.saved_exc.take() else {
            return;
        };
        let restored = if saved.is_none() { None } else { Some(saved) };
        if let Some(old) = std::mem::replace(&mut self.ctx.current, restored) {
            old.drop_with_heap(&mut self.heap);
        }
    }
}
