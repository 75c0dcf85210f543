//! Resuming generator frames.

use super::{FrameExit, VM, signal::Signal};
use crate::{
    exception_private::{ExcInfo, ExcType, RunError, RunResult},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::GenState,
    value::Value,
};

/// What a generator is resumed with.
#[derive(Debug)]
pub(super) enum GenInput {
    /// `next()` sends `None`.
    Send(Value),
    /// Raised at the suspension point.
    Throw(ExcInfo),
}

impl GenInput {
    fn drop_with_heap<T: ResourceTracker>(self, heap: &mut crate::heap::Heap<T>) {
        match self {
            Self::Send(value) => value.drop_with_heap(heap),
            Self::Throw(info) => info.drop_with_heap(heap),
        }
    }
}

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    /// Runs a generator until it yields or finishes.
    ///
    /// Returns the yielded value, or `None` once the generator has returned.
    /// An exception escaping the body finishes the generator and propagates.
    pub(super) fn resume(&mut self, gen_id: HeapId, input: GenInput) -> RunResult<Option<Value>> {
        let state = match self.heap.get(gen_id) {
            HeapData::Generator(generator) => generator.state,
            _ => {
                input.drop_with_heap(&mut self.heap);
                return Err(RunError::internal("resume on a non-generator"));
            }
        };
        match state {
            GenState::Running => {
                input.drop_with_heap(&mut self.heap);
                return Err(ExcType::value_error("generator already executing"));
            }
            GenState::Finished => {
                return match input {
                    GenInput::Send(value) => {
                        value.drop_with_heap(&mut self.heap);
                        Ok(None)
                    }
                    GenInput::Throw(info) => Err(RunError::Raised(info)),
                };
            }
            GenState::Created => {
                if let GenInput::Send(value) = &input
                    && !matches!(value, Value::None)
                {
                    input.drop_with_heap(&mut self.heap);
                    return Err(ExcType::type_error("can't send non-None value to a just-started generator"));
                }
            }
            GenState::Suspended => {}
        }

        let frame = match self.heap.get_mut(gen_id) {
            HeapData::Generator(generator) => {
                generator.state = GenState::Running;
                generator.frame.take()
            }
            _ => None,
        };
        let Some(mut frame) = frame else {
            input.drop_with_heap(&mut self.heap);
            return Err(RunError::internal("generator has no frame"));
        };

        let injected = match input {
            GenInput::Send(value) => {
                if state == GenState::Suspended {
                    frame.push(value);
                } else {
                    value.drop_with_heap(&mut self.heap);
                }
                None
            }
            GenInput::Throw(info) => {
                self.ctx.set_pending(info, &mut self.heap);
                Some(Signal::Exception)
            }
        };

        log::trace!("resume generator '{}' from {state:?}", frame.code.name());
        let outcome = self.run_frame_guarded(&mut frame, injected);
        match outcome {
            Ok(FrameExit::Yield(value)) => {
                if let HeapData::Generator(generator) = self.heap.get_mut(gen_id) {
                    generator.state = GenState::Suspended;
                    generator.frame = Some(frame);
                }
                Ok(Some(value))
            }
            Ok(FrameExit::Return(value)) => {
                self.finish(gen_id, *frame);
                value.drop_with_heap(&mut self.heap);
                Ok(None)
            }
            Err(err) => {
                self.finish(gen_id, *frame);
                Err(err)
            }
        }
    }

    fn finish(&mut self, gen_id: HeapId, frame: super::Frame) {
        if let HeapData::Generator(generator) = self.heap.get_mut(gen_id) {
            generator.state = GenState::Finished;
        }
        frame.drop_with_heap(&mut self.heap);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        bytecode::{CodeBuilder, Const},
        heap::Heap,
        io::NoPrint,
        resource::NoLimitTracker,
        types::{Dict, Generator},
    };

    fn vm() -> VM<NoLimitTracker, NoPrint> {
        VM::new(Heap::new(64, NoLimitTracker), NoPrint).unwrap()
    }

    /// A generator whose body is `x = yield 1; yield x`.
    fn echo_generator(vm: &mut VM<NoLimitTracker, NoPrint>) -> HeapId {
        let mut builder = CodeBuilder::function("echo", &[]);
        builder.generator();
        builder
            .load_const(Const::Int(1))
            .emit(crate::bytecode::Opcode::YieldValue)
            .store_fast("x")
            .load_fast("x")
            .emit(crate::bytecode::Opcode::YieldValue)
            .pop_top()
            .load_const(Const::None)
            .return_value();
        let code = Rc::new(builder.build().unwrap());
        let globals = vm.heap.allocate(HeapData::Dict(Dict::new())).unwrap();
        let frame = vm.new_frame(code, globals).unwrap();
        vm.heap.allocate(HeapData::Generator(Generator::new(frame))).unwrap()
    }

    #[test]
    fn send_round_trip() {
        let mut vm = vm();
        let id = echo_generator(&mut vm);
        let err = vm.resume(id, GenInput::Send(Value::Int(5))).unwrap_err();
        assert!(err.matches(ExcType::TypeError, &vm.heap));

        let first = vm.resume(id, GenInput::Send(Value::None)).unwrap();
        assert!(matches!(first, Some(Value::Int(1))));
        let echoed = vm.resume(id, GenInput::Send(Value::Int(7))).unwrap();
        assert!(matches!(echoed, Some(Value::Int(7))));
        let done = vm.resume(id, GenInput::Send(Value::None)).unwrap();
        assert!(done.is_none());
        let again = vm.resume(id, GenInput::Send(Value::None)).unwrap();
        assert!(again.is_none());
        vm.heap.dec_ref(id);
    }

    #[test]
    fn throw_finishes_the_generator() {
        let mut vm = vm();
        let id = echo_generator(&mut vm);
        vm.resume(id, GenInput::Send(Value::None)).unwrap();
        let info = vm.materialize(crate::exception_private::SimpleException::new_none(ExcType::KeyError));
        let err = vm.resume(id, GenInput::Throw(info)).unwrap_err();
        assert!(err.matches(ExcType::KeyError, &vm.heap));
        err.drop_with_heap(&mut vm.heap);
        let HeapData::Generator(generator) = vm.heap.get(id) else { panic!("not a generator") };
        assert_eq!(generator.state, GenState::Finished);
        vm.heap.dec_ref(id);
    }
}
