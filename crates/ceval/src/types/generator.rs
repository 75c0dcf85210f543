use crate::{bytecode::vm::Frame, heap::HeapId};

/// Lifecycle of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GenState {
    /// Arguments are bound but no instruction has run.
    Created,
    /// Stopped at a `YIELD_VALUE`.
    Suspended,
    /// Its frame is currently on the interpreter's call chain.
    Running,
    /// Returned or raised; resuming reports exhaustion.
    Finished,
}

/// A generator object: a suspended frame kept as a value.
///
/// While the generator runs, the frame is moved out onto the native call
/// chain (`frame` is `None`), so re-entering it is detected as
/// "generator already executing".
#[derive(Debug)]
pub(crate) struct Generator {
    pub name: String,
    pub state: GenState,
    pub frame: Option<Box<Frame>>,
}

impl Generator {
    #[must_use]
    pub fn new(frame: Frame) -> Self {
        Self {
            name: frame.code.name().to_owned(),
            state: GenState::Created,
            frame: Some(Box::new(frame)),
        }
    }

    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        if let Some(frame) = &mut self.frame {
            frame.dec_ref_ids(stack);
        }
    }
}
