use crate::value::Value;

/// Outcome of one instruction, routed by the dispatch loop.
///
/// The exception triple for `Exception` and `Reraise` lives in the execution
/// context's pending slot, not in the signal.
#[derive(Debug)]
pub(crate) enum Signal {
    /// Continue with the next instruction.
    Normal,
    /// A new exception: the unwind engine attaches traceback context first.
    Exception,
    /// An exception re-raised with its traceback intact.
    Reraise,
    Return(Value),
    Break,
    /// `continue` with the absolute offset of the loop start.
    Continue(usize),
    /// Suspend the generator frame, handing the value to the resumer.
    Yield(Value),
    /// `FOR_ITER` ran out; the dispatch loop turns this into the loop-exit jump.
    IterationEnded,
}

/// How a frame run ended without an error.
#[derive(Debug)]
pub(crate) enum FrameExit {
    Return(Value),
    /// The frame stopped at a `YIELD_VALUE` and can be resumed.
    Yield(Value),
}
