//! Per-interpreter execution state shared by every frame.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    exception_private::{ExcInfo, ExcType, RunResult, SimpleException},
    heap::Heap,
    resource::ResourceTracker,
};

/// Event reported to a [`TraceHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent<'a> {
    /// An exception was raised in, or propagated into, a frame.
    Exception {
        /// Name of the code object running in that frame.
        function: &'a str,
        /// Offset of the instruction that failed.
        offset: usize,
        /// Class name of the exception.
        exc_type: &'a str,
    },
    /// A native function or method is about to be called.
    NativeCall { name: &'a str },
    /// A native call returned normally.
    NativeReturn { name: &'a str },
    /// A native call raised.
    NativeException { name: &'a str },
}

/// Error returned by a failing trace hook. The interpreter logs it and
/// carries on as if the hook had not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookError(pub String);

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace hook failed: {}", self.0)
    }
}

impl std::error::Error for HookError {}

/// Observer for exception propagation and native calls.
pub trait TraceHook {
    fn on_event(&mut self, event: &TraceEvent<'_>) -> Result<(), HookError>;
}

impl<F> TraceHook for F
where
    F: FnMut(&TraceEvent<'_>) -> Result<(), HookError>,
{
    fn on_event(&mut self, event: &TraceEvent<'_>) -> Result<(), HookError> {
        self(event)
    }
}

/// Requests a `KeyboardInterrupt` at the interpreter's next instruction boundary.
///
/// Cheap to clone and safe to use from other threads.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the request, returning whether one was pending.
    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// What happens when code triggers a `DeprecationWarning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarningPolicy {
    /// Drop the warning silently.
    Ignore,
    /// Report it through the `log` facade at warn level.
    #[default]
    Log,
    /// Raise it as an exception instead of continuing.
    Error,
}

/// State the dispatch loop threads through every frame.
#[derive(Default)]
pub(crate) struct ExecContext {
    /// The exception being propagated, set between a raise and the handler that catches it.
    pub pending: Option<ExcInfo>,
    /// The exception being handled by the innermost active `except` block.
    pub current: Option<ExcInfo>,
    pub trace_hook: Option<Box<dyn TraceHook>>,
    pub interrupt: InterruptHandle,
    pub warning_policy: WarningPolicy,
    /// Print-statement soft-space flag.
    pub softspace: bool,
    /// Number of frames currently running.
    pub depth: usize,
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("pending", &self.pending)
            .field("current", &self.current)
            .field("trace_hook", &self.trace_hook.is_some())
            .field("warning_policy", &self.warning_policy)
            .field("softspace", &self.softspace)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl ExecContext {
    /// Reports `event` to the trace hook, if any.
    pub fn trace(&mut self, event: &TraceEvent<'_>) {
        if let Some(hook) = &mut self.trace_hook
            && let Err(err) = hook.on_event(event)
        {
            log::warn!("{err}; event skipped: {event:?}");
        }
    }

    /// Emits a `DeprecationWarning` according to the warning policy.
    pub fn deprecation_warning(&self, message: &str) -> RunResult<()> {
        match self.warning_policy {
            WarningPolicy::Ignore => Ok(()),
            WarningPolicy::Log => {
                log::warn!("DeprecationWarning: {message}");
                Ok(())
            }
            WarningPolicy::Error => Err(SimpleException::new_msg(ExcType::DeprecationWarning, message).into()),
        }
    }

    /// Replaces the pending exception, releasing the old one.
    pub fn set_pending(&mut self, info: ExcInfo, heap: &mut Heap<impl ResourceTracker>) {
        if let Some(old) = self.pending.replace(info) {
            old.drop_with_heap(heap);
        }
    }

    /// Releases every exception the context holds.
    pub fn clear(&mut self, heap: &mut Heap<impl ResourceTracker>) {
        if let Some(info) = self.pending.take() {
            info.drop_with_heap(heap);
        }
        if let Some(info) = self.current.take() {
            info.drop_with_heap(heap);
        }
        self.softspace = false;
        self.depth = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_consumed_once() {
        let handle = InterruptHandle::default();
        let remote = handle.clone();
        remote.interrupt();
        assert!(handle.is_pending());
        assert!(handle.take());
        assert!(!handle.take());
    }

    #[test]
    fn error_policy_raises() {
        let ctx = ExecContext {
            warning_policy: WarningPolicy::Error,
            ..ExecContext::default()
        };
        let Err(crate::exception_private::RunError::Exc(exc)) = ctx.deprecation_warning("old") else {
            panic!("expected a raised warning");
        };
        assert_eq!(exc.exc_type(), ExcType::DeprecationWarning);
        assert!(ExecContext::default().deprecation_warning("old").is_ok());
    }

    #[test]
    fn failing_hook_is_skipped() {
        let mut calls = 0;
        let mut ctx = ExecContext::default();
        ctx.trace_hook = Some(Box::new(move |_: &TraceEvent<'_>| {
            calls += 1;
            Err(HookError(format!("call {calls}")))
        }));
        ctx.trace(&TraceEvent::NativeCall { name: "len" });
        ctx.trace(&TraceEvent::NativeReturn { name: "len" });
        assert!(ctx.trace_hook.is_some());
    }
}
