#![doc = include_str!("../../../README.md")]
mod args;
mod builtins;
mod bytecode;
mod exception_private;
mod exception_public;
mod for_iterator;
mod heap;
mod io;
mod object;
mod resource;
mod run;
mod types;
mod value;

pub use crate::{
    bytecode::{
        BuildError, Code, CodeBuilder, CodeFlags, CompareOp, Const, HAVE_ARGUMENT, InvalidOpcodeError, Label, Opcode,
        vm::{HookError, InterruptHandle, TraceEvent, TraceHook, WarningPolicy},
    },
    exception_private::ExcType,
    exception_public::{EvalError, EvalException, StackFrame},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::EvalObject,
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    run::Interpreter,
};
