//! Bytecode representation and the virtual machine that executes it.
//!
//! # Module Structure
//!
//! - `op` - Opcode, compare-operator and signal-tag definitions
//! - `code` - Code object containing bytecode and metadata
//! - `builder` - CodeBuilder for assembling code objects
//! - `vm` - Dispatch loop, unwind engine and call binder

mod builder;
mod code;
mod op;
pub(crate) mod vm;

pub use builder::{BuildError, CodeBuilder, Label};
pub use code::{Code, CodeFlags, Const};
pub use op::{CompareOp, HAVE_ARGUMENT, InvalidOpcodeError, Opcode};
pub(crate) use op::{CALL_FLAG_KW, CALL_FLAG_VAR, why};
