//! Opcode definitions for the bytecode VM.
//!
//! Bytecode is stored as raw `Vec<u8>`. The `Opcode` enum is a pure
//! discriminant with no data - operands are fetched separately from the byte stream.
//!
//! # Operand Encoding
//!
//! Opcodes below [`HAVE_ARGUMENT`] take no operand. Every other opcode is
//! followed by a little-endian `u16`. Relative jump operands count from the
//! end of the jump instruction, absolute ones are byte offsets from the start
//! of the code.
//!
//! The numbering is the classic CPython 2 table, so existing instruction
//! streams for that machine decode unchanged.

use strum::{Display, FromRepr};

/// Opcodes at or above this value carry a `u16` operand.
pub const HAVE_ARGUMENT: u8 = 90;

/// Opcode discriminant - just identifies the instruction type.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display)]
pub enum Opcode {
    // === Stack Operations (no operand) ===
    /// Discard top of stack.
    PopTop = 1,
    /// Swap top two: [a, b] -> [b, a].
    RotTwo = 2,
    /// Rotate top three: [a, b, c] -> [c, a, b].
    RotThree = 3,
    /// Duplicate top of stack.
    DupTop = 4,

    /// Logical not: not a.
    UnaryNot = 12,

    // === Binary Operations (no operand) ===
    BinaryMultiply = 20,
    BinaryAdd = 23,
    BinarySubtract = 24,
    /// Subscript: a[b].
    BinarySubscr = 25,

    /// Stack: [dict, value, key] -> [dict]; stores `dict[key] = value`.
    StoreMap = 54,
    /// Stack: [value, container, key] -> []; `container[key] = value`.
    StoreSubscr = 60,
    GetIter = 68,

    // === Print statement ===
    /// Print TOS with soft-space handling.
    PrintItem = 71,
    /// Print a newline and clear the soft-space flag.
    PrintNewline = 72,

    /// `break`.
    BreakLoop = 80,
    /// Push the frame's locals mapping (class bodies).
    LoadLocals = 82,
    ReturnValue = 83,
    /// `from module import *`; pops the module.
    ImportStar = 84,
    YieldValue = 86,
    /// Pop the top block without unwinding.
    PopBlock = 87,
    /// Finish a `finally` or unmatched `except` body: resume the saved signal.
    EndFinally = 88,
    /// Stack: [name, bases, methods] -> [class].
    BuildClass = 89,

    // === Operand opcodes ===
    /// Operand: index into `names`.
    StoreName = 90,
    /// Advance the iterator on TOS, or pop it and jump forward. Operand: relative offset.
    ForIter = 93,
    /// Stack: [value, object] -> []. Operand: name index.
    StoreAttr = 95,
    StoreGlobal = 97,
    /// Operand: index into `constants`.
    LoadConst = 100,
    LoadName = 101,
    /// Operand: item count.
    BuildTuple = 102,
    BuildList = 103,
    /// Operand: size hint, ignored.
    BuildMap = 105,
    LoadAttr = 106,
    /// Operand: a [`CompareOp`].
    CompareOp = 107,
    /// Stack: [level, fromlist] -> [module]. Operand: name index.
    ImportName = 108,
    /// Stack: [module] -> [module, attr]. Operand: name index.
    ImportFrom = 109,
    /// Operand: relative offset.
    JumpForward = 110,
    /// Operand: absolute target.
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    /// `continue` inside a try block. Operand: absolute loop start.
    ContinueLoop = 119,
    /// Operand: relative offset of the loop exit.
    SetupLoop = 120,
    /// Operand: relative offset of the handler.
    SetupExcept = 121,
    SetupFinally = 122,
    /// Operand: index into `varnames`.
    LoadFast = 124,
    StoreFast = 125,
    /// Operand: 0-3 arguments.
    RaiseVarargs = 130,
    /// Operand: call-site encoding, positional count in the low byte,
    /// keyword pair count in the high byte.
    CallFunction = 131,
    /// Operand: default count. Stack: [defaults.., code] -> [function].
    MakeFunction = 132,
    /// Stack: [defaults.., cells tuple, code] -> [function].
    MakeClosure = 134,
    /// Push the cell itself. Operand: index into cellvars then freevars.
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    /// Like `CallFunction` with a `*args` operand on top.
    CallFunctionVar = 140,
    /// Like `CallFunction` with a `**kwargs` operand on top.
    CallFunctionKw = 141,
    /// Like `CallFunction` with `*args` then `**kwargs` on top.
    CallFunctionVarKw = 142,
}

impl Opcode {
    #[must_use]
    pub fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        if self.has_arg() { 3 } else { 1 }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte).ok_or(InvalidOpcodeError(byte))
    }
}

/// Error returned when attempting to convert an invalid byte to an Opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidOpcodeError(pub u8);

impl std::fmt::Display for InvalidOpcodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid opcode byte: {}", self.0)
    }
}

impl std::error::Error for InvalidOpcodeError {}

/// Operand of `COMPARE_OP`.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum CompareOp {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
    In = 6,
    NotIn = 7,
    Is = 8,
    IsNot = 9,
    /// `except` clause matching: is TOS1 an instance/subclass of the class(es) in TOS.
    ExceptionMatch = 10,
}

impl CompareOp {
    /// Whether this is one of the six rich comparisons.
    #[must_use]
    pub fn is_rich(self) -> bool {
        (self as u16) <= Self::Ge as u16
    }

    /// Operator text used in error messages.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::ExceptionMatch => "exception match",
        }
    }
}

/// `CALL_FUNCTION_VAR`: a `*args` operand is on the stack.
pub(crate) const CALL_FLAG_VAR: u8 = 1;
/// `CALL_FUNCTION_KW`: a `**kwargs` operand is on the stack.
pub(crate) const CALL_FLAG_KW: u8 = 2;

/// Integer tags `END_FINALLY` finds on the stack after the unwind engine
/// routed a non-exception signal into a `finally` block.
pub(crate) mod why {
    pub const RETURN: i64 = 0x08;
    pub const BREAK: i64 = 0x10;
    pub const CONTINUE: i64 = 0x20;
}
