//! Code objects: bytecode plus the tables its operands index into.

use std::{fmt, ops::BitOr, rc::Rc};

use serde::{Deserialize, Serialize};

/// Code flag bits, matching the classic `co_flags` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CodeFlags(u32);

impl CodeFlags {
    /// Locals live in fast slots only; the frame has no locals mapping.
    pub const OPTIMIZED: Self = Self(0x01);
    /// The frame gets a fresh locals mapping instead of sharing globals.
    pub const NEWLOCALS: Self = Self(0x02);
    /// Extra positionals are collected into a `*args` tuple.
    pub const VARARGS: Self = Self(0x04);
    /// Extra keywords are collected into a `**kwargs` dict.
    pub const VARKEYWORDS: Self = Self(0x08);
    /// Calling the function returns a generator.
    pub const GENERATOR: Self = Self(0x20);
    /// No cell or free variables.
    pub const NOFREE: Self = Self(0x40);

    /// The flags of a plain function eligible for the fast call path.
    pub const SIMPLE_FUNCTION: Self = Self(Self::OPTIMIZED.0 | Self::NEWLOCALS.0 | Self::NOFREE.0);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A constant in a code object's constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Const>),
    /// A nested code object, consumed by `MAKE_FUNCTION`/`MAKE_CLOSURE`/class bodies.
    Code(Rc<Code>),
}

/// A compiled unit: a module body, function body or class body.
///
/// Immutable once built. Functions and frames share it through `Rc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub(crate) name: String,
    pub(crate) bytecode: Vec<u8>,
    pub(crate) constants: Vec<Const>,
    /// Names used by `*_NAME`, `*_GLOBAL`, `*_ATTR` and import opcodes.
    pub(crate) names: Vec<String>,
    /// Fast-local names; the first `argcount` are the positional parameters,
    /// followed by `*args` and then `**kwargs` when the flags ask for them.
    pub(crate) varnames: Vec<String>,
    pub(crate) cellvars: Vec<String>,
    pub(crate) freevars: Vec<String>,
    pub(crate) argcount: usize,
    pub(crate) flags: CodeFlags,
}

impl Code {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[must_use]
    pub fn constants(&self) -> &[Const] {
        &self.constants
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn varnames(&self) -> &[String] {
        &self.varnames
    }

    #[must_use]
    pub fn cellvars(&self) -> &[String] {
        &self.cellvars
    }

    #[must_use]
    pub fn freevars(&self) -> &[String] {
        &self.freevars
    }

    #[must_use]
    pub fn argcount(&self) -> usize {
        self.argcount
    }

    #[must_use]
    pub fn flags(&self) -> CodeFlags {
        self.flags
    }

    /// Plain positional-only function with no cells: eligible for the fast call path.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.flags == CodeFlags::SIMPLE_FUNCTION
    }

    /// Number of fast-local slots, including `*args`/`**kwargs`.
    #[must_use]
    pub fn nlocals(&self) -> usize {
        self.varnames.len()
    }

    /// Cell slots owned by frames of this code: own cells then closure cells.
    #[must_use]
    pub fn ncells(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }

    /// Name of cell slot `index`, covering both cellvars and freevars.
    #[must_use]
    pub fn cell_name(&self, index: usize) -> Option<&str> {
        self.cellvars
            .get(index)
            .or_else(|| self.freevars.get(index.checked_sub(self.cellvars.len())?))
            .map(String::as_str)
    }

    /// Serializes the code object with postcard.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a code object produced by [`Code::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<code object {}>", self.name)
    }
}
