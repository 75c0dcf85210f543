//! Assembler for code objects.
//!
//! `CodeBuilder` stands in for a compiler: it emits raw instructions, keeps the
//! constant/name/variable tables deduplicated and patches forward jumps once
//! their labels are bound.

use std::{fmt, rc::Rc};

use super::{
    code::{Code, CodeFlags, Const},
    op::{CompareOp, Opcode},
};

/// A jump target, bound to a byte offset with [`CodeBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Why a [`CodeBuilder`] could not produce a code object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// `emit` was used for an opcode that needs an operand, or the reverse.
    OperandMismatch(Opcode),
    /// A jump refers to a label that was never bound.
    UnboundLabel(Label),
    /// A label was bound twice.
    Rebound(Label),
    /// A backward relative jump, or an offset that does not fit in `u16`.
    BadJump { opcode: Opcode, target: usize },
    /// A table grew beyond `u16` entries.
    TooManyEntries(&'static str),
    /// `*args`/`**kwargs` were declared after other locals.
    ParameterLayout,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperandMismatch(op) => write!(f, "wrong operand form for {op}"),
            Self::UnboundLabel(label) => write!(f, "label {} was never bound", label.0),
            Self::Rebound(label) => write!(f, "label {} bound twice", label.0),
            Self::BadJump { opcode, target } => write!(f, "{opcode} cannot reach offset {target}"),
            Self::TooManyEntries(table) => write!(f, "too many entries in {table}"),
            Self::ParameterLayout => f.write_str("*args and **kwargs must directly follow the parameters"),
        }
    }
}

impl std::error::Error for BuildError {}

#[derive(Debug)]
struct PendingJump {
    /// Offset of the opcode byte.
    at: usize,
    opcode: Opcode,
    label: Label,
}

/// Incrementally assembles a [`Code`] object.
///
/// ```
/// use ceval::{CodeBuilder, Const, Interpreter, EvalObject};
///
/// let mut b = CodeBuilder::new("<module>");
/// b.load_const(Const::Int(42));
/// b.store_name("x");
/// b.load_name("x");
/// b.return_value();
/// let code = b.build().unwrap();
/// let mut interp = Interpreter::new();
/// assert_eq!(interp.run_module(code).unwrap(), EvalObject::Int(42));
/// ```
#[derive(Debug)]
pub struct CodeBuilder {
    name: String,
    bytecode: Vec<u8>,
    constants: Vec<Const>,
    names: Vec<String>,
    varnames: Vec<String>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
    argcount: usize,
    flags: CodeFlags,
    labels: Vec<Option<usize>>,
    jumps: Vec<PendingJump>,
    error: Option<BuildError>,
}

impl CodeBuilder {
    /// Module-level code: locals are the globals.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytecode: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            argcount: 0,
            flags: CodeFlags::empty(),
            labels: Vec::new(),
            jumps: Vec::new(),
            error: None,
        }
    }

    /// Function code with fast locals, the first of which are `params`.
    #[must_use]
    pub fn function(name: impl Into<String>, params: &[&str]) -> Self {
        let mut builder = Self::new(name);
        builder.flags = CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
        builder.varnames = params.iter().map(|p| (*p).to_owned()).collect();
        builder.argcount = params.len();
        builder
    }

    /// Class body code: runs with a fresh locals dict.
    #[must_use]
    pub fn class_body(name: impl Into<String>) -> Self {
        let mut builder = Self::new(name);
        builder.flags = CodeFlags::NEWLOCALS;
        builder
    }

    /// Collects extra positionals into a tuple local called `name`.
    pub fn varargs(&mut self, name: &str) -> &mut Self {
        if self.varnames.len() != self.argcount {
            self.fail(BuildError::ParameterLayout);
        }
        self.varnames.push(name.to_owned());
        self.flags = self.flags | CodeFlags::VARARGS;
        self
    }

    /// Collects extra keywords into a dict local called `name`.
    pub fn varkeywords(&mut self, name: &str) -> &mut Self {
        let expected = self.argcount + usize::from(self.flags.contains(CodeFlags::VARARGS));
        if self.varnames.len() != expected {
            self.fail(BuildError::ParameterLayout);
        }
        self.varnames.push(name.to_owned());
        self.flags = self.flags | CodeFlags::VARKEYWORDS;
        self
    }

    /// Marks the code as a generator body.
    pub fn generator(&mut self) -> &mut Self {
        self.flags = self.flags | CodeFlags::GENERATOR;
        self
    }

    /// Declares a cell variable (a local captured by an inner closure).
    pub fn cellvar(&mut self, name: &str) -> u16 {
        let index = intern(&mut self.cellvars, name);
        self.table_index(index, "cellvars")
    }

    /// Declares a free variable (a cell received from the enclosing scope).
    ///
    /// Deref operands for free variables come after all cellvars, so declare
    /// every cellvar first.
    pub fn freevar(&mut self, name: &str) -> u16 {
        let index = self.cellvars.len() + intern(&mut self.freevars, name);
        self.table_index(index, "freevars")
    }

    /// Allocates a new unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        if self.labels[label.0].is_some() {
            self.fail(BuildError::Rebound(label));
        } else {
            self.labels[label.0] = Some(self.bytecode.len());
        }
        self
    }

    /// Current byte offset.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.bytecode.len()
    }

    /// Emits an opcode without an operand.
    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        if opcode.has_arg() {
            self.fail(BuildError::OperandMismatch(opcode));
        }
        self.bytecode.push(opcode as u8);
        self
    }

    /// Emits an opcode with a `u16` operand.
    pub fn emit_arg(&mut self, opcode: Opcode, arg: u16) -> &mut Self {
        if !opcode.has_arg() {
            self.fail(BuildError::OperandMismatch(opcode));
        }
        self.bytecode.push(opcode as u8);
        self.bytecode.extend_from_slice(&arg.to_le_bytes());
        self
    }

    /// Emits a jump to `label`, patched when the code is built.
    pub fn emit_jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        self.jumps.push(PendingJump {
            at: self.bytecode.len(),
            opcode,
            label,
        });
        self.emit_arg(opcode, 0)
    }

    pub fn load_const(&mut self, value: Const) -> &mut Self {
        let index = self.constants.iter().position(|c| *c == value).unwrap_or_else(|| {
            self.constants.push(value);
            self.constants.len() - 1
        });
        let index = self.table_index(index, "constants");
        self.emit_arg(Opcode::LoadConst, index)
    }

    /// Loads a nested code object, e.g. for `MAKE_FUNCTION`.
    pub fn load_code(&mut self, code: Code) -> &mut Self {
        self.load_const(Const::Code(Rc::new(code)))
    }

    pub fn load_name(&mut self, name: &str) -> &mut Self {
        self.name_op(Opcode::LoadName, name)
    }

    pub fn store_name(&mut self, name: &str) -> &mut Self {
        self.name_op(Opcode::StoreName, name)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        self.name_op(Opcode::LoadGlobal, name)
    }

    pub fn store_global(&mut self, name: &str) -> &mut Self {
        self.name_op(Opcode::StoreGlobal, name)
    }

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        self.name_op(Opcode::LoadAttr, name)
    }

    pub fn store_attr(&mut self, name: &str) -> &mut Self {
        self.name_op(Opcode::StoreAttr, name)
    }

    pub fn import_name(&mut self, name: &str) -> &mut Self {
        self.name_op(Opcode::ImportName, name)
    }

    pub fn import_from(&mut self, name: &str) -> &mut Self {
        self.name_op(Opcode::ImportFrom, name)
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        self.fast_op(Opcode::LoadFast, name)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        self.fast_op(Opcode::StoreFast, name)
    }

    pub fn load_deref(&mut self, slot: u16) -> &mut Self {
        self.emit_arg(Opcode::LoadDeref, slot)
    }

    pub fn store_deref(&mut self, slot: u16) -> &mut Self {
        self.emit_arg(Opcode::StoreDeref, slot)
    }

    pub fn load_closure(&mut self, slot: u16) -> &mut Self {
        self.emit_arg(Opcode::LoadClosure, slot)
    }

    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.emit_arg(Opcode::CompareOp, op as u16)
    }

    /// `CALL_FUNCTION` family; the variant is picked from `star` and `star_star`.
    pub fn call(&mut self, positional: u8, keywords: u8, star: bool, star_star: bool) -> &mut Self {
        let opcode = match (star, star_star) {
            (false, false) => Opcode::CallFunction,
            (true, false) => Opcode::CallFunctionVar,
            (false, true) => Opcode::CallFunctionKw,
            (true, true) => Opcode::CallFunctionVarKw,
        };
        self.emit_arg(opcode, u16::from_le_bytes([positional, keywords]))
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.emit(Opcode::ReturnValue)
    }

    pub fn pop_top(&mut self) -> &mut Self {
        self.emit(Opcode::PopTop)
    }

    /// Finishes the code object, patching all jumps.
    pub fn build(mut self) -> Result<Code, BuildError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        for jump in &self.jumps {
            let target = self.labels[jump.label.0].ok_or(BuildError::UnboundLabel(jump.label))?;
            let operand = if is_relative(jump.opcode) {
                target.checked_sub(jump.at + 3)
            } else {
                Some(target)
            };
            let operand = operand
                .and_then(|o| u16::try_from(o).ok())
                .ok_or(BuildError::BadJump {
                    opcode: jump.opcode,
                    target,
                })?;
            self.bytecode[jump.at + 1..jump.at + 3].copy_from_slice(&operand.to_le_bytes());
        }
        let mut flags = self.flags;
        if self.cellvars.is_empty() && self.freevars.is_empty() {
            flags = flags | CodeFlags::NOFREE;
        }
        Ok(Code {
            name: self.name,
            bytecode: self.bytecode,
            constants: self.constants,
            names: self.names,
            varnames: self.varnames,
            cellvars: self.cellvars,
            freevars: self.freevars,
            argcount: self.argcount,
            flags,
        })
    }

    fn name_op(&mut self, opcode: Opcode, name: &str) -> &mut Self {
        let index = intern(&mut self.names, name);
        let index = self.table_index(index, "names");
        self.emit_arg(opcode, index)
    }

    fn fast_op(&mut self, opcode: Opcode, name: &str) -> &mut Self {
        let index = intern(&mut self.varnames, name);
        let index = self.table_index(index, "varnames");
        self.emit_arg(opcode, index)
    }

    fn table_index(&mut self, index: usize, table: &'static str) -> u16 {
        u16::try_from(index).unwrap_or_else(|_| {
            self.fail(BuildError::TooManyEntries(table));
            0
        })
    }

    fn fail(&mut self, err: BuildError) {
        self.error.get_or_insert(err);
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> usize {
    table.iter().position(|n| n == name).unwrap_or_else(|| {
        table.push(name.to_owned());
        table.len() - 1
    })
}

fn is_relative(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::ForIter | Opcode::JumpForward | Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_jumps_count_from_instruction_end() {
        let mut b = CodeBuilder::new("m");
        let end = b.new_label();
        b.emit_jump(Opcode::SetupLoop, end);
        b.emit(Opcode::PopBlock);
        b.bind(end);
        b.load_const(Const::None).return_value();
        let code = b.build().unwrap();
        assert_eq!(&code.bytecode()[..4], &[120, 1, 0, 87]);
    }

    #[test]
    fn absolute_jumps_are_offsets() {
        let mut b = CodeBuilder::new("m");
        let top = b.new_label();
        b.bind(top);
        b.load_const(Const::Bool(true));
        b.emit_jump(Opcode::PopJumpIfTrue, top);
        let code = b.build().unwrap();
        assert_eq!(&code.bytecode()[3..], &[115, 0, 0]);
    }

    #[test]
    fn tables_are_deduplicated() {
        let mut b = CodeBuilder::function("f", &["x"]);
        b.load_fast("x").load_fast("y").load_fast("x");
        b.load_const(Const::Int(1)).load_const(Const::Int(1));
        let code = b.build().unwrap();
        assert_eq!(code.varnames(), ["x", "y"]);
        assert_eq!(code.constants().len(), 1);
        assert!(code.is_simple());
    }

    #[test]
    fn errors_surface_at_build() {
        let mut b = CodeBuilder::new("m");
        b.emit(Opcode::LoadConst);
        assert_eq!(b.build().unwrap_err(), BuildError::OperandMismatch(Opcode::LoadConst));

        let mut b = CodeBuilder::new("m");
        let nowhere = b.new_label();
        b.emit_jump(Opcode::JumpAbsolute, nowhere);
        assert!(matches!(b.build(), Err(BuildError::UnboundLabel(_))));

        let mut b = CodeBuilder::function("f", &["a"]);
        b.load_fast("tmp");
        b.varargs("args");
        assert_eq!(b.build().unwrap_err(), BuildError::ParameterLayout);
    }
}
