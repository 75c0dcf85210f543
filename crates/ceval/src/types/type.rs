use std::fmt;

use crate::exception_private::ExcType;

/// The runtime type of a value, used for `isinstance`-style checks and in
/// error messages such as `'int' object is not callable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Type {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Function,
    BoundMethod,
    BuiltinFunction,
    Class,
    Instance,
    Module,
    Code,
    Cell,
    Iterator,
    Generator,
    Traceback,
    /// A builtin exception class.
    Type,
    /// An instance of a builtin exception class.
    Exception(ExcType),
    /// An unbound fast-local slot; never visible to programs.
    Undefined,
}

impl Type {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NoneType => "NoneType",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Dict => "dict",
            Self::Function => "function",
            Self::BoundMethod => "instancemethod",
            Self::BuiltinFunction => "builtin_function_or_method",
            Self::Class => "classobj",
            Self::Instance => "instance",
            Self::Module => "module",
            Self::Code => "code",
            Self::Cell => "cell",
            Self::Iterator => "iterator",
            Self::Generator => "generator",
            Self::Traceback => "traceback",
            Self::Type => "type",
            Self::Exception(exc_type) => exc_type.into(),
            Self::Undefined => "undefined",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
