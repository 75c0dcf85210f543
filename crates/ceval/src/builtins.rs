//! Builtin functions and the builtins namespace.

use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceTracker,
    types::{Dict, dict::dict_set_str},
    value::Value,
};

/// A builtin function or exception class; lives inline in [`Value::Builtin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Builtins {
    Function(BuiltinsFunctions),
    ExcType(ExcType),
}

impl Builtins {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Function(f) => f.into(),
            Self::ExcType(e) => e.into(),
        }
    }
}

/// Builtin functions installed in every interpreter's builtins dict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum BuiltinsFunctions {
    Abs,
    Dict,
    #[strum(serialize = "__import__")]
    Import,
    Isinstance,
    Iter,
    Len,
    List,
    Range,
    Repr,
    Str,
    Tuple,
}

impl BuiltinsFunctions {
    #[must_use]
    pub fn convention(self) -> CallConvention {
        match self {
            Self::Abs | Self::Iter | Self::Len | Self::Repr => CallConvention::OneArg,
            Self::Dict => CallConvention::VarArgsKeywords,
            Self::Import | Self::Isinstance | Self::List | Self::Range | Self::Str | Self::Tuple => {
                CallConvention::VarArgs
            }
        }
    }
}

/// How a native callable receives its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallConvention {
    /// Takes nothing besides its receiver.
    NoArgs,
    /// Takes exactly one argument.
    OneArg,
    /// Takes a positional argument list and checks it itself.
    VarArgs,
    /// Like `VarArgs`, and also accepts keyword arguments.
    VarArgsKeywords,
}

impl CallConvention {
    #[must_use]
    pub fn accepts_keywords(self) -> bool {
        self == Self::VarArgsKeywords
    }
}

/// Allocates the builtins dict holding every builtin function and exception class.
pub(crate) fn create_builtins(heap: &mut Heap<impl ResourceTracker>) -> RunResult<HeapId> {
    let dict_id = heap.allocate(HeapData::Dict(Dict::new()))?;
    for function in BuiltinsFunctions::iter() {
        dict_set_str(heap, dict_id, function.into(), Value::Builtin(Builtins::Function(function)))?;
    }
    for exc_type in ExcType::iter() {
        dict_set_str(heap, dict_id, exc_type.into(), Value::Builtin(Builtins::ExcType(exc_type)))?;
    }
    Ok(dict_id)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::{resource::NoLimitTracker, types::dict::dict_get_str};

    #[test]
    fn import_hook_name() {
        let name: &'static str = BuiltinsFunctions::Import.into();
        assert_eq!(name, "__import__");
        assert_eq!(BuiltinsFunctions::from_str("isinstance").unwrap(), BuiltinsFunctions::Isinstance);
    }

    #[test]
    fn builtins_dict_has_functions_and_exceptions() {
        let mut heap = Heap::new(64, NoLimitTracker);
        let id = create_builtins(&mut heap).unwrap();
        let len = dict_get_str(&mut heap, id, "len").unwrap();
        assert!(matches!(len, Value::Builtin(Builtins::Function(BuiltinsFunctions::Len))));
        let exc = dict_get_str(&mut heap, id, "ValueError").unwrap();
        assert!(matches!(exc, Value::Builtin(Builtins::ExcType(ExcType::ValueError))));
        assert!(dict_get_str(&mut heap, id, "print").is_none());
    }
}
