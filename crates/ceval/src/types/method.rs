use strum::{Display, IntoStaticStr};

use crate::{
    builtins::CallConvention,
    heap::HeapId,
    types::Type,
    value::Value,
};

/// A native method bound to its receiver, e.g. `[].append`.
///
/// This is the native counterpart of [`super::BoundMethod`]: the receiver
/// travels inside the callable, so the call binder's native fast path sees the
/// same argument counts the program wrote.
#[derive(Debug)]
pub(crate) struct NativeMethod {
    pub receiver: Value,
    pub kind: MethodKind,
}

impl NativeMethod {
    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.receiver.dec_ref_ids(stack);
    }
}

/// Native methods available on builtin types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum MethodKind {
    Append,
    Pop,
    Keys,
    Get,
    Upper,
    Join,
    Next,
    Send,
    Throw,
}

impl MethodKind {
    /// Finds the method called `name` on values of type `type_`.
    #[must_use]
    pub fn lookup(type_: Type, name: &str) -> Option<Self> {
        let kind = match (type_, name) {
            (Type::List, "append") => Self::Append,
            (Type::List, "pop") => Self::Pop,
            (Type::Dict, "keys") => Self::Keys,
            (Type::Dict, "get") => Self::Get,
            (Type::Str, "upper") => Self::Upper,
            (Type::Str, "join") => Self::Join,
            (Type::Generator, "next") => Self::Next,
            (Type::Generator, "send") => Self::Send,
            (Type::Generator, "throw") => Self::Throw,
            _ => return None,
        };
        Some(kind)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    #[must_use]
    pub fn convention(self) -> CallConvention {
        match self {
            Self::Keys | Self::Upper | Self::Next => CallConvention::NoArgs,
            Self::Append | Self::Join | Self::Send => CallConvention::OneArg,
            Self::Pop | Self::Get | Self::Throw => CallConvention::VarArgs,
        }
    }
}
