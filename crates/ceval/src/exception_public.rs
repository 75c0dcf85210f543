use std::fmt;

use crate::exception_private::ExcType;

/// One frame of a traceback, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Name of the code object that was executing.
    pub name: String,
    /// Byte offset of the instruction that raised or propagated the exception.
    pub offset: usize,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  in {} at offset {}", self.name, self.offset)
    }
}

/// An exception that escaped the module frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalException {
    /// Class name: a builtin such as `ValueError`, a user class name, or the
    /// text of a legacy string exception.
    pub exc_type: String,
    /// The exception's message, if it carried one.
    pub message: Option<String>,
    /// Frames the exception propagated through, outermost first.
    pub traceback: Vec<StackFrame>,
}

impl EvalException {
    /// The builtin exception type, `None` for user classes and string exceptions.
    #[must_use]
    pub fn builtin_type(&self) -> Option<ExcType> {
        self.exc_type.parse().ok()
    }

    /// Whether this is a builtin exception of `exc_type` or one of its subclasses.
    #[must_use]
    pub fn is(&self, exc_type: ExcType) -> bool {
        self.builtin_type().is_some_and(|t| t.is_subclass_of(exc_type))
    }

    /// `ExcType: message`, the last line Python prints for an uncaught exception.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.message {
            Some(message) if !message.is_empty() => format!("{}: {message}", self.exc_type),
            _ => self.exc_type.clone(),
        }
    }
}

impl fmt::Display for EvalException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.traceback.is_empty() {
            writeln!(f, "Traceback (most recent call last):")?;
            for frame in &self.traceback {
                writeln!(f, "{frame}")?;
            }
        }
        f.write_str(&self.summary())
    }
}

impl std::error::Error for EvalException {}

/// Failure of [`crate::Interpreter`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A program exception nothing caught.
    Exception(EvalException),
    /// Malformed bytecode or a broken caller contract. Never catchable by
    /// program `except` blocks.
    Internal(String),
}

impl EvalError {
    /// The escaped exception, if this is one.
    #[must_use]
    pub fn exception(&self) -> Option<&EvalException> {
        match self {
            Self::Exception(exc) => Some(exc),
            Self::Internal(_) => None,
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(exc) => write!(f, "{exc}"),
            Self::Internal(msg) => write!(f, "Internal Error: {msg}"),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<EvalException> for EvalError {
    fn from(exc: EvalException) -> Self {
        Self::Exception(exc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_traceback() {
        let exc = EvalException {
            exc_type: "KeyError".to_owned(),
            message: Some("'x'".to_owned()),
            traceback: vec![
                StackFrame {
                    name: "<module>".to_owned(),
                    offset: 6,
                },
                StackFrame {
                    name: "f".to_owned(),
                    offset: 2,
                },
            ],
        };
        assert_eq!(
            exc.to_string(),
            "Traceback (most recent call last):\n  in <module> at offset 6\n  in f at offset 2\nKeyError: 'x'"
        );
        assert!(exc.is(ExcType::LookupError));
    }

    #[test]
    fn string_exceptions_have_no_builtin_type() {
        let exc = EvalException {
            exc_type: "oops".to_owned(),
            message: None,
            traceback: vec![],
        };
        assert_eq!(exc.builtin_type(), None);
        assert_eq!(exc.summary(), "oops");
    }
}
