use std::fmt::{self, Write};

/// String value stored on the heap.
///
/// `len()` counts Unicode codepoints.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Str(String);

impl Str {
    #[must_use]
    pub fn new(s: String) -> Self {
        Self(s)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    /// The character at `index`, which may be negative to count from the end.
    #[must_use]
    pub fn char_at(&self, index: i64) -> Option<char> {
        let len = self.char_len();
        let index = normalize_index(index, len)?;
        self.0.chars().nth(index)
    }
}

impl From<String> for Str {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Resolves a possibly negative sequence index against `len`.
#[must_use]
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

/// Writes the quoted `repr()` form of a string.
pub(crate) fn string_repr_fmt(s: &str, f: &mut impl Write) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c if c.is_control() => write!(f, "\\x{:02x}", u32::from(c))?,
            _ => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}
