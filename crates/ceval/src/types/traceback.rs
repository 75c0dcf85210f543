/// One frame of traceback context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TracebackEntry {
    /// Name of the code object that was executing.
    pub name: String,
    /// Byte offset of the instruction that raised or propagated the exception.
    pub offset: usize,
}

/// Traceback object, outermost frame first.
///
/// Immutable once allocated: propagating through another frame allocates a new
/// traceback with that frame prepended, so a traceback saved by an `except`
/// block never changes under it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Traceback {
    entries: Vec<TracebackEntry>,
}

impl Traceback {
    /// A traceback for a frame with `previous` (the inner frames) appended.
    #[must_use]
    pub fn here(entry: TracebackEntry, previous: Option<&Self>) -> Self {
        let mut entries = Vec::with_capacity(previous.map_or(0, |tb| tb.entries.len()) + 1);
        entries.push(entry);
        if let Some(previous) = previous {
            entries.extend(previous.entries.iter().cloned());
        }
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[TracebackEntry] {
        &self.entries
    }
}
