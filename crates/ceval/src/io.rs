//! Destinations for the `print` statement.
//!
//! The VM decides where soft spaces and newlines go; a writer only sees text.

use std::io::Write;

/// Receives the text produced by `PRINT_ITEM` and `PRINT_NEWLINE`.
pub trait PrintWriter {
    /// Writes the `str()` of one printed item.
    fn write_item(&mut self, text: &str);

    /// Writes a separator: the soft space before an item, or the newline
    /// that ends a statement.
    fn write_separator(&mut self, sep: char);
}

impl<W: PrintWriter + ?Sized> PrintWriter for &mut W {
    fn write_item(&mut self, text: &str) {
        (**self).write_item(text);
    }

    fn write_separator(&mut self, sep: char) {
        (**self).write_separator(sep);
    }
}

/// Writes to the process's stdout.
///
/// Write failures are logged and otherwise ignored, as `print` has no way to
/// report them to running code.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write_item(&mut self, text: &str) {
        if let Err(err) = std::io::stdout().lock().write_all(text.as_bytes()) {
            log::warn!("print: failed to write to stdout: {err}");
        }
    }

    fn write_separator(&mut self, sep: char) {
        let mut buf = [0; 4];
        self.write_item(sep.encode_utf8(&mut buf));
    }
}

/// Collects everything printed into a `String`.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn write_item(&mut self, text: &str) {
        self.0.push_str(text);
    }

    fn write_separator(&mut self, sep: char) {
        self.0.push(sep);
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write_item(&mut self, _text: &str) {}

    fn write_separator(&mut self, _sep: char) {}
}
