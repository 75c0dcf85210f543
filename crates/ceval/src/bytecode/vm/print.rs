//! `PRINT_ITEM` and `PRINT_NEWLINE`.

use super::{Frame, VM};
use crate::{io::PrintWriter, resource::ResourceTracker};

impl<T: ResourceTracker, P: PrintWriter> VM<T, P> {
    pub(super) fn print_item(&mut self, frame: &mut Frame) {
        let value = frame.pop();
        let text = value.py_str(&self.heap);
        // a string ending in a non-space whitespace char suppresses the next separator
        let ends_line = value
            .as_str(&self.heap)
            .and_then(|s| s.chars().next_back())
            .is_some_and(|c| matches!(c, '\t' | '\n' | '\x0b' | '\x0c' | '\r'));
        value.drop_with_heap(&mut self.heap);

        if self.ctx.softspace {
            self.print_writer.write_separator(' ');
        }
        self.print_writer.write_item(&text);
        self.ctx.softspace = !ends_line;
    }

    pub(super) fn print_newline(&mut self) {
        self.print_writer.write_separator('\n');
        self.ctx.softspace = false;
    }
}
