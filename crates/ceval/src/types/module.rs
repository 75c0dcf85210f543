use crate::{heap::HeapId, types::Dict};

/// A module registered by the host and returned by `__import__`.
#[derive(Debug)]
pub(crate) struct Module {
    pub name: String,
    pub attrs: Dict,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Dict::new(),
        }
    }

    pub fn dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        self.attrs.dec_ref_ids(stack);
    }
}
