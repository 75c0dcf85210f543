use indexmap::IndexMap;

use crate::{
    exception_private::{ExcType, RunResult},
    heap::Heap,
    resource::ResourceTracker,
    value::Value,
};

/// Positional arguments handed to a native callable.
///
/// Uses specific variants for the common cases (0-2 arguments) so most native
/// calls don't need a `Vec`.
#[derive(Debug)]
pub(crate) enum ArgValues {
    Zero,
    One(Value),
    Two(Value, Value),
    Many(Vec<Value>),
}

impl ArgValues {
    #[must_use]
    pub fn from_vec(mut args: Vec<Value>) -> Self {
        match args.len() {
            0 => Self::Zero,
            1 => Self::One(args.remove(0)),
            2 => {
                let b = args.remove(1);
                let a = args.remove(0);
                Self::Two(a, b)
            }
            _ => Self::Many(args),
        }
    }

    /// Checks that zero arguments were passed.
    pub fn check_zero_args(self, name: &str, heap: &mut Heap<impl ResourceTracker>) -> RunResult<()> {
        match self {
            Self::Zero => Ok(()),
            other => {
                let count = other.count();
                other.drop_with_heap(heap);
                Err(ExcType::type_error_no_args(name, count))
            }
        }
    }

    /// Checks that exactly one argument was passed, returning it.
    pub fn get_one_arg(self, name: &str, heap: &mut Heap<impl ResourceTracker>) -> RunResult<Value> {
        match self {
            Self::One(a) => Ok(a),
            other => {
                let count = other.count();
                other.drop_with_heap(heap);
                Err(ExcType::type_error_one_arg(name, count))
            }
        }
    }

    /// Checks that one or two arguments were passed.
    pub fn get_one_two_args(
        self,
        name: &str,
        heap: &mut Heap<impl ResourceTracker>,
    ) -> RunResult<(Value, Option<Value>)> {
        match self {
            Self::One(a) => Ok((a, None)),
            Self::Two(a, b) => Ok((a, Some(b))),
            Self::Zero => Err(ExcType::type_error_arg_count(name, "at least", 1, 0)),
            Self::Many(args) => {
                let count = args.len();
                Self::Many(args).drop_with_heap(heap);
                Err(ExcType::type_error_arg_count(name, "at most", 2, count))
            }
        }
    }

    /// Checks the count lies in `min..=max`, returning the arguments.
    pub fn get_range(
        self,
        name: &str,
        min: usize,
        max: usize,
        heap: &mut Heap<impl ResourceTracker>,
    ) -> RunResult<Vec<Value>> {
        let count = self.count();
        if count < min || count > max {
            self.drop_with_heap(heap);
            let (qualifier, expected) = if min == max {
                ("exactly", min)
            } else if count < min {
                ("at least", min)
            } else {
                ("at most", max)
            };
            return Err(ExcType::type_error_arg_count(name, qualifier, expected, count));
        }
        Ok(self.into_vec())
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            Self::Zero => vec![],
            Self::One(a) => vec![a],
            Self::Two(a, b) => vec![a, b],
            Self::Many(args) => args,
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One(_) => 1,
            Self::Two(_, _) => 2,
            Self::Many(args) => args.len(),
        }
    }

    /// Properly drops all values in the arguments, decrementing reference counts.
    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        for value in self.into_vec() {
            value.drop_with_heap(heap);
        }
    }
}

/// Keyword arguments after the call binder has merged the call-site pairs
/// and any `**` mapping. Keys are unique and keep call-site order.
#[derive(Debug, Default)]
pub(crate) struct Kwargs(IndexMap<String, Value>);

impl Kwargs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Adds a keyword, handing the value back if the key is already present.
    pub fn insert(&mut self, key: String, value: Value) -> Result<(), (String, Value)> {
        if self.0.contains_key(&key) {
            return Err((key, value));
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>) {
        for (_, value) in self.0 {
            value.drop_with_heap(heap);
        }
    }
}

impl IntoIterator for Kwargs {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
