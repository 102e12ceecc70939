//! Ordered, owning collections of operations.

use core::fmt;
use core::ops::Deref;

use crate::error::Result;
use crate::thunk::{BufferUses, ResourceUses, Thunk, ThunkKind};

/// An ordered program region: the top level, a branch, or a loop body.
///
/// Each operation is owned by exactly one sequence. Declaration order is kept
/// for diagnostics and deterministic tie-breaking even though execution order
/// is driven by footprints.
#[derive(Default)]
pub struct ThunkSequence {
    thunks: Vec<Box<dyn Thunk>>,
}

impl ThunkSequence {
    /// A sequence with no operations; executing it completes immediately.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A sequence holding the single operation built by `factory`.
    pub fn of<T, F>(factory: F) -> Result<Self>
    where
        T: Thunk + 'static,
        F: FnOnce() -> Result<T>,
    {
        let thunk = factory()?;
        Ok(Self {
            thunks: vec![Box::new(thunk)],
        })
    }

    /// Appends one operation.
    pub fn push<T: Thunk + 'static>(&mut self, thunk: T) {
        self.thunks.push(Box::new(thunk));
    }

    /// Appends one boxed operation.
    pub fn push_boxed(&mut self, thunk: Box<dyn Thunk>) {
        self.thunks.push(thunk);
    }

    /// Splices `other` onto the end of this sequence.
    pub fn append(&mut self, other: Self) {
        self.thunks.extend(other.thunks);
    }

    /// Concatenated buffer footprint. Duplicates are kept.
    #[must_use]
    pub fn buffer_uses(&self) -> BufferUses {
        self.thunks.iter().flat_map(|t| t.buffer_uses()).collect()
    }

    /// Concatenated resource footprint. Duplicates are kept.
    #[must_use]
    pub fn resource_uses(&self) -> ResourceUses {
        self.thunks.iter().flat_map(|t| t.resource_uses()).collect()
    }

    /// Returns true if any operation here or in a nested sequence matches.
    pub fn contains_kind(&self, pred: &dyn Fn(ThunkKind) -> bool) -> bool {
        self.thunks.iter().any(|t| {
            pred(t.kind())
                || t
                    .nested_sequences()
                    .into_iter()
                    .any(|nested| nested.contains_kind(pred))
        })
    }
}

impl Deref for ThunkSequence {
    type Target = [Box<dyn Thunk>];

    fn deref(&self) -> &Self::Target {
        &self.thunks
    }
}

impl From<Vec<Box<dyn Thunk>>> for ThunkSequence {
    fn from(thunks: Vec<Box<dyn Thunk>>) -> Self {
        Self { thunks }
    }
}

impl FromIterator<Box<dyn Thunk>> for ThunkSequence {
    fn from_iter<I: IntoIterator<Item = Box<dyn Thunk>>>(iter: I) -> Self {
        Self {
            thunks: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ThunkSequence {
    type Item = &'a Box<dyn Thunk>;
    type IntoIter = std::slice::Iter<'a, Box<dyn Thunk>>;

    fn into_iter(self) -> Self::IntoIter {
        self.thunks.iter()
    }
}

impl fmt::Debug for ThunkSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.thunks.iter().map(|t| (t.kind(), &t.info().op_name)))
            .finish()
    }
}
