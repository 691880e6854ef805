//! Journal positions and the immutable entry record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of an entry in the journal.
///
/// Indices are totally ordered and strictly increasing. The journal's root
/// value (see [`JournalBuilder::root`](crate::JournalBuilder::root)) never
/// names a real entry; it only stands for "no parent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index(u64);

impl Index {
    /// The conventional root: the first real entry of a journal rooted here
    /// is `Index(1)`.
    pub const ROOT: Index = Index(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The index that directly follows this one.
    ///
    /// Returns `None` on overflow.
    pub fn next(self) -> Option<Index> {
        self.0.checked_add(1).map(Index)
    }

    /// The index that directly precedes this one, or `None` below zero.
    pub fn prev(self) -> Option<Index> {
        self.0.checked_sub(1).map(Index)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Index {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// One immutable record of the journal.
///
/// For the sequential scheme `parent_index == index - 1`, which is what
/// [`Entry::new`] produces. [`Entry::with_parent`] keeps an explicit parent
/// for non-linear histories; the sequential [`Journal`](crate::Journal)
/// rejects such entries unless the parent happens to be its tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    index: Index,
    parent_index: Index,
    payload: Vec<u8>,
}

impl Entry {
    /// Build a sequential entry whose parent is `index - 1`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is `Index(0)`, which has no predecessor and can
    /// never carry a payload.
    pub fn new(index: Index, payload: impl Into<Vec<u8>>) -> Self {
        let parent_index = index
            .prev()
            .unwrap_or_else(|| panic!("entry index {index} has no parent"));
        Self {
            index,
            parent_index,
            payload: payload.into(),
        }
    }

    /// Build an entry with an explicit parent index.
    pub fn with_parent(index: Index, parent_index: Index, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            index,
            parent_index,
            payload: payload.into(),
        }
    }

    pub fn index(&self) -> Index {
        self.index
    }

    pub fn parent_index(&self) -> Index {
        self.parent_index
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the parent is the directly preceding index.
    pub fn is_sequential(&self) -> bool {
        self.index.prev() == Some(self.parent_index)
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_entry_derives_parent() {
        let entry = Entry::new(Index::new(7), b"hello".to_vec());
        assert_eq!(entry.index(), Index::new(7));
        assert_eq!(entry.parent_index(), Index::new(6));
        assert_eq!(entry.payload(), b"hello");
        assert!(entry.is_sequential());
    }

    #[test]
    fn explicit_parent_is_kept() {
        let entry = Entry::with_parent(Index::new(7), Index::new(3), Vec::new());
        assert_eq!(entry.parent_index(), Index::new(3));
        assert!(!entry.is_sequential());
    }

    #[test]
    #[should_panic(expected = "has no parent")]
    fn index_zero_has_no_parent() {
        let _ = Entry::new(Index::ROOT, Vec::new());
    }

    #[test]
    fn index_neighbours() {
        assert_eq!(Index::ROOT.next(), Some(Index::new(1)));
        assert_eq!(Index::ROOT.prev(), None);
        assert_eq!(Index::new(u64::MAX).next(), None);
    }

    #[test]
    fn index_serializes_as_plain_number() {
        let json = serde_json::to_string(&Index::new(42)).expect("serialize");
        assert_eq!(json, "42");
    }
}
