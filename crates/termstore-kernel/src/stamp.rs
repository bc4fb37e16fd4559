//! Stamps: the identity of one edit event.
//!
//! A stamp is the tuple `(status, time, author, module, path)`. The stamp
//! registry interns each tuple to a small integer, the [`StampSequence`],
//! and everything downstream works with the sequence only. Whether a stamp
//! is canceled or still uncommitted is always asked of the registry, never
//! cached next to the sequence.

use crate::error::KernelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Time value of a stamp whose edit has not been committed yet.
pub const UNCOMMITTED_TIME: i64 = i64::MAX;

/// Coordinate time that sees everything, including uncommitted edits.
pub const LATEST_TIME: i64 = i64::MAX;

/// Surrogate integer id of a component, valid within one database instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Nid(pub i32);

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind-scoped sequence of a concept. Authors, modules and paths are concepts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ConceptSequence(pub i32);

impl fmt::Display for ConceptSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interned key of a stamp tuple.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StampSequence(pub i32);

impl fmt::Display for StampSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status carried by a stamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Inactive,
    Active,
    Primordial,
    Canceled,
}

impl Status {
    /// Byte code used by the portable stamp encoding.
    pub fn code(self) -> u8 {
        match self {
            Status::Inactive => 0,
            Status::Active => 1,
            Status::Primordial => 2,
            Status::Canceled => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, KernelError> {
        match code {
            0 => Ok(Status::Inactive),
            1 => Ok(Status::Active),
            2 => Ok(Status::Primordial),
            3 => Ok(Status::Canceled),
            other => Err(KernelError::InvalidStatus(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Inactive => "inactive",
            Status::Active => "active",
            Status::Primordial => "primordial",
            Status::Canceled => "canceled",
        }
    }

    /// Every status, in code order.
    pub fn all() -> [Status; 4] {
        [
            Status::Inactive,
            Status::Active,
            Status::Primordial,
            Status::Canceled,
        ]
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tuple behind a stamp sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub status: Status,
    /// Epoch millis, or [`UNCOMMITTED_TIME`].
    pub time: i64,
    pub author: ConceptSequence,
    pub module: ConceptSequence,
    pub path: ConceptSequence,
}

impl Stamp {
    pub fn new(
        status: Status,
        time: i64,
        author: ConceptSequence,
        module: ConceptSequence,
        path: ConceptSequence,
    ) -> Self {
        Self {
            status,
            time,
            author,
            module,
            path,
        }
    }

    pub fn is_uncommitted(&self) -> bool {
        self.time == UNCOMMITTED_TIME
    }

    pub fn is_canceled(&self) -> bool {
        self.status == Status::Canceled
    }
}

/// Ordered set of stamp sequences.
///
/// Equality is set equality, so two chronicles holding the same stamps in a
/// different record order compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StampSequenceSet(BTreeSet<StampSequence>);

impl StampSequenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stamp: StampSequence) -> bool {
        self.0.insert(stamp)
    }

    pub fn remove(&mut self, stamp: StampSequence) -> bool {
        self.0.remove(&stamp)
    }

    pub fn contains(&self, stamp: StampSequence) -> bool {
        self.0.contains(&stamp)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in ascending sequence order.
    pub fn iter(&self) -> impl Iterator<Item = StampSequence> + '_ {
        self.0.iter().copied()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(StampSequence) -> bool) {
        self.0.retain(|stamp| keep(*stamp));
    }
}

impl FromIterator<StampSequence> for StampSequenceSet {
    fn from_iter<I: IntoIterator<Item = StampSequence>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<StampSequence> for StampSequenceSet {
    fn extend<I: IntoIterator<Item = StampSequence>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for StampSequenceSet {
    type Item = StampSequence;
    type IntoIter = std::collections::btree_set::IntoIter<StampSequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_roundtrip() {
        for status in Status::all() {
            assert_eq!(Status::from_code(status.code()).expect("known code"), status);
        }
        assert!(matches!(
            Status::from_code(9),
            Err(KernelError::InvalidStatus(9))
        ));
    }

    #[test]
    fn stamp_sequence_set_is_order_independent() {
        let a: StampSequenceSet = [3, 1, 2].into_iter().map(StampSequence).collect();
        let b: StampSequenceSet = [2, 3, 1].into_iter().map(StampSequence).collect();
        assert_eq!(a, b);
        assert_eq!(
            a.iter().collect::<Vec<_>>(),
            vec![StampSequence(1), StampSequence(2), StampSequence(3)]
        );
    }

    #[test]
    fn uncommitted_stamp_uses_sentinel_time() {
        let stamp = Stamp::new(
            Status::Active,
            UNCOMMITTED_TIME,
            ConceptSequence(1),
            ConceptSequence(2),
            ConceptSequence(3),
        );
        assert!(stamp.is_uncommitted());
        assert!(!stamp.is_canceled());
    }
}
