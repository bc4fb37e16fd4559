//! In-memory implementations of the collaborator contracts.
//!
//! These are the reference registries used by tests and by embedders that
//! keep everything in one process:
//! - interning tables backed by concurrent maps
//! - monotonic counters for stamp sequences, nids and container sequences
//! - explicit `cancel` / `commit` controls to drive stamp status changes

use crate::coordinate::StampPosition;
use crate::registry::{ComponentKind, IdentifierRegistry, PathService, Registries, StampRegistry};
use crate::stamp::{ConceptSequence, Nid, Stamp, StampSequence, Status};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use uuid::Uuid;

/// Stamp interning table.
///
/// A sequence, once issued, stays bound to one logical edit. `cancel` and
/// `commit` rewrite that edit's tuple in place, the way a stamp service
/// resolves uncommitted work.
#[derive(Debug)]
pub struct MemoryStampRegistry {
    by_stamp: DashMap<Stamp, StampSequence>,
    by_sequence: DashMap<StampSequence, Stamp>,
    next_sequence: AtomicI32,
}

impl Default for MemoryStampRegistry {
    fn default() -> Self {
        Self {
            by_stamp: DashMap::new(),
            by_sequence: DashMap::new(),
            next_sequence: AtomicI32::new(1),
        }
    }
}

impl MemoryStampRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for interning a tuple from its parts.
    pub fn intern(
        &self,
        status: Status,
        time: i64,
        author: ConceptSequence,
        module: ConceptSequence,
        path: ConceptSequence,
    ) -> StampSequence {
        self.stamp_sequence_for(&Stamp::new(status, time, author, module, path))
    }

    /// Mark a stamp canceled. Returns false for unknown sequences.
    pub fn cancel(&self, sequence: StampSequence) -> bool {
        self.rewrite(sequence, |stamp| stamp.status = Status::Canceled)
    }

    /// Give an uncommitted stamp its commit time.
    pub fn commit(&self, sequence: StampSequence, time: i64) -> bool {
        self.rewrite(sequence, |stamp| stamp.time = time)
    }

    pub fn len(&self) -> usize {
        self.by_sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sequence.is_empty()
    }

    fn rewrite(&self, sequence: StampSequence, change: impl FnOnce(&mut Stamp)) -> bool {
        let Some(mut entry) = self.by_sequence.get_mut(&sequence) else {
            return false;
        };
        let previous = *entry;
        change(entry.value_mut());
        let updated = *entry;
        drop(entry);

        self.by_stamp.remove_if(&previous, |_, owner| *owner == sequence);
        self.by_stamp.entry(updated).or_insert(sequence);
        tracing::debug!(stamp = sequence.0, status = %updated.status, time = updated.time, "stamp rewritten");
        true
    }
}

impl StampRegistry for MemoryStampRegistry {
    fn stamp_sequence_for(&self, stamp: &Stamp) -> StampSequence {
        *self.by_stamp.entry(*stamp).or_insert_with(|| {
            let sequence = StampSequence(self.next_sequence.fetch_add(1, Ordering::SeqCst));
            self.by_sequence.insert(sequence, *stamp);
            sequence
        })
    }

    fn stamp(&self, sequence: StampSequence) -> Option<Stamp> {
        self.by_sequence.get(&sequence).map(|entry| *entry)
    }

    fn describe(&self, sequence: StampSequence) -> String {
        match self.stamp(sequence) {
            Some(stamp) => {
                let time = if stamp.is_uncommitted() {
                    "uncommitted".to_string()
                } else {
                    DateTime::<Utc>::from_timestamp_millis(stamp.time)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| stamp.time.to_string())
                };
                format!(
                    "stamp {sequence}: {} {time} author {} module {} path {}",
                    stamp.status, stamp.author, stamp.module, stamp.path
                )
            }
            None => format!("stamp {sequence}: unknown"),
        }
    }
}

/// UUID ↔ nid table with per-kind container sequences.
#[derive(Debug)]
pub struct MemoryIdentifierRegistry {
    uuid_to_nid: DashMap<Uuid, Nid>,
    nid_to_uuids: DashMap<Nid, Vec<Uuid>>,
    concept_sequences: DashMap<Nid, i32>,
    sememe_sequences: DashMap<Nid, i32>,
    concept_nids: DashMap<ConceptSequence, Nid>,
    next_nid: AtomicI32,
    next_concept_sequence: AtomicI32,
    next_sememe_sequence: AtomicI32,
}

impl Default for MemoryIdentifierRegistry {
    fn default() -> Self {
        Self {
            uuid_to_nid: DashMap::new(),
            nid_to_uuids: DashMap::new(),
            concept_sequences: DashMap::new(),
            sememe_sequences: DashMap::new(),
            concept_nids: DashMap::new(),
            next_nid: AtomicI32::new(1),
            next_concept_sequence: AtomicI32::new(1),
            next_sememe_sequence: AtomicI32::new(1),
        }
    }
}

impl MemoryIdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concept for `uuid` and return its sequence.
    pub fn register_concept(&self, uuid: Uuid) -> ConceptSequence {
        let nid = self.nid_for_uuids(&[uuid]);
        ConceptSequence(self.container_sequence(nid, ComponentKind::Concept))
    }

    pub fn nid_for_uuid(&self, uuid: &Uuid) -> Option<Nid> {
        self.uuid_to_nid.get(uuid).map(|entry| *entry)
    }

    fn record_uuid(&self, uuid: Uuid, nid: Nid) {
        let mut uuids = self.nid_to_uuids.entry(nid).or_default();
        if !uuids.contains(&uuid) {
            uuids.push(uuid);
        }
    }
}

impl IdentifierRegistry for MemoryIdentifierRegistry {
    fn nid_for_uuids(&self, uuids: &[Uuid]) -> Nid {
        let known = uuids.iter().find_map(|uuid| self.nid_for_uuid(uuid));
        let nid = match (known, uuids.first()) {
            (Some(nid), _) => nid,
            (None, Some(first)) => *self
                .uuid_to_nid
                .entry(*first)
                .or_insert_with(|| Nid(self.next_nid.fetch_add(1, Ordering::SeqCst))),
            (None, None) => Nid(self.next_nid.fetch_add(1, Ordering::SeqCst)),
        };
        for uuid in uuids {
            self.add_uuid_alias(*uuid, nid);
        }
        nid
    }

    fn add_uuid_alias(&self, uuid: Uuid, nid: Nid) {
        self.uuid_to_nid.entry(uuid).or_insert(nid);
        self.record_uuid(uuid, nid);
    }

    fn uuids_for_nid(&self, nid: Nid) -> Vec<Uuid> {
        self.nid_to_uuids
            .get(&nid)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    fn container_sequence(&self, nid: Nid, kind: ComponentKind) -> i32 {
        match kind {
            ComponentKind::Concept => {
                let sequence = *self.concept_sequences.entry(nid).or_insert_with(|| {
                    self.next_concept_sequence.fetch_add(1, Ordering::SeqCst)
                });
                self.concept_nids
                    .entry(ConceptSequence(sequence))
                    .or_insert(nid);
                sequence
            }
            ComponentKind::Sememe => *self
                .sememe_sequences
                .entry(nid)
                .or_insert_with(|| self.next_sememe_sequence.fetch_add(1, Ordering::SeqCst)),
        }
    }

    fn concept_nid(&self, sequence: ConceptSequence) -> Option<Nid> {
        self.concept_nids.get(&sequence).map(|entry| *entry)
    }
}

/// Path origin graph held in memory.
#[derive(Debug, Default)]
pub struct MemoryPathService {
    origins: DashMap<ConceptSequence, Vec<StampPosition>>,
}

impl MemoryPathService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a path and its origins.
    pub fn add_path(&self, path: ConceptSequence, origins: Vec<StampPosition>) {
        self.origins.insert(path, origins);
    }
}

impl PathService for MemoryPathService {
    fn origins(&self, path: ConceptSequence) -> Option<Vec<StampPosition>> {
        self.origins.get(&path).map(|entry| entry.clone())
    }
}

/// Concrete handles to the three in-memory registries.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistries {
    pub stamps: Arc<MemoryStampRegistry>,
    pub identifiers: Arc<MemoryIdentifierRegistry>,
    pub paths: Arc<MemoryPathService>,
}

impl MemoryRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type-erased bundle for kernel and chronicle operations.
    pub fn registries(&self) -> Registries {
        Registries::new(
            self.stamps.clone(),
            self.identifiers.clone(),
            self.paths.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let stamps = MemoryStampRegistry::new();
        let a = stamps.intern(
            Status::Active,
            100,
            ConceptSequence(1),
            ConceptSequence(2),
            ConceptSequence(3),
        );
        let b = stamps.intern(
            Status::Active,
            100,
            ConceptSequence(1),
            ConceptSequence(2),
            ConceptSequence(3),
        );
        assert_eq!(a, b);
        assert_eq!(stamps.len(), 1);
    }

    #[test]
    fn cancel_is_visible_through_the_contract() {
        let stamps = MemoryStampRegistry::new();
        let seq = stamps.intern(
            Status::Active,
            100,
            ConceptSequence(1),
            ConceptSequence(2),
            ConceptSequence(3),
        );
        assert!(!stamps.is_canceled(seq));
        assert!(stamps.cancel(seq));
        assert!(stamps.is_canceled(seq));
        assert!(!stamps.cancel(StampSequence(999)));
    }

    #[test]
    fn commit_resolves_uncommitted_time() {
        let stamps = MemoryStampRegistry::new();
        let seq = stamps.intern(
            Status::Active,
            crate::stamp::UNCOMMITTED_TIME,
            ConceptSequence(1),
            ConceptSequence(2),
            ConceptSequence(3),
        );
        assert!(stamps.is_uncommitted(seq));
        assert!(stamps.commit(seq, 500));
        assert!(!stamps.is_uncommitted(seq));
        assert_eq!(stamps.stamp(seq).map(|s| s.time), Some(500));
        assert!(stamps.describe(seq).contains("active"));
    }

    #[test]
    fn aliases_resolve_to_the_same_nid() {
        let ids = MemoryIdentifierRegistry::new();
        let primordial = Uuid::new_v4();
        let alias = Uuid::new_v4();

        let nid = ids.nid_for_uuids(&[primordial]);
        ids.add_uuid_alias(alias, nid);

        assert_eq!(ids.nid_for_uuids(&[alias]), nid);
        assert_eq!(ids.uuids_for_nid(nid), vec![primordial, alias]);
        assert_eq!(ids.primordial_uuid(nid), Some(primordial));
    }

    #[test]
    fn container_sequences_are_per_kind() {
        let ids = MemoryIdentifierRegistry::new();
        let concept = ids.nid_for_uuids(&[Uuid::new_v4()]);
        let sememe = ids.nid_for_uuids(&[Uuid::new_v4()]);

        assert_eq!(ids.container_sequence(concept, ComponentKind::Concept), 1);
        assert_eq!(ids.container_sequence(sememe, ComponentKind::Sememe), 1);
        assert_eq!(ids.container_sequence(concept, ComponentKind::Concept), 1);
        assert_eq!(ids.concept_nid(ConceptSequence(1)), Some(concept));
    }
}
