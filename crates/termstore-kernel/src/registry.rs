//! Contracts of the external collaborators.
//!
//! The kernel consumes three services it does not implement:
//! 1. **StampRegistry**: interns stamp tuples and answers status queries
//! 2. **IdentifierRegistry**: maps UUIDs to nids and numbers components per kind
//! 3. **PathService**: exposes the origin edges of the path graph
//!
//! Handles are passed explicitly through [`Registries`]; nothing is looked up
//! from ambient global state. Reference implementations live in
//! [`crate::memory`].

use crate::coordinate::StampPosition;
use crate::stamp::{ConceptSequence, Nid, Stamp, StampSequence};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Interning table for stamp tuples.
pub trait StampRegistry: Send + Sync {
    /// Intern a tuple, returning the existing sequence if already issued.
    fn stamp_sequence_for(&self, stamp: &Stamp) -> StampSequence;

    /// The tuple currently associated with a sequence.
    fn stamp(&self, sequence: StampSequence) -> Option<Stamp>;

    /// Whether the edit behind `sequence` has been canceled.
    ///
    /// Unknown sequences are not canceled.
    fn is_canceled(&self, sequence: StampSequence) -> bool {
        self.stamp(sequence).is_some_and(|stamp| stamp.is_canceled())
    }

    /// Whether the edit behind `sequence` is still open for revision.
    fn is_uncommitted(&self, sequence: StampSequence) -> bool {
        self.stamp(sequence)
            .is_some_and(|stamp| stamp.is_uncommitted())
    }

    /// Human-readable rendering of a stamp for diagnostics.
    fn describe(&self, sequence: StampSequence) -> String;
}

/// Which sequence space a component is numbered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Concept,
    Sememe,
}

/// UUID ↔ nid translation plus per-kind sequence numbering.
pub trait IdentifierRegistry: Send + Sync {
    /// Resolve a nid for any of `uuids`, assigning a fresh one if none is
    /// known. Every uuid in the slice is registered against the result.
    fn nid_for_uuids(&self, uuids: &[Uuid]) -> Nid;

    /// Register an additional uuid for an existing nid.
    fn add_uuid_alias(&self, uuid: Uuid, nid: Nid);

    /// All uuids registered for a nid, primordial first.
    fn uuids_for_nid(&self, nid: Nid) -> Vec<Uuid>;

    /// Kind-scoped sequence for a nid, assigned on first request.
    fn container_sequence(&self, nid: Nid, kind: ComponentKind) -> i32;

    /// Nid of the concept holding `sequence`.
    fn concept_nid(&self, sequence: ConceptSequence) -> Option<Nid>;

    fn primordial_uuid(&self, nid: Nid) -> Option<Uuid> {
        self.uuids_for_nid(nid).first().copied()
    }
}

/// Read access to the path origin graph.
pub trait PathService: Send + Sync {
    /// Origin positions of `path`, or `None` if the path is unknown.
    ///
    /// A root path has an empty origin list.
    fn origins(&self, path: ConceptSequence) -> Option<Vec<StampPosition>>;
}

/// Bundle of collaborator handles passed into chronicle and coordinate
/// operations.
#[derive(Clone)]
pub struct Registries {
    stamps: Arc<dyn StampRegistry>,
    identifiers: Arc<dyn IdentifierRegistry>,
    paths: Arc<dyn PathService>,
}

impl Registries {
    pub fn new(
        stamps: Arc<dyn StampRegistry>,
        identifiers: Arc<dyn IdentifierRegistry>,
        paths: Arc<dyn PathService>,
    ) -> Self {
        Self {
            stamps,
            identifiers,
            paths,
        }
    }

    pub fn stamps(&self) -> &dyn StampRegistry {
        self.stamps.as_ref()
    }

    pub fn identifiers(&self) -> &dyn IdentifierRegistry {
        self.identifiers.as_ref()
    }

    pub fn paths(&self) -> &dyn PathService {
        self.paths.as_ref()
    }

    pub fn stamps_handle(&self) -> Arc<dyn StampRegistry> {
        Arc::clone(&self.stamps)
    }
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries").finish_non_exhaustive()
    }
}
