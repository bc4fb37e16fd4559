//! Error types for kernel lookups and ordering.

use crate::stamp::{ConceptSequence, Nid, StampSequence};
use uuid::Uuid;

/// Errors arising from registry lookups or malformed path graphs.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The stamp registry has never issued this sequence.
    #[error("unknown stamp sequence: {0}")]
    UnknownStamp(StampSequence),

    /// The path service has no entry for this path concept.
    #[error("unknown path: {0}")]
    UnknownPath(ConceptSequence),

    /// The path origin graph loops back on itself.
    #[error("path origin cycle through {0}")]
    PathCycle(ConceptSequence),

    /// No UUID is registered for a surrogate id.
    #[error("no uuid registered for nid {0}")]
    UnknownNid(Nid),

    /// No concept is registered under this sequence.
    #[error("no concept registered for sequence {0}")]
    UnknownConcept(ConceptSequence),

    /// A UUID could not be resolved to a surrogate id.
    #[error("no nid registered for uuid {0}")]
    UnknownUuid(Uuid),

    /// A status byte outside the known set.
    #[error("invalid status code: {0}")]
    InvalidStatus(u8),
}
