//! # Termstore Kernel
//!
//! Every edit to a terminology component is identified by a **stamp**: an
//! interned `(status, time, author, module, path)` tuple. Readers never ask
//! for "the current value"; they hand in a **coordinate** and the kernel
//! decides which stamps are visible and which of those are latest.
//!
//! This crate is **storage-agnostic**: it knows nothing about byte records or
//! chronicles. It only prescribes how stamps relate to each other.
//!
//! ## Architecture
//!
//! ```text
//! StampRegistry / IdentifierRegistry / PathService   ← external collaborators
//!     │
//! Stamp, StampSequence                               ← interned edit identity
//!     │
//! StampCoordinate (precedence, position, modules, states)
//!     │
//! RelativePositionCalculator                         ← partial order over stamps
//!     │
//! latest_stamp_sequences                             ← empty | single | contradiction
//! ```

pub mod calculator;
pub mod coordinate;
pub mod error;
pub mod graph;
pub mod memory;
pub mod registry;
pub mod stamp;

pub use calculator::{CalculatorCache, RelativePosition, RelativePositionCalculator};
pub use coordinate::{Precedence, StampCoordinate, StampPath, StampPosition};
pub use error::KernelError;
pub use graph::{Graph, GraphNode};
pub use memory::{
    MemoryIdentifierRegistry, MemoryPathService, MemoryRegistries, MemoryStampRegistry,
};
pub use registry::{ComponentKind, IdentifierRegistry, PathService, Registries, StampRegistry};
pub use stamp::{
    ConceptSequence, LATEST_TIME, Nid, Stamp, StampSequence, StampSequenceSet, Status,
    UNCOMMITTED_TIME,
};
