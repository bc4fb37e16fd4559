//! # termstore-chronicle
//!
//! Append-only chronicles of stamped versions. A writer creates versions
//! in a chronicle's overlay, flushes them into an immutable byte record and
//! reconciles concurrent writers by merging records on stamp identity. A
//! reader hands in a coordinate and gets back the latest visible version,
//! or every version of a contradiction.
//!
//! ```text
//! ChronicleStore ── nid → Chronicle
//!                          ├── overlay        (BTreeMap by stamp)
//!                          ├── written record (ArcSwap, copy-on-write)
//!                          └── version list   (evictable cache)
//!                                │
//!                     termstore-codec DataBuffer
//!                                │
//!            termstore-kernel registries + RelativePositionCalculator
//! ```
//!
//! Persistence goes through [`RecordStorage`]; portable copies through
//! interchange files.

pub mod chronicle;
pub mod config;
pub mod error;
pub mod interchange;
pub mod payload;
pub mod record;
pub mod storage;
pub mod store;
pub mod version;

pub use chronicle::{
    Chronicle, ChronicleSummary, CommitState, LatestVersion, VersionSummary, WrittenRecord,
};
pub use config::{BufferConfig, CacheConfig, StoreConfig, WriteConfig};
pub use error::{ChronicleError, InterchangeError};
pub use interchange::{decode_interchange, encode_interchange, read_interchange, write_interchange};
pub use payload::{
    ComponentNidPayload, DescriptionPayload, LongPayload, Payload, PayloadFields, PayloadType,
    StringPayload, UNSET_CONCEPT, UNSET_NID,
};
pub use record::{ChronicleKind, SememeFields, record_write_sequence};
pub use storage::{MemoryRecordStorage, RecordStorage, WriteOutcome};
pub use store::ChronicleStore;
pub use version::Version;
