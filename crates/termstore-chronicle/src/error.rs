//! Error types for chronicle operations.

use termstore_codec::CodecError;
use termstore_kernel::{KernelError, Nid, StampSequence};

/// Errors from chronicle, store and interchange operations.
#[derive(Debug, thiserror::Error)]
pub enum ChronicleError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// A version whose stamp is committed was asked to change.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The operation is not implemented for this shape of history.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A record or version belongs to a different component or kind.
    #[error("record mismatch: {0}")]
    RecordMismatch(String),

    /// No version carries this stamp.
    #[error("no version of {nid} for stamp {stamp}")]
    NoSuchVersion { nid: Nid, stamp: StampSequence },

    /// The optimistic write loop gave up.
    #[error("write of {nid} still conflicting after {attempts} attempt(s)")]
    WriteContention { nid: Nid, attempts: u32 },

    #[error("interchange file {path}: {source}")]
    Interchange {
        path: String,
        #[source]
        source: InterchangeError,
    },

    #[error("{path}: I/O error: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Structural faults in the body of an interchange file.
#[derive(Debug, thiserror::Error)]
pub enum InterchangeError {
    #[error("{length} byte(s) is too short for a digest trailer")]
    TooShort { length: usize },

    #[error("digest mismatch")]
    DigestMismatch,

    #[error("{count} byte(s) after the terminator")]
    TrailingBytes { count: usize },

    #[error("malformed frame: {0}")]
    Frame(#[from] CodecError),
}
