//! Error types for binary record decoding and encoding.

use termstore_kernel::KernelError;

/// Errors from reading or writing a [`crate::DataBuffer`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A read or seek ran past the declared end of the buffer.
    #[error("read of {requested} byte(s) at {position} runs past limit {limit}")]
    OutOfBounds {
        position: usize,
        requested: usize,
        limit: usize,
    },

    /// The record envelope carries a format version this build cannot read.
    #[error("unsupported data format version: {0}")]
    UnsupportedFormatVersion(u8),

    /// A length prefix that cannot describe a valid field.
    #[error("invalid length prefix {length} at {position}")]
    InvalidLength { position: usize, length: i32 },

    /// A frame whose body was not consumed exactly.
    #[error("record at {start} declares {declared} byte(s) but {consumed} were read")]
    RecordBoundary {
        start: usize,
        declared: usize,
        consumed: usize,
    },

    /// A string field that is not valid UTF-8.
    #[error("invalid utf-8 string at {position}: {message}")]
    InvalidUtf8 { position: usize, message: String },

    /// Translating an identifier through a registry failed.
    #[error(transparent)]
    Identity(#[from] KernelError),
}
