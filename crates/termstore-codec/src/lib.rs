//! # termstore-codec
//!
//! The byte layer under chronicles. A [`DataBuffer`] is a cursor over a
//! growable byte array with two identifier modes:
//!
//! ```text
//! internal  nid / sequence → 4-byte integer     (storage-resident, compact)
//! external  nid / sequence → 16-byte UUID       (interchange, portable)
//!           stamp          → status, time, author, module, path UUIDs
//! ```
//!
//! Version records are length-prefixed [`Frame`]s closed by a zero length.
//! All integers are big-endian. Identical logical content in the same mode
//! always encodes to identical bytes.

pub mod buffer;
pub mod error;
pub mod frame;

pub use buffer::{DataBuffer, FORMAT_VERSION};
pub use error::CodecError;
pub use frame::{Frame, OpenFrame};
