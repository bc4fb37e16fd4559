//! A single stamped version.
//!
//! Record layout, inside a length-prefixed frame:
//!
//! ```text
//! [4B length][stamp][2B version sequence, internal only][payload fields]
//! ```
//!
//! The stamp is the version's identity for merge purposes. The version
//! sequence is a chronicle-local counter that is never reused.

use crate::error::ChronicleError;
use crate::payload::{Payload, PayloadType};
use serde::Serialize;
use termstore_codec::{CodecError, DataBuffer, Frame};
use termstore_kernel::{Nid, Registries, StampRegistry, StampSequence};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    /// Chronicle this version belongs to.
    nid: Nid,
    stamp: StampSequence,
    version_sequence: i16,
    payload: Payload,
}

impl Version {
    pub fn new(nid: Nid, stamp: StampSequence, version_sequence: i16, payload: Payload) -> Self {
        Self {
            nid,
            stamp,
            version_sequence,
            payload,
        }
    }

    pub fn nid(&self) -> Nid {
        self.nid
    }

    pub fn stamp(&self) -> StampSequence {
        self.stamp
    }

    pub fn version_sequence(&self) -> i16 {
        self.version_sequence
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }

    /// Mutable payload access, only while the stamp is uncommitted.
    pub fn payload_mut(&mut self, stamps: &dyn StampRegistry) -> Result<&mut Payload, ChronicleError> {
        self.ensure_uncommitted(stamps)?;
        Ok(&mut self.payload)
    }

    /// Replace the payload with one of the same type.
    pub fn set_payload(
        &mut self,
        payload: Payload,
        stamps: &dyn StampRegistry,
    ) -> Result<(), ChronicleError> {
        if payload.payload_type() != self.payload_type() {
            return Err(ChronicleError::RecordMismatch(format!(
                "{} payload offered to a {} version",
                payload.payload_type(),
                self.payload_type()
            )));
        }
        *self.payload_mut(stamps)? = payload;
        Ok(())
    }

    fn ensure_uncommitted(&self, stamps: &dyn StampRegistry) -> Result<(), ChronicleError> {
        if stamps.is_uncommitted(self.stamp) {
            return Ok(());
        }
        Err(ChronicleError::IllegalState(format!(
            "version {} of {} is committed: {}",
            self.version_sequence,
            self.nid,
            stamps.describe(self.stamp)
        )))
    }

    pub(crate) fn with_version_sequence(mut self, version_sequence: i16) -> Self {
        self.version_sequence = version_sequence;
        self
    }

    /// Write one framed version record.
    pub fn write(&self, buffer: &mut DataBuffer, registries: &Registries) -> Result<(), CodecError> {
        let frame = buffer.begin_frame();
        buffer.put_stamp_sequence(self.stamp, registries)?;
        if !buffer.is_external() {
            buffer.put_i16(self.version_sequence);
        }
        self.payload.write(buffer, registries)?;
        buffer.end_frame(frame)
    }

    /// Materialize the version in `frame`.
    ///
    /// External records carry no version sequence; `external_sequence` is
    /// used instead.
    pub fn make(
        frame: &Frame,
        nid: Nid,
        payload_type: PayloadType,
        buffer: &mut DataBuffer,
        registries: &Registries,
        external_sequence: i16,
    ) -> Result<Self, CodecError> {
        frame.seek_body(buffer)?;
        let stamp = buffer.get_stamp_sequence(registries)?;
        let version_sequence = if buffer.is_external() {
            external_sequence
        } else {
            buffer.get_i16()?
        };
        let payload = Payload::read(payload_type, buffer, registries)?;
        frame.finish(buffer)?;
        Ok(Self::new(nid, stamp, version_sequence, payload))
    }

    /// Stamp of the version in `frame`, without reading the rest.
    pub fn read_stamp(
        frame: &Frame,
        buffer: &mut DataBuffer,
        registries: &Registries,
    ) -> Result<StampSequence, CodecError> {
        frame.seek_body(buffer)?;
        buffer.get_stamp_sequence(registries)
    }

    /// Walk the fields of `frame` structurally and check they end where the
    /// length prefix says.
    pub fn skip(
        frame: &Frame,
        payload_type: PayloadType,
        buffer: &mut DataBuffer,
    ) -> Result<(), CodecError> {
        frame.seek_body(buffer)?;
        buffer.skip_stamp()?;
        if !buffer.is_external() {
            buffer.skip(2)?;
        }
        Payload::skip(payload_type, buffer)?;
        frame.finish(buffer)
    }
}
