//! Chronicle record header.
//!
//! ```text
//! [1B format version][1B kind]
//! [4B write sequence]                                  internal only
//! [16B primordial uuid][4B alias count][16B per alias]
//! [4B nid][4B container sequence][2B version counter]  internal only
//! [kind fields]
//! { version frames } [4B zero]
//! ```
//!
//! Sememe kind fields are `[1B payload type][assemblage concept][referenced
//! component]`, identifiers encoded in the buffer's mode. Concepts have none.

use crate::error::ChronicleError;
use crate::payload::PayloadType;
use crate::version::Version;
use serde::Serialize;
use termstore_codec::{CodecError, DataBuffer, Frame};
use termstore_kernel::{ComponentKind, ConceptSequence, Nid, Registries};
use uuid::Uuid;

const CONCEPT_TAG: u8 = 1;
const SEMEME_TAG: u8 = 2;

/// Fixed identity fields of a sememe chronicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SememeFields {
    pub payload_type: PayloadType,
    /// Concept naming the assemblage this sememe belongs to.
    pub assemblage: ConceptSequence,
    pub referenced_component: Nid,
}

/// What a chronicle records history for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChronicleKind {
    Concept,
    Sememe(SememeFields),
}

impl ChronicleKind {
    pub fn tag(&self) -> u8 {
        match self {
            ChronicleKind::Concept => CONCEPT_TAG,
            ChronicleKind::Sememe(_) => SEMEME_TAG,
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        match self {
            ChronicleKind::Concept => PayloadType::Concept,
            ChronicleKind::Sememe(fields) => fields.payload_type,
        }
    }

    pub fn component_kind(&self) -> ComponentKind {
        match self {
            ChronicleKind::Concept => ComponentKind::Concept,
            ChronicleKind::Sememe(_) => ComponentKind::Sememe,
        }
    }

    fn write_fields(&self, buffer: &mut DataBuffer, registries: &Registries) -> Result<(), CodecError> {
        if let ChronicleKind::Sememe(fields) = self {
            buffer.put_u8(fields.payload_type.tag());
            buffer.put_concept_sequence(fields.assemblage, registries)?;
            buffer.put_nid(fields.referenced_component, registries)?;
        }
        Ok(())
    }

    fn read_fields(
        tag: u8,
        buffer: &mut DataBuffer,
        registries: &Registries,
    ) -> Result<Self, ChronicleError> {
        match tag {
            CONCEPT_TAG => Ok(ChronicleKind::Concept),
            SEMEME_TAG => Ok(ChronicleKind::Sememe(SememeFields {
                payload_type: PayloadType::from_tag(buffer.get_u8()?)?,
                assemblage: buffer.get_concept_sequence(registries)?,
                referenced_component: buffer.get_nid(registries)?,
            })),
            other => Err(ChronicleError::RecordMismatch(format!(
                "unknown chronicle kind tag {other}"
            ))),
        }
    }
}

/// Decoded header; the cursor that produced it sits on the first version
/// frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    pub kind: ChronicleKind,
    pub write_sequence: i32,
    pub primordial_uuid: Uuid,
    pub additional_uuids: Vec<Uuid>,
    pub nid: Nid,
    pub container_sequence: i32,
    pub version_counter: i16,
}

impl RecordHeader {
    pub fn write(&self, buffer: &mut DataBuffer, registries: &Registries) -> Result<(), CodecError> {
        let external = buffer.is_external();
        buffer.put_format_version();
        buffer.put_u8(self.kind.tag());
        if !external {
            buffer.put_i32(self.write_sequence);
        }
        buffer.put_uuid(self.primordial_uuid);
        buffer.put_i32(self.additional_uuids.len() as i32);
        for uuid in &self.additional_uuids {
            buffer.put_uuid(*uuid);
        }
        if !external {
            buffer.put_i32(self.nid.0);
            buffer.put_i32(self.container_sequence);
            buffer.put_i16(self.version_counter);
        }
        self.kind.write_fields(buffer, registries)
    }

    /// Read a header. External headers resolve the nid and container
    /// sequence through the identifier registry, registering every uuid.
    pub fn read(buffer: &mut DataBuffer, registries: &Registries) -> Result<Self, ChronicleError> {
        let external = buffer.is_external();
        buffer.get_format_version()?;
        let tag = buffer.get_u8()?;
        let write_sequence = if external { 0 } else { buffer.get_i32()? };
        let primordial_uuid = buffer.get_uuid()?;
        let alias_count = buffer.get_length()?;
        let mut additional_uuids = Vec::with_capacity(alias_count.min(64));
        for _ in 0..alias_count {
            additional_uuids.push(buffer.get_uuid()?);
        }

        let (nid, container_sequence, version_counter) = if external {
            (Nid(0), 0, 1)
        } else {
            (Nid(buffer.get_i32()?), buffer.get_i32()?, buffer.get_i16()?)
        };
        let kind = ChronicleKind::read_fields(tag, buffer, registries)?;

        let mut header = Self {
            kind,
            write_sequence,
            primordial_uuid,
            additional_uuids,
            nid,
            container_sequence,
            version_counter,
        };
        if external {
            let identifiers = registries.identifiers();
            header.nid = identifiers.nid_for_uuids(&header.uuid_list());
            header.container_sequence =
                identifiers.container_sequence(header.nid, kind.component_kind());
        }
        Ok(header)
    }

    pub fn uuid_list(&self) -> Vec<Uuid> {
        let mut uuids = Vec::with_capacity(1 + self.additional_uuids.len());
        uuids.push(self.primordial_uuid);
        uuids.extend(self.additional_uuids.iter().copied());
        uuids
    }
}

/// Check every version frame from the cursor to the terminator, leaving the
/// cursor where it started. Returns the number of versions.
pub(crate) fn validate_versions(
    cursor: &DataBuffer,
    payload_type: PayloadType,
) -> Result<usize, CodecError> {
    let mut scan = cursor.clone();
    let mut count = 0;
    while let Some(frame) = Frame::next(&mut scan)? {
        Version::skip(&frame, payload_type, &mut scan)?;
        count += 1;
    }
    Ok(count)
}

/// Write sequence of an internal record, read from its fixed offset.
pub fn record_write_sequence(record: &[u8]) -> Result<i32, ChronicleError> {
    let mut cursor = DataBuffer::from_slice(record.get(..6).unwrap_or(record), false);
    cursor.get_format_version()?;
    cursor.get_u8()?;
    Ok(cursor.get_i32()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use termstore_kernel::MemoryRegistries;

    fn header(kind: ChronicleKind) -> RecordHeader {
        RecordHeader {
            kind,
            write_sequence: 7,
            primordial_uuid: Uuid::from_u128(1),
            additional_uuids: vec![Uuid::from_u128(2)],
            nid: Nid(3),
            container_sequence: 4,
            version_counter: 5,
        }
    }

    #[test]
    fn internal_header_round_trips() {
        let memory = MemoryRegistries::new();
        let registries = memory.registries();
        let original = header(ChronicleKind::Sememe(SememeFields {
            payload_type: PayloadType::Long,
            assemblage: ConceptSequence(8),
            referenced_component: Nid(9),
        }));

        let mut buffer = DataBuffer::with_capacity(0, false);
        original.write(&mut buffer, &registries).expect("write");
        let written = buffer.limit();
        let mut reader = DataBuffer::wrap(buffer.into_bytes(), false);
        let decoded = RecordHeader::read(&mut reader, &registries).expect("read");

        assert_eq!(decoded, original);
        assert_eq!(reader.position(), written);
    }

    #[test]
    fn write_sequence_is_read_from_a_fixed_offset() {
        let memory = MemoryRegistries::new();
        let mut buffer = DataBuffer::with_capacity(0, false);
        header(ChronicleKind::Concept)
            .write(&mut buffer, &memory.registries())
            .expect("write");
        assert_eq!(record_write_sequence(buffer.as_slice()).expect("ws"), 7);
        assert!(record_write_sequence(&[1, 1]).is_err());
    }

    #[test]
    fn unknown_kind_tag_is_rejected() {
        let memory = MemoryRegistries::new();
        let mut buffer = DataBuffer::with_capacity(0, false);
        header(ChronicleKind::Concept)
            .write(&mut buffer, &memory.registries())
            .expect("write");
        let mut bytes = buffer.into_bytes();
        bytes[1] = 9;
        let mut reader = DataBuffer::wrap(bytes, false);
        assert!(matches!(
            RecordHeader::read(&mut reader, &memory.registries()),
            Err(ChronicleError::RecordMismatch(_))
        ));
    }
}
