//! Version payload variants.
//!
//! Each chronicle fixes one [`PayloadType`]; every version it holds carries
//! a [`Payload`] of that type. Variants with fields implement
//! [`PayloadFields`], the read/write/skip capability used by the record
//! codec. The discriminant tag is written once in the chronicle header, not
//! per version.

use serde::Serialize;
use std::fmt;
use termstore_codec::{CodecError, DataBuffer};
use termstore_kernel::{ConceptSequence, Nid, Registries};

use crate::error::ChronicleError;

/// Discriminant of a payload variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    Concept,
    Member,
    Long,
    String,
    ComponentNid,
    Description,
}

impl PayloadType {
    pub fn tag(self) -> u8 {
        match self {
            PayloadType::Concept => 1,
            PayloadType::Member => 2,
            PayloadType::Long => 3,
            PayloadType::String => 4,
            PayloadType::ComponentNid => 5,
            PayloadType::Description => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, ChronicleError> {
        match tag {
            1 => Ok(PayloadType::Concept),
            2 => Ok(PayloadType::Member),
            3 => Ok(PayloadType::Long),
            4 => Ok(PayloadType::String),
            5 => Ok(PayloadType::ComponentNid),
            6 => Ok(PayloadType::Description),
            other => Err(ChronicleError::RecordMismatch(format!(
                "unknown payload type tag {other}"
            ))),
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadType::Concept => "concept",
            PayloadType::Member => "member",
            PayloadType::Long => "long",
            PayloadType::String => "string",
            PayloadType::ComponentNid => "component_nid",
            PayloadType::Description => "description",
        };
        f.write_str(name)
    }
}

/// Serialize, deserialize and skip one payload variant's fields.
pub trait PayloadFields: Sized {
    fn write_fields(&self, buffer: &mut DataBuffer, registries: &Registries)
    -> Result<(), CodecError>;

    fn read_fields(buffer: &mut DataBuffer, registries: &Registries) -> Result<Self, CodecError>;

    /// Advance past the fields without resolving identifiers.
    fn skip_fields(buffer: &mut DataBuffer) -> Result<(), CodecError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LongPayload {
    pub value: i64,
}

impl PayloadFields for LongPayload {
    fn write_fields(&self, buffer: &mut DataBuffer, _: &Registries) -> Result<(), CodecError> {
        buffer.put_i64(self.value);
        Ok(())
    }

    fn read_fields(buffer: &mut DataBuffer, _: &Registries) -> Result<Self, CodecError> {
        Ok(Self {
            value: buffer.get_i64()?,
        })
    }

    fn skip_fields(buffer: &mut DataBuffer) -> Result<(), CodecError> {
        buffer.skip(8)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StringPayload {
    pub text: String,
}

impl PayloadFields for StringPayload {
    fn write_fields(&self, buffer: &mut DataBuffer, _: &Registries) -> Result<(), CodecError> {
        buffer.put_utf(&self.text);
        Ok(())
    }

    fn read_fields(buffer: &mut DataBuffer, _: &Registries) -> Result<Self, CodecError> {
        Ok(Self {
            text: buffer.get_utf()?,
        })
    }

    fn skip_fields(buffer: &mut DataBuffer) -> Result<(), CodecError> {
        let length = buffer.get_length()?;
        buffer.skip(length)
    }
}

/// Reference to another component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentNidPayload {
    pub component: Nid,
}

impl PayloadFields for ComponentNidPayload {
    fn write_fields(
        &self,
        buffer: &mut DataBuffer,
        registries: &Registries,
    ) -> Result<(), CodecError> {
        buffer.put_nid(self.component, registries)
    }

    fn read_fields(buffer: &mut DataBuffer, registries: &Registries) -> Result<Self, CodecError> {
        Ok(Self {
            component: buffer.get_nid(registries)?,
        })
    }

    fn skip_fields(buffer: &mut DataBuffer) -> Result<(), CodecError> {
        buffer.skip_identifier()
    }
}

/// Text attached to a concept, with its language and role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptionPayload {
    pub case_significance: ConceptSequence,
    pub language: ConceptSequence,
    pub text: String,
    pub description_type: ConceptSequence,
}

impl PayloadFields for DescriptionPayload {
    fn write_fields(
        &self,
        buffer: &mut DataBuffer,
        registries: &Registries,
    ) -> Result<(), CodecError> {
        buffer.put_concept_sequence(self.case_significance, registries)?;
        buffer.put_concept_sequence(self.language, registries)?;
        buffer.put_utf(&self.text);
        buffer.put_concept_sequence(self.description_type, registries)
    }

    fn read_fields(buffer: &mut DataBuffer, registries: &Registries) -> Result<Self, CodecError> {
        Ok(Self {
            case_significance: buffer.get_concept_sequence(registries)?,
            language: buffer.get_concept_sequence(registries)?,
            text: buffer.get_utf()?,
            description_type: buffer.get_concept_sequence(registries)?,
        })
    }

    fn skip_fields(buffer: &mut DataBuffer) -> Result<(), CodecError> {
        buffer.skip_identifier()?;
        buffer.skip_identifier()?;
        StringPayload::skip_fields(buffer)?;
        buffer.skip_identifier()
    }
}

/// Placeholder nid of a component reference that was never set.
pub const UNSET_NID: Nid = Nid(0);

/// Placeholder for a concept reference that was never set.
pub const UNSET_CONCEPT: ConceptSequence = ConceptSequence(0);

/// Subtype-specific content of one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Concept versions carry only their stamp.
    Concept,
    /// Membership in an assemblage, no extra fields.
    Member,
    Long(LongPayload),
    String(StringPayload),
    ComponentNid(ComponentNidPayload),
    Description(DescriptionPayload),
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Concept => PayloadType::Concept,
            Payload::Member => PayloadType::Member,
            Payload::Long(_) => PayloadType::Long,
            Payload::String(_) => PayloadType::String,
            Payload::ComponentNid(_) => PayloadType::ComponentNid,
            Payload::Description(_) => PayloadType::Description,
        }
    }

    /// Initial content of a freshly created version.
    ///
    /// Identifier fields hold [`UNSET_NID`] or [`UNSET_CONCEPT`] until edited.
    pub fn empty(payload_type: PayloadType) -> Self {
        let unset = UNSET_CONCEPT;
        match payload_type {
            PayloadType::Concept => Payload::Concept,
            PayloadType::Member => Payload::Member,
            PayloadType::Long => Payload::Long(LongPayload::default()),
            PayloadType::String => Payload::String(StringPayload::default()),
            PayloadType::ComponentNid => Payload::ComponentNid(ComponentNidPayload {
                component: UNSET_NID,
            }),
            PayloadType::Description => Payload::Description(DescriptionPayload {
                case_significance: unset,
                language: unset,
                text: String::new(),
                description_type: unset,
            }),
        }
    }

    /// Whether an identifier field still holds its placeholder.
    pub fn is_unset(&self) -> bool {
        match self {
            Payload::ComponentNid(fields) => fields.component == UNSET_NID,
            Payload::Description(fields) => [
                fields.case_significance,
                fields.language,
                fields.description_type,
            ]
            .contains(&UNSET_CONCEPT),
            Payload::Concept | Payload::Member | Payload::Long(_) | Payload::String(_) => false,
        }
    }

    pub fn write(&self, buffer: &mut DataBuffer, registries: &Registries) -> Result<(), CodecError> {
        match self {
            Payload::Concept | Payload::Member => Ok(()),
            Payload::Long(fields) => fields.write_fields(buffer, registries),
            Payload::String(fields) => fields.write_fields(buffer, registries),
            Payload::ComponentNid(fields) => fields.write_fields(buffer, registries),
            Payload::Description(fields) => fields.write_fields(buffer, registries),
        }
    }

    pub fn read(
        payload_type: PayloadType,
        buffer: &mut DataBuffer,
        registries: &Registries,
    ) -> Result<Self, CodecError> {
        Ok(match payload_type {
            PayloadType::Concept => Payload::Concept,
            PayloadType::Member => Payload::Member,
            PayloadType::Long => Payload::Long(LongPayload::read_fields(buffer, registries)?),
            PayloadType::String => Payload::String(StringPayload::read_fields(buffer, registries)?),
            PayloadType::ComponentNid => {
                Payload::ComponentNid(ComponentNidPayload::read_fields(buffer, registries)?)
            }
            PayloadType::Description => {
                Payload::Description(DescriptionPayload::read_fields(buffer, registries)?)
            }
        })
    }

    pub fn skip(payload_type: PayloadType, buffer: &mut DataBuffer) -> Result<(), CodecError> {
        match payload_type {
            PayloadType::Concept | PayloadType::Member => Ok(()),
            PayloadType::Long => LongPayload::skip_fields(buffer),
            PayloadType::String => StringPayload::skip_fields(buffer),
            PayloadType::ComponentNid => ComponentNidPayload::skip_fields(buffer),
            PayloadType::Description => DescriptionPayload::skip_fields(buffer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use termstore_kernel::MemoryRegistries;
    use uuid::Uuid;

    #[test]
    fn tags_round_trip_and_reject_unknown() {
        for payload_type in [
            PayloadType::Concept,
            PayloadType::Member,
            PayloadType::Long,
            PayloadType::String,
            PayloadType::ComponentNid,
            PayloadType::Description,
        ] {
            let tag = payload_type.tag();
            assert_eq!(PayloadType::from_tag(tag).expect("known tag"), payload_type);
        }
        assert!(PayloadType::from_tag(0).is_err());
    }

    #[test]
    fn skip_and_read_stop_at_the_same_offset() {
        let memory = MemoryRegistries::new();
        let registries = memory.registries();
        let language = memory.identifiers.register_concept(Uuid::new_v4());
        let payload = Payload::Description(DescriptionPayload {
            case_significance: language,
            language,
            text: "myocardial infarction".to_string(),
            description_type: language,
        });

        for external in [false, true] {
            let mut buffer = DataBuffer::with_capacity(0, external);
            payload.write(&mut buffer, &registries).expect("write");
            buffer.put_u8(0xAA);
            let bytes = buffer.into_bytes();

            let mut reader = DataBuffer::wrap(bytes.clone(), external);
            let read = Payload::read(PayloadType::Description, &mut reader, &registries)
                .expect("read");
            assert_eq!(read, payload);

            let mut skipper = DataBuffer::wrap(bytes, external);
            Payload::skip(PayloadType::Description, &mut skipper).expect("skip");
            assert_eq!(skipper.position(), reader.position());
        }
    }

    #[test]
    fn empty_payload_matches_its_type() {
        assert_eq!(
            Payload::empty(PayloadType::String).payload_type(),
            PayloadType::String
        );
        assert_eq!(Payload::empty(PayloadType::Concept), Payload::Concept);
    }

    #[test]
    fn empty_payloads_report_unset_identifiers() {
        assert!(Payload::empty(PayloadType::ComponentNid).is_unset());
        assert!(Payload::empty(PayloadType::Description).is_unset());
        assert!(!Payload::empty(PayloadType::String).is_unset());
        assert!(!Payload::empty(PayloadType::Member).is_unset());
        assert!(
            !Payload::ComponentNid(ComponentNidPayload { component: Nid(5) }).is_unset()
        );
    }
}
