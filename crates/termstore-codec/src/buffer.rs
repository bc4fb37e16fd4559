//! Cursor over a growable byte array.
//!
//! A buffer tracks three positions:
//!
//! ```text
//! 0 ──────────── position ────────── limit ───── capacity
//!   already read /        unread or           zero fill,
//!   already written       backpatchable       reused on growth
//! ```
//!
//! Reads never cross `limit`. Writes extend `limit` when they pass it and
//! double the backing array when they pass capacity. [`DataBuffer::into_bytes`]
//! trims the array back to `limit`.

use crate::error::CodecError;
use termstore_kernel::{
    ComponentKind, ConceptSequence, KernelError, Nid, Registries, Stamp, StampSequence, Status,
};
use uuid::Uuid;

/// Format version written at the head of every record.
pub const FORMAT_VERSION: u8 = 1;

const MIN_GROWTH: usize = 16;

/// Read/write cursor with an identifier encoding mode fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBuffer {
    data: Vec<u8>,
    position: usize,
    limit: usize,
    external: bool,
}

impl DataBuffer {
    /// Empty buffer for writing, with `capacity` bytes reserved.
    pub fn with_capacity(capacity: usize, external: bool) -> Self {
        Self {
            data: vec![0; capacity],
            position: 0,
            limit: 0,
            external,
        }
    }

    /// Buffer for reading `bytes` from the start.
    pub fn wrap(bytes: Vec<u8>, external: bool) -> Self {
        let limit = bytes.len();
        Self {
            data: bytes,
            position: 0,
            limit,
            external,
        }
    }

    pub fn from_slice(bytes: &[u8], external: bool) -> Self {
        Self::wrap(bytes.to_vec(), external)
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor. Any position up to `limit` is valid.
    pub fn set_position(&mut self, position: usize) -> Result<(), CodecError> {
        if position > self.limit {
            return Err(CodecError::OutOfBounds {
                position,
                requested: 0,
                limit: self.limit,
            });
        }
        self.position = position;
        Ok(())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Bytes between the start and `limit`.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.limit]
    }

    /// Consume the buffer, trimming the backing array to `limit`.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.truncate(self.limit);
        self.data.shrink_to_fit();
        self.data
    }

    fn ensure_writable(&mut self, count: usize) {
        let end = self.position + count;
        if end > self.data.len() {
            let grown = (self.data.len() * 2).max(end).max(MIN_GROWTH);
            self.data.resize(grown, 0);
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let end = self.position + bytes.len();
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        self.limit = self.limit.max(end);
    }

    fn read_raw(&mut self, count: usize) -> Result<&[u8], CodecError> {
        let start = self.position;
        let end = start
            .checked_add(count)
            .filter(|end| *end <= self.limit)
            .ok_or(CodecError::OutOfBounds {
                position: start,
                requested: count,
                limit: self.limit,
            })?;
        self.position = end;
        Ok(&self.data[start..end])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_raw(N)?);
        Ok(out)
    }

    /// Advance past `count` bytes without reading them.
    pub fn skip(&mut self, count: usize) -> Result<(), CodecError> {
        self.read_raw(count).map(|_| ())
    }

    /// Copy `length` bytes of `source`, starting at `start`, to the cursor.
    pub fn append(
        &mut self,
        source: &DataBuffer,
        start: usize,
        length: usize,
    ) -> Result<(), CodecError> {
        let end = start
            .checked_add(length)
            .filter(|end| *end <= source.limit)
            .ok_or(CodecError::OutOfBounds {
                position: start,
                requested: length,
                limit: source.limit,
            })?;
        self.write_raw(&source.data[start..end]);
        Ok(())
    }

    /// Raw bytes, no length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.write_raw(bytes);
    }

    // ----- primitives -----

    pub fn put_u8(&mut self, value: u8) {
        self.write_raw(&[value]);
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn put_i8(&mut self, value: i8) {
        self.write_raw(&value.to_be_bytes());
    }

    pub fn get_i8(&mut self) -> Result<i8, CodecError> {
        Ok(i8::from_be_bytes(self.read_array()?))
    }

    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    pub fn get_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn put_i16(&mut self, value: i16) {
        self.write_raw(&value.to_be_bytes());
    }

    pub fn get_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn put_i32(&mut self, value: i32) {
        self.write_raw(&value.to_be_bytes());
    }

    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn put_i64(&mut self, value: i64) {
        self.write_raw(&value.to_be_bytes());
    }

    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Overwrite four bytes at `at` without moving the cursor.
    pub fn put_i32_at(&mut self, at: usize, value: i32) -> Result<(), CodecError> {
        if at + 4 > self.limit {
            return Err(CodecError::OutOfBounds {
                position: at,
                requested: 4,
                limit: self.limit,
            });
        }
        self.data[at..at + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Length prefix read as a non-negative count.
    pub fn get_length(&mut self) -> Result<usize, CodecError> {
        let position = self.position;
        let length = self.get_i32()?;
        usize::try_from(length).map_err(|_| CodecError::InvalidLength { position, length })
    }

    /// `[4B byte length][UTF-8 bytes]`.
    pub fn put_utf(&mut self, value: &str) {
        self.put_i32(value.len() as i32);
        self.write_raw(value.as_bytes());
    }

    pub fn get_utf(&mut self) -> Result<String, CodecError> {
        let length = self.get_length()?;
        let position = self.position;
        let bytes = self.read_raw(length)?.to_vec();
        String::from_utf8(bytes).map_err(|error| CodecError::InvalidUtf8 {
            position,
            message: error.to_string(),
        })
    }

    /// `[8B most significant][8B least significant]`.
    pub fn put_uuid(&mut self, uuid: Uuid) {
        let (msb, lsb) = uuid.as_u64_pair();
        self.put_i64(msb as i64);
        self.put_i64(lsb as i64);
    }

    pub fn get_uuid(&mut self) -> Result<Uuid, CodecError> {
        let msb = self.get_i64()? as u64;
        let lsb = self.get_i64()? as u64;
        Ok(Uuid::from_u64_pair(msb, lsb))
    }

    // ----- envelope -----

    pub fn put_format_version(&mut self) {
        self.put_u8(FORMAT_VERSION);
    }

    /// Read and check the format version byte.
    pub fn get_format_version(&mut self) -> Result<u8, CodecError> {
        match self.get_u8()? {
            FORMAT_VERSION => Ok(FORMAT_VERSION),
            other => Err(CodecError::UnsupportedFormatVersion(other)),
        }
    }

    // ----- identifiers -----

    /// Component reference: a nid internally, its primordial uuid externally.
    pub fn put_nid(&mut self, nid: Nid, registries: &Registries) -> Result<(), CodecError> {
        if self.external {
            let uuid = registries
                .identifiers()
                .primordial_uuid(nid)
                .ok_or(KernelError::UnknownNid(nid))?;
            self.put_uuid(uuid);
        } else {
            self.put_i32(nid.0);
        }
        Ok(())
    }

    pub fn get_nid(&mut self, registries: &Registries) -> Result<Nid, CodecError> {
        if self.external {
            let uuid = self.get_uuid()?;
            Ok(registries.identifiers().nid_for_uuids(&[uuid]))
        } else {
            Ok(Nid(self.get_i32()?))
        }
    }

    /// Concept reference by sequence internally, by uuid externally.
    pub fn put_concept_sequence(
        &mut self,
        sequence: ConceptSequence,
        registries: &Registries,
    ) -> Result<(), CodecError> {
        if self.external {
            let nid = registries
                .identifiers()
                .concept_nid(sequence)
                .ok_or(KernelError::UnknownConcept(sequence))?;
            self.put_nid(nid, registries)
        } else {
            self.put_i32(sequence.0);
            Ok(())
        }
    }

    pub fn get_concept_sequence(
        &mut self,
        registries: &Registries,
    ) -> Result<ConceptSequence, CodecError> {
        if self.external {
            let nid = self.get_nid(registries)?;
            let sequence = registries
                .identifiers()
                .container_sequence(nid, ComponentKind::Concept);
            Ok(ConceptSequence(sequence))
        } else {
            Ok(ConceptSequence(self.get_i32()?))
        }
    }

    /// Stamp reference: the interned sequence internally, the full tuple with
    /// portable concept ids externally.
    pub fn put_stamp_sequence(
        &mut self,
        sequence: StampSequence,
        registries: &Registries,
    ) -> Result<(), CodecError> {
        if !self.external {
            self.put_i32(sequence.0);
            return Ok(());
        }
        let stamp = registries
            .stamps()
            .stamp(sequence)
            .ok_or(KernelError::UnknownStamp(sequence))?;
        self.put_u8(stamp.status.code());
        self.put_i64(stamp.time);
        self.put_concept_sequence(stamp.author, registries)?;
        self.put_concept_sequence(stamp.module, registries)?;
        self.put_concept_sequence(stamp.path, registries)
    }

    /// Skip a nid or concept sequence in the buffer's mode.
    pub fn skip_identifier(&mut self) -> Result<(), CodecError> {
        self.skip(if self.external { 16 } else { 4 })
    }

    pub fn skip_stamp(&mut self) -> Result<(), CodecError> {
        if self.external {
            self.skip(1 + 8)?;
            for _ in 0..3 {
                self.skip_identifier()?;
            }
            Ok(())
        } else {
            self.skip(4)
        }
    }

    pub fn get_stamp_sequence(
        &mut self,
        registries: &Registries,
    ) -> Result<StampSequence, CodecError> {
        if !self.external {
            return Ok(StampSequence(self.get_i32()?));
        }
        let status = Status::from_code(self.get_u8()?)?;
        let time = self.get_i64()?;
        let author = self.get_concept_sequence(registries)?;
        let module = self.get_concept_sequence(registries)?;
        let path = self.get_concept_sequence(registries)?;
        let stamp = Stamp::new(status, time, author, module, path);
        Ok(registries.stamps().stamp_sequence_for(&stamp))
    }
}
