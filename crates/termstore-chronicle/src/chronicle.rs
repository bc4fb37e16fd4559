//! Append-only chronicle of versions for one component.
//!
//! A chronicle keeps three views of its history:
//!
//! ```text
//!  overlay ──┐   versions created since the last flush, keyed by stamp
//!            ├──▶ flush / merge ──▶ new written record (copy-on-write)
//!  written ──┘   last flushed record, parsed lazily
//!
//!  version list  materialized from written + overlay, evictable
//! ```
//!
//! Readers snapshot the overlay before the written record; publishers swap
//! the written record before pruning the overlay. A reader therefore sees
//! every flushed version in at least one of the two.
//!
//! Merge identity is the stamp sequence. At most one version per stamp
//! survives a flush or merge, taken from the first source in priority
//! order: overlay, local written record, external record. Versions whose
//! stamp the registry reports canceled are dropped.

use crate::config::StoreConfig;
use crate::error::ChronicleError;
use crate::payload::{Payload, PayloadType};
use crate::record::{ChronicleKind, RecordHeader, record_write_sequence, validate_versions};
use crate::storage::{RecordStorage, WriteOutcome};
use crate::version::Version;
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicI16, AtomicI32, AtomicU64, Ordering};
use termstore_codec::{DataBuffer, Frame};
use termstore_kernel::{
    ConceptSequence, Graph, KernelError, Nid, Registries, RelativePosition,
    RelativePositionCalculator, StampCoordinate, StampSequence, StampSequenceSet,
};
use uuid::Uuid;

const FIRST_VERSION_SEQUENCE: i16 = 1;

/// A flushed record, immutable once published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRecord {
    bytes: Vec<u8>,
    version_start: usize,
    write_sequence: i32,
}

impl WrittenRecord {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn write_sequence(&self) -> i32 {
        self.write_sequence
    }

    /// Offset of the first version frame.
    pub fn version_start(&self) -> usize {
        self.version_start
    }

    /// Private cursor positioned on the first version frame.
    fn version_cursor(&self) -> Result<DataBuffer, ChronicleError> {
        let mut cursor = DataBuffer::from_slice(&self.bytes, false);
        cursor.set_position(self.version_start)?;
        Ok(cursor)
    }
}

#[derive(Debug, Clone)]
struct OverlayEntry {
    version: Version,
    generation: u64,
}

#[derive(Debug)]
struct CachedVersions {
    epoch: u64,
    versions: Arc<Vec<Version>>,
}

/// Whether any version is still open for revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Committed,
    Uncommitted,
}

/// Versions visible as latest under a coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestVersion {
    Single(Version),
    /// Two or more versions with no order between them.
    Contradicted(Vec<Version>),
}

impl LatestVersion {
    fn from_versions(mut versions: Vec<Version>) -> Option<Self> {
        match versions.len() {
            0 => None,
            1 => versions.pop().map(LatestVersion::Single),
            _ => Some(LatestVersion::Contradicted(versions)),
        }
    }

    pub fn is_contradicted(&self) -> bool {
        matches!(self, LatestVersion::Contradicted(_))
    }

    pub fn versions(&self) -> &[Version] {
        match self {
            LatestVersion::Single(version) => std::slice::from_ref(version),
            LatestVersion::Contradicted(versions) => versions,
        }
    }

    pub fn stamps(&self) -> StampSequenceSet {
        self.versions().iter().map(Version::stamp).collect()
    }
}

/// Diagnostic view of a chronicle.
#[derive(Debug, Clone, Serialize)]
pub struct ChronicleSummary {
    pub nid: Nid,
    pub primordial_uuid: Uuid,
    pub additional_uuids: Vec<Uuid>,
    pub container_sequence: i32,
    pub kind: ChronicleKind,
    pub write_sequence: i32,
    pub commit_state: CommitState,
    pub versions: Vec<VersionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionSummary {
    pub version_sequence: i16,
    pub stamp: StampSequence,
    pub stamp_description: String,
    pub payload: Payload,
}

impl ChronicleSummary {
    pub fn to_json(&self) -> Result<String, ChronicleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Versioned history of one concept or sememe.
pub struct Chronicle {
    nid: Nid,
    primordial_uuid: Uuid,
    additional_uuids: RwLock<Vec<Uuid>>,
    container_sequence: i32,
    kind: ChronicleKind,
    write_sequence: AtomicI32,
    next_version_sequence: AtomicI16,
    written: ArcSwapOption<WrittenRecord>,
    overlay: RwLock<Option<BTreeMap<StampSequence, OverlayEntry>>>,
    generation: AtomicU64,
    state_epoch: AtomicU64,
    cached_versions: Mutex<Option<CachedVersions>>,
    publish_lock: Mutex<()>,
    registries: Registries,
    config: StoreConfig,
}

impl Chronicle {
    /// Start an empty chronicle for `primordial_uuid`.
    pub fn new(
        primordial_uuid: Uuid,
        kind: ChronicleKind,
        registries: Registries,
        config: StoreConfig,
    ) -> Self {
        let identifiers = registries.identifiers();
        let nid = identifiers.nid_for_uuids(&[primordial_uuid]);
        let container_sequence = identifiers.container_sequence(nid, kind.component_kind());
        let header = RecordHeader {
            kind,
            write_sequence: 0,
            primordial_uuid,
            additional_uuids: identifiers
                .uuids_for_nid(nid)
                .into_iter()
                .filter(|uuid| *uuid != primordial_uuid)
                .collect(),
            nid,
            container_sequence,
            version_counter: FIRST_VERSION_SEQUENCE,
        };
        Self::from_header(&header, registries, config)
    }

    /// Rebuild a chronicle from an internal record.
    pub fn load(
        bytes: Vec<u8>,
        registries: Registries,
        config: StoreConfig,
    ) -> Result<Self, ChronicleError> {
        let mut cursor = DataBuffer::wrap(bytes, false);
        let header = RecordHeader::read(&mut cursor, &registries)?;
        let version_start = cursor.position();
        let count = validate_versions(&cursor, header.kind.payload_type())?;

        let chronicle = Self::from_header(&header, registries, config);
        chronicle.written.store(Some(Arc::new(WrittenRecord {
            bytes: cursor.into_bytes(),
            version_start,
            write_sequence: header.write_sequence,
        })));
        tracing::debug!(
            nid = header.nid.0,
            write_sequence = header.write_sequence,
            versions = count,
            "chronicle loaded"
        );
        Ok(chronicle)
    }

    /// Rebuild a chronicle from an interchange record.
    ///
    /// Identity is resolved through the identifier registry and portable
    /// stamps are interned. Versions land in the overlay with fresh version
    /// sequences.
    pub fn read_external(
        bytes: &[u8],
        registries: Registries,
        config: StoreConfig,
    ) -> Result<Self, ChronicleError> {
        let mut cursor = DataBuffer::from_slice(bytes, true);
        let header = RecordHeader::read(&mut cursor, &registries)?;
        let payload_type = header.kind.payload_type();
        let chronicle = Self::from_header(&header, registries, config);

        let mut sequence = FIRST_VERSION_SEQUENCE;
        while let Some(frame) = Frame::next(&mut cursor)? {
            let version = Version::make(
                &frame,
                header.nid,
                payload_type,
                &mut cursor,
                &chronicle.registries,
                sequence,
            )?;
            chronicle.insert_overlay(version);
            sequence = sequence
                .checked_add(1)
                .ok_or_else(|| sequences_exhausted(header.nid))?;
        }
        chronicle
            .next_version_sequence
            .store(sequence, Ordering::SeqCst);
        tracing::debug!(
            nid = header.nid.0,
            versions = sequence - FIRST_VERSION_SEQUENCE,
            "chronicle read from interchange"
        );
        Ok(chronicle)
    }

    fn from_header(header: &RecordHeader, registries: Registries, config: StoreConfig) -> Self {
        Self {
            nid: header.nid,
            primordial_uuid: header.primordial_uuid,
            additional_uuids: RwLock::new(header.additional_uuids.clone()),
            container_sequence: header.container_sequence,
            kind: header.kind,
            write_sequence: AtomicI32::new(header.write_sequence),
            next_version_sequence: AtomicI16::new(header.version_counter),
            written: ArcSwapOption::empty(),
            overlay: RwLock::new(None),
            generation: AtomicU64::new(0),
            state_epoch: AtomicU64::new(0),
            cached_versions: Mutex::new(None),
            publish_lock: Mutex::new(()),
            registries,
            config,
        }
    }

    // ----- identity -----

    pub fn nid(&self) -> Nid {
        self.nid
    }

    pub fn primordial_uuid(&self) -> Uuid {
        self.primordial_uuid
    }

    /// Primordial uuid first, then aliases in the order they were added.
    pub fn uuid_list(&self) -> Vec<Uuid> {
        let aliases = self.additional_uuids.read();
        let mut uuids = Vec::with_capacity(1 + aliases.len());
        uuids.push(self.primordial_uuid);
        uuids.extend(aliases.iter().copied());
        uuids
    }

    /// Record an alias and register it with the identifier registry.
    ///
    /// Returns false if the uuid already identifies this chronicle.
    pub fn add_additional_uuid(&self, uuid: Uuid) -> bool {
        if uuid == self.primordial_uuid {
            return false;
        }
        {
            let mut aliases = self.additional_uuids.write();
            if aliases.contains(&uuid) {
                return false;
            }
            aliases.push(uuid);
        }
        self.registries.identifiers().add_uuid_alias(uuid, self.nid);
        true
    }

    pub fn container_sequence(&self) -> i32 {
        self.container_sequence
    }

    /// Container sequence as a concept reference, for concept chronicles.
    pub fn concept_sequence(&self) -> Option<ConceptSequence> {
        matches!(self.kind, ChronicleKind::Concept).then_some(ConceptSequence(self.container_sequence))
    }

    pub fn kind(&self) -> ChronicleKind {
        self.kind
    }

    pub fn payload_type(&self) -> PayloadType {
        self.kind.payload_type()
    }

    /// Write sequence of the record this chronicle last published.
    pub fn write_sequence(&self) -> i32 {
        self.write_sequence.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Option<Arc<WrittenRecord>> {
        self.written.load_full()
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    // ----- mutation -----

    /// Create a version with an empty payload and add it to the overlay.
    pub fn create_version(&self, stamp: StampSequence) -> Result<Version, ChronicleError> {
        self.create_version_with(stamp, Payload::empty(self.payload_type()))
    }

    pub fn create_version_with(
        &self,
        stamp: StampSequence,
        payload: Payload,
    ) -> Result<Version, ChronicleError> {
        let sequence = self.claim_version_sequence()?;
        let version = Version::new(self.nid, stamp, sequence, payload);
        self.add_version(version.clone())?;
        Ok(version)
    }

    /// Put `version` in the overlay, replacing any version with its stamp.
    pub fn add_version(&self, version: Version) -> Result<(), ChronicleError> {
        self.check_version(&version)?;
        self.insert_overlay(version);
        Ok(())
    }

    /// Edit the payload of an uncommitted version in place.
    pub fn revise_version(
        &self,
        stamp: StampSequence,
        edit: impl FnOnce(&mut Payload),
    ) -> Result<Version, ChronicleError> {
        let mut version = self
            .version_for_stamp(stamp)?
            .ok_or(ChronicleError::NoSuchVersion {
                nid: self.nid,
                stamp,
            })?;
        edit(version.payload_mut(self.registries.stamps())?);
        self.add_version(version.clone())?;
        Ok(version)
    }

    /// Replace the whole history with `versions`.
    ///
    /// Previously written versions not in `versions` are lost.
    pub fn set_versions(&self, versions: Vec<Version>) -> Result<(), ChronicleError> {
        for version in &versions {
            self.check_version(version)?;
        }
        let _publishing = self.publish_lock.lock();
        let highest = versions
            .iter()
            .map(Version::version_sequence)
            .max()
            .unwrap_or(0);
        self.next_version_sequence
            .fetch_max(highest.saturating_add(1), Ordering::SeqCst);

        let mut buffer = DataBuffer::with_capacity(self.config.buffer.initial_capacity, false);
        self.header(self.write_sequence(), self.additional_uuids.read().clone())
            .write(&mut buffer, &self.registries)?;
        let mut emitted = BTreeSet::new();
        for version in &versions {
            if emitted.insert(version.stamp()) {
                version.write(&mut buffer, &self.registries)?;
            }
        }
        buffer.put_terminator();

        self.publish(buffer.into_bytes(), None)?;
        *self.overlay.write() = None;
        self.bump_epoch();
        tracing::debug!(nid = self.nid.0, versions = emitted.len(), "versions replaced");
        Ok(())
    }

    /// Take the next version sequence. Fails once the counter reaches
    /// `i16::MAX` instead of wrapping.
    fn claim_version_sequence(&self) -> Result<i16, ChronicleError> {
        self.next_version_sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| next.checked_add(1))
            .map_err(|_| sequences_exhausted(self.nid))
    }

    fn check_version(&self, version: &Version) -> Result<(), ChronicleError> {
        if version.nid() != self.nid {
            return Err(ChronicleError::RecordMismatch(format!(
                "version of {} offered to chronicle {}",
                version.nid(),
                self.nid
            )));
        }
        if version.payload_type() != self.payload_type() {
            return Err(ChronicleError::RecordMismatch(format!(
                "{} version offered to a {} chronicle",
                version.payload_type(),
                self.payload_type()
            )));
        }
        Ok(())
    }

    /// Writers to one chronicle are serialized on the overlay write lock.
    fn insert_overlay(&self, version: Version) {
        let stamp = version.stamp();
        {
            let mut overlay = self.overlay.write();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            overlay
                .get_or_insert_with(|| {
                    tracing::trace!(nid = self.nid.0, "overlay created");
                    BTreeMap::new()
                })
                .insert(
                    stamp,
                    OverlayEntry {
                        version,
                        generation,
                    },
                );
        }
        self.bump_epoch();
    }

    fn overlay_snapshot(&self) -> (Vec<Version>, u64) {
        let overlay = self.overlay.read();
        let Some(entries) = overlay.as_ref() else {
            return (Vec::new(), 0);
        };
        let generation = entries
            .values()
            .map(|entry| entry.generation)
            .max()
            .unwrap_or(0);
        let versions = entries.values().map(|entry| entry.version.clone()).collect();
        (versions, generation)
    }

    fn bump_epoch(&self) {
        self.state_epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn header(&self, write_sequence: i32, additional_uuids: Vec<Uuid>) -> RecordHeader {
        RecordHeader {
            kind: self.kind,
            write_sequence,
            primordial_uuid: self.primordial_uuid,
            additional_uuids,
            nid: self.nid,
            container_sequence: self.container_sequence,
            version_counter: self.next_version_sequence.load(Ordering::SeqCst),
        }
    }

    // ----- flush and merge -----

    /// Produce a new record holding written and overlay versions.
    ///
    /// Nothing is published; the chronicle is unchanged.
    pub fn flush(&self, write_sequence: i32) -> Result<Vec<u8>, ChronicleError> {
        let (overlay, _) = self.overlay_snapshot();
        self.flushed_bytes(write_sequence, &overlay)
    }

    /// Produce one record from overlay, written data and `external`.
    ///
    /// Fails if `external` has an unsupported format version or belongs to
    /// another component.
    pub fn merge(&self, write_sequence: i32, external: &[u8]) -> Result<Vec<u8>, ChronicleError> {
        let (overlay, _) = self.overlay_snapshot();
        self.merged_bytes(write_sequence, &overlay, external)
    }

    /// Flush and adopt the result as the written record.
    pub fn flush_and_publish(
        &self,
        write_sequence: i32,
    ) -> Result<Arc<WrittenRecord>, ChronicleError> {
        let _publishing = self.publish_lock.lock();
        let (overlay, generation) = self.overlay_snapshot();
        let bytes = self.flushed_bytes(write_sequence, &overlay)?;
        self.publish(bytes, Some(generation))
    }

    /// Merge with `external` and adopt the result as the written record.
    pub fn merge_and_publish(
        &self,
        write_sequence: i32,
        external: &[u8],
    ) -> Result<Arc<WrittenRecord>, ChronicleError> {
        let _publishing = self.publish_lock.lock();
        let (overlay, generation) = self.overlay_snapshot();
        let bytes = self.merged_bytes(write_sequence, &overlay, external)?;
        self.publish(bytes, Some(generation))
    }

    /// Adopt `bytes` as the written record. The overlay is kept and still
    /// takes priority over the new record.
    ///
    /// Fails if `bytes` carries a lower write sequence than the published
    /// record; use [`Chronicle::merge_and_publish`] to fold in older data.
    pub fn set_written_data(&self, bytes: Vec<u8>) -> Result<Arc<WrittenRecord>, ChronicleError> {
        let _publishing = self.publish_lock.lock();
        self.publish(bytes, None)
    }

    fn flushed_bytes(
        &self,
        write_sequence: i32,
        overlay: &[Version],
    ) -> Result<Vec<u8>, ChronicleError> {
        let mut sources = Vec::new();
        if let Some(written) = self.written.load_full() {
            sources.push(written.version_cursor()?);
        }
        let aliases = self.additional_uuids.read().clone();
        let bytes = self.write_merged(
            self.header(write_sequence, aliases),
            overlay,
            sources,
        )?;
        tracing::debug!(
            nid = self.nid.0,
            write_sequence,
            overlay = overlay.len(),
            bytes = bytes.len(),
            "chronicle flushed"
        );
        Ok(bytes)
    }

    fn merged_bytes(
        &self,
        write_sequence: i32,
        overlay: &[Version],
        external: &[u8],
    ) -> Result<Vec<u8>, ChronicleError> {
        let mut incoming = DataBuffer::from_slice(external, false);
        let incoming_header = RecordHeader::read(&mut incoming, &self.registries)?;
        self.check_same_component(&incoming_header)?;
        validate_versions(&incoming, self.payload_type())?;

        let mut aliases = self.additional_uuids.read().clone();
        for alias in incoming_header.uuid_list() {
            if alias != self.primordial_uuid && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        let mut header = self.header(write_sequence, aliases);
        header.version_counter = header.version_counter.max(incoming_header.version_counter);

        let mut sources = Vec::new();
        if let Some(written) = self.written.load_full() {
            sources.push(written.version_cursor()?);
        }
        sources.push(incoming);
        let bytes = self.write_merged(header, overlay, sources)?;
        tracing::debug!(
            nid = self.nid.0,
            write_sequence,
            incoming_write_sequence = incoming_header.write_sequence,
            bytes = bytes.len(),
            "chronicle merged"
        );
        Ok(bytes)
    }

    /// Write `header`, then one version per stamp from `overlay` and each
    /// source cursor in order, then the terminator.
    fn write_merged(
        &self,
        header: RecordHeader,
        overlay: &[Version],
        sources: Vec<DataBuffer>,
    ) -> Result<Vec<u8>, ChronicleError> {
        let stamps = self.registries.stamps();
        let estimate = sources.iter().map(DataBuffer::limit).sum::<usize>() + overlay.len() * 64;
        let mut buffer =
            DataBuffer::with_capacity(estimate.max(self.config.buffer.initial_capacity), false);
        header.write(&mut buffer, &self.registries)?;

        let mut emitted = BTreeSet::new();
        for version in overlay {
            if stamps.is_canceled(version.stamp()) {
                tracing::trace!(nid = self.nid.0, stamp = version.stamp().0, "dropping canceled version");
                continue;
            }
            if emitted.insert(version.stamp()) {
                version.write(&mut buffer, &self.registries)?;
            }
        }
        for mut source in sources {
            while let Some(frame) = Frame::next(&mut source)? {
                let stamp = Version::read_stamp(&frame, &mut source, &self.registries)?;
                if stamps.is_canceled(stamp) {
                    tracing::trace!(nid = self.nid.0, stamp = stamp.0, "dropping canceled version");
                } else if emitted.insert(stamp) {
                    buffer.append_frame(&source, &frame)?;
                }
                frame.skip(&mut source)?;
            }
        }
        buffer.put_terminator();
        Ok(buffer.into_bytes())
    }

    /// Caller holds `publish_lock`.
    fn publish(
        &self,
        bytes: Vec<u8>,
        flushed_generation: Option<u64>,
    ) -> Result<Arc<WrittenRecord>, ChronicleError> {
        let mut cursor = DataBuffer::wrap(bytes, false);
        let header = RecordHeader::read(&mut cursor, &self.registries)?;
        self.check_same_component(&header)?;
        let published = self.write_sequence();
        if header.write_sequence < published {
            return Err(ChronicleError::IllegalState(format!(
                "record of {} at write sequence {} is older than published {published}",
                self.nid, header.write_sequence
            )));
        }
        let version_start = cursor.position();
        validate_versions(&cursor, self.payload_type())?;

        let record = Arc::new(WrittenRecord {
            bytes: cursor.into_bytes(),
            version_start,
            write_sequence: header.write_sequence,
        });
        self.written.store(Some(Arc::clone(&record)));
        self.write_sequence
            .store(header.write_sequence, Ordering::SeqCst);
        self.next_version_sequence
            .fetch_max(header.version_counter, Ordering::SeqCst);
        for alias in header.additional_uuids {
            self.add_additional_uuid(alias);
        }

        if let Some(generation) = flushed_generation {
            let mut overlay = self.overlay.write();
            if let Some(entries) = overlay.as_mut() {
                entries.retain(|_, entry| entry.generation > generation);
                if entries.is_empty() {
                    *overlay = None;
                }
            }
        }
        self.bump_epoch();
        tracing::debug!(
            nid = self.nid.0,
            write_sequence = header.write_sequence,
            bytes = record.bytes.len(),
            "written record published"
        );
        Ok(record)
    }

    fn check_same_component(&self, header: &RecordHeader) -> Result<(), ChronicleError> {
        if header.nid != self.nid {
            return Err(ChronicleError::RecordMismatch(format!(
                "record for {} offered to chronicle {}",
                header.nid, self.nid
            )));
        }
        if header.kind != self.kind {
            return Err(ChronicleError::RecordMismatch(format!(
                "{:?} record offered to {:?} chronicle {}",
                header.kind, self.kind, self.nid
            )));
        }
        Ok(())
    }

    /// Persist through `storage` with optimistic concurrency.
    ///
    /// Each round reads the stored record, flushes (or merges, when another
    /// writer got there first) with the next write sequence, and
    /// compare-and-writes against the write sequence it read. Returns the
    /// write sequence that was stored.
    pub fn write_to(&self, storage: &dyn RecordStorage) -> Result<i32, ChronicleError> {
        let _publishing = self.publish_lock.lock();
        let max_attempts = self.config.write.max_attempts;
        for attempt in 1..=max_attempts {
            let stored = storage.read(self.nid)?;
            let expected = stored.as_deref().map(record_write_sequence).transpose()?;
            let local = self.write_sequence();
            let target = expected.unwrap_or(0).max(local) + 1;

            let (overlay, generation) = self.overlay_snapshot();
            let bytes = match stored.as_deref() {
                Some(stored) if expected != Some(local) => {
                    self.merged_bytes(target, &overlay, stored)?
                }
                _ => self.flushed_bytes(target, &overlay)?,
            };

            match storage.compare_and_write(self.nid, expected, bytes.clone())? {
                WriteOutcome::Written => {
                    self.publish(bytes, Some(generation))?;
                    return Ok(target);
                }
                WriteOutcome::Conflict => {
                    tracing::debug!(nid = self.nid.0, attempt, "write conflict, retrying with merge");
                }
            }
        }
        Err(ChronicleError::WriteContention {
            nid: self.nid,
            attempts: max_attempts,
        })
    }

    // ----- reads -----

    /// All versions: written ones not shadowed by the overlay, then the
    /// overlay in stamp order.
    pub fn version_list(&self) -> Result<Arc<Vec<Version>>, ChronicleError> {
        let epoch = self.state_epoch.load(Ordering::SeqCst);
        if let Some(cached) = self.cached_versions.lock().as_ref()
            && cached.epoch == epoch
        {
            return Ok(Arc::clone(&cached.versions));
        }

        let versions = Arc::new(self.materialize()?);
        if self.config.cache.retain_version_lists {
            *self.cached_versions.lock() = Some(CachedVersions {
                epoch,
                versions: Arc::clone(&versions),
            });
        }
        Ok(versions)
    }

    /// Drop the materialized version list. Returns whether one was held.
    pub fn evict_version_list(&self) -> bool {
        self.cached_versions.lock().take().is_some()
    }

    fn materialize(&self) -> Result<Vec<Version>, ChronicleError> {
        let (overlay, _) = self.overlay_snapshot();
        let shadowed: BTreeSet<StampSequence> = overlay.iter().map(Version::stamp).collect();
        let mut versions = Vec::new();
        self.scan_written(|frame, cursor| {
            let version = self.make_version(frame, cursor)?;
            if !shadowed.contains(&version.stamp()) {
                versions.push(version);
            }
            Ok(())
        })?;
        versions.extend(overlay);
        Ok(versions)
    }

    fn make_version(&self, frame: &Frame, cursor: &mut DataBuffer) -> Result<Version, ChronicleError> {
        Ok(Version::make(
            frame,
            self.nid,
            self.payload_type(),
            cursor,
            &self.registries,
            0,
        )?)
    }

    /// Visit each written version frame on a private cursor.
    fn scan_written(
        &self,
        mut visit: impl FnMut(&Frame, &mut DataBuffer) -> Result<(), ChronicleError>,
    ) -> Result<(), ChronicleError> {
        let Some(written) = self.written.load_full() else {
            return Ok(());
        };
        let mut cursor = written.version_cursor()?;
        while let Some(frame) = Frame::next(&mut cursor)? {
            visit(&frame, &mut cursor)?;
            frame.skip(&mut cursor)?;
        }
        Ok(())
    }

    /// Stamps of every version, read without materializing payloads.
    pub fn stamp_sequences(&self) -> Result<StampSequenceSet, ChronicleError> {
        let (overlay, _) = self.overlay_snapshot();
        let mut stamps: StampSequenceSet = overlay.iter().map(Version::stamp).collect();
        self.scan_written(|frame, cursor| {
            stamps.insert(Version::read_stamp(frame, cursor, &self.registries)?);
            Ok(())
        })?;
        Ok(stamps)
    }

    /// The version carrying `stamp`, if any.
    pub fn version_for_stamp(&self, stamp: StampSequence) -> Result<Option<Version>, ChronicleError> {
        let wanted: StampSequenceSet = [stamp].into_iter().collect();
        Ok(self.versions_for_stamps(&wanted)?.pop())
    }

    fn versions_for_stamps(&self, wanted: &StampSequenceSet) -> Result<Vec<Version>, ChronicleError> {
        let (overlay, _) = self.overlay_snapshot();
        let mut found: BTreeMap<StampSequence, Version> = overlay
            .into_iter()
            .filter(|version| wanted.contains(version.stamp()))
            .map(|version| (version.stamp(), version))
            .collect();
        self.scan_written(|frame, cursor| {
            let stamp = Version::read_stamp(frame, cursor, &self.registries)?;
            if wanted.contains(stamp) && !found.contains_key(&stamp) {
                found.insert(stamp, self.make_version(frame, cursor)?);
            }
            Ok(())
        })?;
        Ok(found.into_values().collect())
    }

    pub fn commit_state(&self) -> Result<CommitState, ChronicleError> {
        let stamps = self.registries.stamps();
        let uncommitted = self
            .stamp_sequences()?
            .iter()
            .any(|stamp| stamps.is_uncommitted(stamp));
        Ok(if uncommitted {
            CommitState::Uncommitted
        } else {
            CommitState::Committed
        })
    }

    fn calculator(
        &self,
        coordinate: &StampCoordinate,
    ) -> Result<RelativePositionCalculator, ChronicleError> {
        Ok(RelativePositionCalculator::new(
            coordinate.clone(),
            &self.registries,
        )?)
    }

    /// Latest version(s) visible under `coordinate`.
    pub fn latest_version(
        &self,
        coordinate: &StampCoordinate,
    ) -> Result<Option<LatestVersion>, ChronicleError> {
        self.latest_version_with(&self.calculator(coordinate)?)
    }

    /// Same as [`Chronicle::latest_version`] with a prepared calculator.
    pub fn latest_version_with(
        &self,
        calculator: &RelativePositionCalculator,
    ) -> Result<Option<LatestVersion>, ChronicleError> {
        let latest = calculator.latest_stamp_sequences(self.stamp_sequences()?);
        if latest.is_empty() {
            return Ok(None);
        }
        Ok(LatestVersion::from_versions(
            self.versions_for_stamps(&latest)?,
        ))
    }

    pub fn is_latest_version_active(
        &self,
        coordinate: &StampCoordinate,
    ) -> Result<bool, ChronicleError> {
        let calculator = self.calculator(coordinate)?;
        Ok(calculator.is_latest_active(self.stamp_sequences()?))
    }

    /// History as a single chain ordered by stamp time.
    ///
    /// Only histories on one path are supported.
    pub fn version_graph_list(&self) -> Result<Vec<Graph<Version>>, ChronicleError> {
        let stamps = self.registries.stamps();
        let mut by_path: BTreeMap<ConceptSequence, Vec<(i64, StampSequence, Version)>> =
            BTreeMap::new();
        for version in self.version_list()?.iter() {
            let stamp = stamps
                .stamp(version.stamp())
                .ok_or(KernelError::UnknownStamp(version.stamp()))?;
            by_path
                .entry(stamp.path)
                .or_default()
                .push((stamp.time, version.stamp(), version.clone()));
        }

        match by_path.len() {
            0 => Ok(Vec::new()),
            1 => {
                let mut chain = by_path.into_values().flatten().collect::<Vec<_>>();
                chain.sort_by_key(|(time, stamp, _)| (*time, *stamp));
                Ok(vec![Graph::chain(
                    chain.into_iter().map(|(_, _, version)| version),
                )])
            }
            paths => Err(ChronicleError::Unsupported(format!(
                "version graph of {} spans {paths} paths",
                self.nid
            ))),
        }
    }

    /// Versions on route for `coordinate`, earliest first.
    ///
    /// Fails when two visible versions are unreachable from or contradict
    /// each other, since no single order exists.
    pub fn visible_ordered_version_list(
        &self,
        coordinate: &StampCoordinate,
    ) -> Result<Vec<Version>, ChronicleError> {
        let calculator = self.calculator(coordinate)?;
        let mut ordered: Vec<Version> = Vec::new();
        for version in self.version_list()?.iter() {
            if !calculator.on_route(version.stamp()) {
                continue;
            }
            let mut insert_at = None;
            for (index, existing) in ordered.iter().enumerate() {
                match calculator.relative_position(version.stamp(), existing.stamp()) {
                    RelativePosition::Before => {
                        insert_at.get_or_insert(index);
                    }
                    RelativePosition::After | RelativePosition::Equal => {}
                    other => {
                        return Err(ChronicleError::Unsupported(format!(
                            "{other:?} between stamps {} and {} of {}",
                            version.stamp(),
                            existing.stamp(),
                            self.nid
                        )));
                    }
                }
            }
            ordered.insert(insert_at.unwrap_or(ordered.len()), version.clone());
        }
        Ok(ordered)
    }

    // ----- interchange -----

    /// Portable record of every non-canceled version.
    ///
    /// Versions whose payload still holds the placeholder identifiers of
    /// [`Payload::empty`] have no portable form and are left out.
    pub fn write_external(&self) -> Result<Vec<u8>, ChronicleError> {
        let stamps = self.registries.stamps();
        let mut buffer = DataBuffer::with_capacity(self.config.buffer.initial_capacity, true);
        self.header(0, self.additional_uuids.read().clone())
            .write(&mut buffer, &self.registries)?;
        let mut written = 0usize;
        for version in self.version_list()?.iter() {
            if stamps.is_canceled(version.stamp()) {
                continue;
            }
            if version.payload().is_unset() {
                tracing::warn!(
                    nid = self.nid.0,
                    stamp = version.stamp().0,
                    "skipping version with unset identifiers in interchange"
                );
                continue;
            }
            version.write(&mut buffer, &self.registries)?;
            written += 1;
        }
        buffer.put_terminator();
        tracing::debug!(nid = self.nid.0, versions = written, "chronicle written to interchange");
        Ok(buffer.into_bytes())
    }

    /// Fold in versions and aliases of `other` that this chronicle lacks.
    ///
    /// Absorbed versions get fresh version sequences. Returns how many were
    /// added.
    pub fn absorb(&self, other: &Chronicle) -> Result<usize, ChronicleError> {
        if other.nid != self.nid || other.kind != self.kind {
            return Err(ChronicleError::RecordMismatch(format!(
                "cannot absorb {} ({:?}) into {} ({:?})",
                other.nid, other.kind, self.nid, self.kind
            )));
        }
        for uuid in other.uuid_list() {
            self.add_additional_uuid(uuid);
        }
        let known = self.stamp_sequences()?;
        let mut added = 0;
        for version in other.version_list()?.iter() {
            if known.contains(version.stamp()) {
                continue;
            }
            let sequence = self.claim_version_sequence()?;
            self.add_version(version.clone().with_version_sequence(sequence))?;
            added += 1;
        }
        Ok(added)
    }

    pub fn summary(&self) -> Result<ChronicleSummary, ChronicleError> {
        let stamps = self.registries.stamps();
        let mut versions: Vec<VersionSummary> = self
            .version_list()?
            .iter()
            .map(|version| VersionSummary {
                version_sequence: version.version_sequence(),
                stamp: version.stamp(),
                stamp_description: stamps.describe(version.stamp()),
                payload: version.payload().clone(),
            })
            .collect();
        versions.sort_by_key(|version| version.version_sequence);
        Ok(ChronicleSummary {
            nid: self.nid,
            primordial_uuid: self.primordial_uuid,
            additional_uuids: self.additional_uuids.read().clone(),
            container_sequence: self.container_sequence,
            kind: self.kind,
            write_sequence: self.write_sequence(),
            commit_state: self.commit_state()?,
            versions,
        })
    }
}

fn sequences_exhausted(nid: Nid) -> ChronicleError {
    ChronicleError::IllegalState(format!("version sequences of {nid} are exhausted"))
}

impl PartialEq for Chronicle {
    /// Same nid and same set of stamps, regardless of record order.
    fn eq(&self, other: &Self) -> bool {
        if self.nid != other.nid {
            return false;
        }
        match (self.stamp_sequences(), other.stamp_sequences()) {
            (Ok(mine), Ok(theirs)) => mine == theirs,
            _ => false,
        }
    }
}

impl Hash for Chronicle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nid.hash(state);
    }
}

impl std::fmt::Debug for Chronicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chronicle")
            .field("nid", &self.nid)
            .field("primordial_uuid", &self.primordial_uuid)
            .field("kind", &self.kind)
            .field("write_sequence", &self.write_sequence())
            .finish_non_exhaustive()
    }
}
