//! Concurrent chronicle store keyed by nid.
//!
//! The store is the single place a chronicle is created for a nid:
//! `get_or_create` is an atomic insert-if-absent on a sharded map, so
//! concurrent first writers share one chronicle and one overlay.

use crate::chronicle::{Chronicle, LatestVersion};
use crate::config::StoreConfig;
use crate::error::ChronicleError;
use crate::interchange::{read_interchange, write_interchange};
use crate::record::ChronicleKind;
use crate::storage::RecordStorage;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::Path;
use std::sync::Arc;
use termstore_kernel::{CalculatorCache, Nid, Registries, StampCoordinate};
use uuid::Uuid;

pub struct ChronicleStore {
    chronicles: DashMap<Nid, Arc<Chronicle>>,
    calculators: CalculatorCache,
    registries: Registries,
    config: StoreConfig,
}

impl ChronicleStore {
    pub fn new(registries: Registries, config: StoreConfig) -> Self {
        Self {
            chronicles: DashMap::new(),
            calculators: CalculatorCache::new(registries.clone()),
            registries,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn get(&self, nid: Nid) -> Option<Arc<Chronicle>> {
        self.chronicles.get(&nid).map(|entry| Arc::clone(entry.value()))
    }

    /// The chronicle for `uuid`, created empty if absent.
    ///
    /// Fails if an existing chronicle for the uuid has a different kind.
    pub fn get_or_create(
        &self,
        uuid: Uuid,
        kind: ChronicleKind,
    ) -> Result<Arc<Chronicle>, ChronicleError> {
        let nid = self.registries.identifiers().nid_for_uuids(&[uuid]);
        let chronicle = match self.chronicles.entry(nid) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                tracing::debug!(nid = nid.0, %uuid, "chronicle created");
                let created = Arc::new(Chronicle::new(
                    uuid,
                    kind,
                    self.registries.clone(),
                    self.config,
                ));
                Arc::clone(entry.insert(created).value())
            }
        };
        if chronicle.kind() != kind {
            return Err(ChronicleError::RecordMismatch(format!(
                "{uuid} is a {:?} chronicle, not {kind:?}",
                chronicle.kind()
            )));
        }
        Ok(chronicle)
    }

    /// Install an internal record. An existing chronicle merges it into its
    /// written record, so versions it already holds are kept and its write
    /// sequence never moves backwards.
    pub fn load(&self, bytes: Vec<u8>) -> Result<Arc<Chronicle>, ChronicleError> {
        let loaded = Chronicle::load(bytes, self.registries.clone(), self.config)?;
        match self.chronicles.entry(loaded.nid()) {
            Entry::Occupied(entry) => {
                let existing = Arc::clone(entry.get());
                drop(entry);
                if let Some(record) = loaded.written() {
                    let write_sequence = existing.write_sequence().max(record.write_sequence());
                    existing.merge_and_publish(write_sequence, record.bytes())?;
                    tracing::debug!(nid = existing.nid().0, write_sequence, "record merged on load");
                }
                Ok(existing)
            }
            Entry::Vacant(entry) => Ok(Arc::clone(entry.insert(Arc::new(loaded)).value())),
        }
    }

    /// Install an interchange record, folding it into an existing chronicle
    /// for the same component.
    pub fn import_external(&self, bytes: &[u8]) -> Result<Arc<Chronicle>, ChronicleError> {
        let imported = Chronicle::read_external(bytes, self.registries.clone(), self.config)?;
        match self.chronicles.entry(imported.nid()) {
            Entry::Occupied(entry) => {
                let existing = Arc::clone(entry.get());
                drop(entry);
                let added = existing.absorb(&imported)?;
                tracing::debug!(nid = existing.nid().0, added, "interchange record absorbed");
                Ok(existing)
            }
            Entry::Vacant(entry) => Ok(Arc::clone(entry.insert(Arc::new(imported)).value())),
        }
    }

    /// Latest version of `nid` under `coordinate`, sharing calculators
    /// across calls.
    pub fn latest_version(
        &self,
        nid: Nid,
        coordinate: &StampCoordinate,
    ) -> Result<Option<LatestVersion>, ChronicleError> {
        let Some(chronicle) = self.get(nid) else {
            return Ok(None);
        };
        let calculator = self.calculators.calculator(coordinate)?;
        chronicle.latest_version_with(&calculator)
    }

    /// Forget cached calculators after the path graph changed.
    pub fn invalidate_paths(&self) {
        self.calculators.invalidate();
    }

    /// Drop every materialized version list. Returns how many were held.
    pub fn evict_version_lists(&self) -> usize {
        let evicted = self
            .chronicles
            .iter()
            .filter(|entry| entry.value().evict_version_list())
            .count();
        tracing::debug!(evicted, "version lists evicted");
        evicted
    }

    /// Persist every chronicle through `storage`.
    pub fn write_all(&self, storage: &dyn RecordStorage) -> Result<usize, ChronicleError> {
        let chronicles = self.snapshot();
        for chronicle in &chronicles {
            chronicle.write_to(storage)?;
        }
        Ok(chronicles.len())
    }

    /// Write every chronicle to an interchange file, ordered by nid.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<usize, ChronicleError> {
        let records = self
            .snapshot()
            .iter()
            .map(|chronicle| chronicle.write_external())
            .collect::<Result<Vec<_>, _>>()?;
        write_interchange(path, &records)?;
        Ok(records.len())
    }

    /// Import every record of an interchange file.
    pub fn import(&self, path: impl AsRef<Path>) -> Result<usize, ChronicleError> {
        let records = read_interchange(path)?;
        for record in &records {
            self.import_external(record)?;
        }
        Ok(records.len())
    }

    /// Chronicles ordered by nid.
    pub fn snapshot(&self) -> Vec<Arc<Chronicle>> {
        let mut chronicles: Vec<Arc<Chronicle>> = self
            .chronicles
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        chronicles.sort_by_key(|chronicle| chronicle.nid());
        chronicles
    }

    pub fn len(&self) -> usize {
        self.chronicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chronicles.is_empty()
    }
}

impl std::fmt::Debug for ChronicleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChronicleStore")
            .field("chronicles", &self.chronicles.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
