//! Record storage contract for the optimistic write protocol.
//!
//! Stored records carry their write sequence at a fixed offset. A write
//! succeeds only if the stored record still has the write sequence the
//! writer read; otherwise the writer merges and tries again.

use crate::error::ChronicleError;
use crate::record::record_write_sequence;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use termstore_kernel::Nid;

/// Result of a compare-and-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The stored write sequence no longer matches the expected one.
    Conflict,
}

/// Byte-record store keyed by nid.
pub trait RecordStorage: Send + Sync {
    fn read(&self, nid: Nid) -> Result<Option<Vec<u8>>, ChronicleError>;

    /// Store `record` if the current record's write sequence equals
    /// `expected`, where `None` means no record is stored yet.
    fn compare_and_write(
        &self,
        nid: Nid,
        expected: Option<i32>,
        record: Vec<u8>,
    ) -> Result<WriteOutcome, ChronicleError>;
}

/// Record storage held in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryRecordStorage {
    records: DashMap<Nid, Vec<u8>>,
}

impl MemoryRecordStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn nids(&self) -> Vec<Nid> {
        let mut nids: Vec<Nid> = self.records.iter().map(|entry| *entry.key()).collect();
        nids.sort();
        nids
    }
}

impl RecordStorage for MemoryRecordStorage {
    fn read(&self, nid: Nid) -> Result<Option<Vec<u8>>, ChronicleError> {
        Ok(self.records.get(&nid).map(|entry| entry.value().clone()))
    }

    fn compare_and_write(
        &self,
        nid: Nid,
        expected: Option<i32>,
        record: Vec<u8>,
    ) -> Result<WriteOutcome, ChronicleError> {
        match self.records.entry(nid) {
            Entry::Occupied(mut entry) => {
                let current = record_write_sequence(entry.get())?;
                if expected != Some(current) {
                    return Ok(WriteOutcome::Conflict);
                }
                entry.insert(record);
            }
            Entry::Vacant(entry) => {
                if expected.is_some() {
                    return Ok(WriteOutcome::Conflict);
                }
                entry.insert(record);
            }
        }
        tracing::trace!(nid = nid.0, "record stored");
        Ok(WriteOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(write_sequence: i32) -> Vec<u8> {
        let mut bytes = vec![termstore_codec::FORMAT_VERSION, 1];
        bytes.extend_from_slice(&write_sequence.to_be_bytes());
        bytes
    }

    #[test]
    fn first_write_expects_no_record() {
        let storage = MemoryRecordStorage::new();
        assert_eq!(
            storage
                .compare_and_write(Nid(1), Some(1), record(2))
                .expect("write"),
            WriteOutcome::Conflict
        );
        assert_eq!(
            storage
                .compare_and_write(Nid(1), None, record(1))
                .expect("write"),
            WriteOutcome::Written
        );
        assert_eq!(storage.read(Nid(1)).expect("read"), Some(record(1)));
    }

    #[test]
    fn stale_expectation_conflicts() {
        let storage = MemoryRecordStorage::new();
        storage
            .compare_and_write(Nid(1), None, record(1))
            .expect("seed");
        storage
            .compare_and_write(Nid(1), Some(1), record(2))
            .expect("advance");

        let outcome = storage
            .compare_and_write(Nid(1), Some(1), record(2))
            .expect("stale write");
        assert_eq!(outcome, WriteOutcome::Conflict);
        assert_eq!(storage.nids(), vec![Nid(1)]);
    }
}
