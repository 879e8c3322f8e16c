//! Persistence of relation records.
//!
//! Records are written as a CBOR envelope:
//!
//! ```text
//! { magic: "GSRL", format_version: 1, records: [ {a_id, a_version, b_id, b_version}, ... ] }
//! ```
//!
//! A blob that cannot be decoded is treated as "no known relations"; the
//! next successful save replaces it.

use crate::error::{SyncError, SyncResult};
use crate::relation::RelationRecord;
use gensync_storage::StateStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default name of the relations file.
pub const RELATIONS_FILE_NAME: &str = "relations.cbor";

/// Magic bytes at the start of every envelope.
pub const RELATIONS_MAGIC: [u8; 4] = *b"GSRL";

/// Current envelope format version.
pub const RELATIONS_FORMAT_VERSION: u16 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    magic: [u8; 4],
    format_version: u16,
    records: &'a [T],
}

#[derive(Deserialize)]
struct Envelope<T> {
    magic: [u8; 4],
    format_version: u16,
    records: Vec<T>,
}

/// Encodes relation records into an envelope.
pub fn encode_relations<AI, AV, BI, BV>(
    records: &[RelationRecord<AI, AV, BI, BV>],
) -> SyncResult<Vec<u8>>
where
    AI: Serialize,
    AV: Serialize,
    BI: Serialize,
    BV: Serialize,
{
    let envelope = EnvelopeRef {
        magic: RELATIONS_MAGIC,
        format_version: RELATIONS_FORMAT_VERSION,
        records,
    };
    let mut buf = Vec::new();
    ciborium::into_writer(&envelope, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes relation records from an envelope.
///
/// # Errors
///
/// Fails on malformed CBOR, a wrong magic or an unknown format version.
pub fn decode_relations<AI, AV, BI, BV>(
    bytes: &[u8],
) -> SyncResult<Vec<RelationRecord<AI, AV, BI, BV>>>
where
    AI: DeserializeOwned,
    AV: DeserializeOwned,
    BI: DeserializeOwned,
    BV: DeserializeOwned,
{
    let envelope: Envelope<RelationRecord<AI, AV, BI, BV>> =
        ciborium::from_reader(bytes).map_err(|e| SyncError::Codec(e.to_string()))?;

    if envelope.magic != RELATIONS_MAGIC {
        return Err(SyncError::Codec("not a relations file".into()));
    }
    if envelope.format_version != RELATIONS_FORMAT_VERSION {
        return Err(SyncError::Codec(format!(
            "unsupported format version {}",
            envelope.format_version
        )));
    }
    Ok(envelope.records)
}

/// Loads and saves the relation records of one profile.
#[derive(Clone)]
pub struct RelationStore {
    store: Arc<dyn StateStore>,
}

impl RelationStore {
    /// Creates a relation store on top of a state store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Loads the persisted records.
    ///
    /// Returns `None` if nothing was saved yet or the saved blob is
    /// unreadable. I/O failures are returned as errors.
    pub fn load<AI, AV, BI, BV>(&self) -> SyncResult<Option<Vec<RelationRecord<AI, AV, BI, BV>>>>
    where
        AI: DeserializeOwned,
        AV: DeserializeOwned,
        BI: DeserializeOwned,
        BV: DeserializeOwned,
    {
        let Some(bytes) = self.store.load()? else {
            return Ok(None);
        };
        match decode_relations(&bytes) {
            Ok(records) => {
                debug!(records = records.len(), "relations loaded");
                Ok(Some(records))
            }
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "relations unreadable, starting without known relations");
                Ok(None)
            }
        }
    }

    /// Replaces the persisted records.
    pub fn save<AI, AV, BI, BV>(&self, records: &[RelationRecord<AI, AV, BI, BV>]) -> SyncResult<()>
    where
        AI: Serialize,
        AV: Serialize,
        BI: Serialize,
        BV: Serialize,
    {
        let bytes = encode_relations(records)?;
        self.store.save(&bytes)?;
        debug!(records = records.len(), "relations saved");
        Ok(())
    }
}

impl std::fmt::Debug for RelationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gensync_storage::{FileStore, InMemoryStore};
    use tempfile::tempdir;

    type Record = RelationRecord<u32, u64, String, String>;

    fn records() -> Vec<Record> {
        vec![
            RelationRecord::new(1, 10, "one".into(), "\"e1\"".into()),
            RelationRecord::new(2, 20, "two".into(), "\"e2\"".into()),
        ]
    }

    #[test]
    fn save_then_load() {
        let store = RelationStore::new(Arc::new(InMemoryStore::new()));
        store.save(&records()).unwrap();

        let loaded: Vec<Record> = store.load().unwrap().unwrap();
        assert_eq!(loaded, records());
    }

    #[test]
    fn missing_blob_loads_as_none() {
        let store = RelationStore::new(Arc::new(InMemoryStore::new()));
        let loaded: Option<Vec<Record>> = store.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn garbage_loads_as_none() {
        let backend = Arc::new(InMemoryStore::with_data(b"definitely not cbor \xff\xfe".to_vec()));
        let store = RelationStore::new(backend);
        let loaded: Option<Vec<Record>> = store.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let envelope = EnvelopeRef {
            magic: *b"XXXX",
            format_version: RELATIONS_FORMAT_VERSION,
            records: &records(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&envelope, &mut bytes).unwrap();

        assert!(matches!(
            decode_relations::<u32, u64, String, String>(&bytes),
            Err(SyncError::Codec(_))
        ));
    }

    #[test]
    fn future_format_version_is_rejected() {
        let envelope = EnvelopeRef {
            magic: RELATIONS_MAGIC,
            format_version: RELATIONS_FORMAT_VERSION + 1,
            records: &records(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&envelope, &mut bytes).unwrap();

        let err = decode_relations::<u32, u64, String, String>(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported format version"));
    }

    #[test]
    fn failed_save_keeps_previous_records() {
        let backend = Arc::new(InMemoryStore::new());
        let store = RelationStore::new(backend.clone());
        store.save(&records()).unwrap();

        backend.fail_next_save();
        let result = store.save::<u32, u64, String, String>(&[]);
        assert!(matches!(result, Err(SyncError::Storage(_))));

        let loaded: Vec<Record> = store.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn file_backed_round_trip() {
        let dir = tempdir().unwrap();
        let backend = FileStore::in_dir(dir.path(), Some("work"), RELATIONS_FILE_NAME);
        let path = backend.path().to_path_buf();
        let store = RelationStore::new(Arc::new(backend));

        store.save(&records()).unwrap();
        assert!(path.ends_with("work_relations.cbor"));

        let reopened = RelationStore::new(Arc::new(FileStore::new(path)));
        let loaded: Vec<Record> = reopened.load().unwrap().unwrap();
        assert_eq!(loaded, records());
    }
}
