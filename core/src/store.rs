//! Durable document store: the authority for document content and ids.

use crate::error::{StoreError, StoreResult};
use crate::index::DocId;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;

const NEXT_ID_KEY: &[u8] = b"next_id";

pub type ScanIter<'a> = Box<dyn Iterator<Item = StoreResult<(DocId, String)>> + 'a>;

pub trait DocumentStore: Send + Sync {
    /// Persist `content` under a freshly assigned id and return that id.
    fn insert(&self, content: &str) -> StoreResult<DocId>;

    /// Every record, ordered by id ascending. One-shot and finite.
    fn scan_all(&self) -> ScanIter<'_>;

    fn get(&self, id: DocId) -> StoreResult<Option<String>>;

    fn count(&self) -> usize;
}

pub struct SledStore {
    db: sled::Db,
    documents: sled::Tree,
    counters: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::from_db(db)
    }

    /// A throwaway store that is deleted on drop.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        let documents = db.open_tree("documents").map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let counters = db.open_tree("counters").map_err(|e| StoreError::Unavailable(e.to_string()))?;
        tracing::info!(documents = documents.len(), "opened document store");
        Ok(Self { db, documents, counters })
    }
}

fn decode_id(raw: &[u8]) -> StoreResult<DocId> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StoreError::Read(format!("malformed key of {} bytes", raw.len())))?;
    Ok(DocId::from_be_bytes(bytes))
}

impl DocumentStore for SledStore {
    fn insert(&self, content: &str) -> StoreResult<DocId> {
        let id = (&self.documents, &self.counters)
            .transaction(|(documents, counters)| {
                let id = match counters.get(NEXT_ID_KEY)? {
                    Some(raw) => decode_id(&raw).map_err(ConflictableTransactionError::Abort)?,
                    None => 1,
                };
                documents.insert(&id.to_be_bytes()[..], content.as_bytes())?;
                counters.insert(NEXT_ID_KEY, &(id + 1).to_be_bytes()[..])?;
                Ok(id)
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StoreError::Write(e.to_string()),
            })?;
        self.db.flush().map_err(|e| StoreError::Write(e.to_string()))?;
        tracing::debug!(id, "stored document");
        Ok(id)
    }

    fn scan_all(&self) -> ScanIter<'_> {
        Box::new(self.documents.iter().map(|entry| {
            let (key, value) = entry.map_err(|e| StoreError::Read(e.to_string()))?;
            let id = decode_id(&key)?;
            let content = String::from_utf8(value.to_vec())
                .map_err(|e| StoreError::Read(format!("document {id} is not utf-8: {e}")))?;
            Ok((id, content))
        }))
    }

    fn get(&self, id: DocId) -> StoreResult<Option<String>> {
        let raw = self.documents.get(id.to_be_bytes()).map_err(|e| StoreError::Read(e.to_string()))?;
        raw.map(|raw| String::from_utf8(raw.to_vec()).map_err(|e| StoreError::Read(e.to_string())))
            .transpose()
    }

    fn count(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ids_start_at_one_and_increase() {
        let store = SledStore::temporary().unwrap();
        assert_eq!(store.insert("first").unwrap(), 1);
        assert_eq!(store.insert("second").unwrap(), 2);
        assert_eq!(store.get(2).unwrap().as_deref(), Some("second"));
        assert_eq!(store.get(9).unwrap(), None);
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn scan_is_ordered_by_id() {
        let store = SledStore::temporary().unwrap();
        for i in 0..300 {
            store.insert(&format!("doc {i}")).unwrap();
        }
        let ids: Vec<DocId> = store.scan_all().map(|r| r.unwrap().0).collect();
        assert_eq!(ids, (1..=300).collect::<Vec<_>>());
    }

    #[test]
    fn ids_are_not_reused_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.insert("a").unwrap();
            store.insert("b").unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.insert("c").unwrap(), 3);
        let all: Vec<(DocId, String)> = store.scan_all().collect::<Result<_, _>>().unwrap();
        assert_eq!(all, vec![(1, "a".into()), (2, "b".into()), (3, "c".into())]);
    }

    #[test]
    fn concurrent_inserts_get_distinct_ids() {
        let store = std::sync::Arc::new(SledStore::temporary().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || (0..25).map(|_| store.insert("x").unwrap()).collect::<Vec<_>>())
            })
            .collect();
        let mut ids: Vec<DocId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        ids.sort();
        assert_eq!(ids, (1..=100).collect::<Vec<_>>());
    }
}
