//! Change detection ledger.
//!
//! One [`FileIndexRecord`] per (collection, file) remembers what was last
//! indexed. The [`ChangeTracker`] compares the current file against it and
//! classifies the difference; the configured [`ChangePolicy`] decides which
//! classifications require re-indexing.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::BoxFuture;
use crate::chunker::Chunk;
use crate::error::{IndexError, Result};

/// What was last indexed for one file in one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndexRecord {
    pub file_path: String,
    pub collection: String,
    /// SHA-256 hex digest of the raw file bytes.
    pub content_hash: String,
    /// Modification time in unix milliseconds.
    pub mtime: i64,
    pub chunk_count: usize,
    /// Chunk id to BLAKE3 content hash for every chunk stored for the file.
    pub chunks: BTreeMap<String, String>,
    pub indexed_at: DateTime<Utc>,
}

/// Aggregate counts over the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub files: usize,
    pub chunks: usize,
    pub collections: Vec<String>,
}

/// Durable storage for [`FileIndexRecord`]s.
pub trait LedgerStore: Send + Sync {
    fn get(
        &self,
        collection: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<Option<FileIndexRecord>>>;

    fn upsert(&self, record: FileIndexRecord) -> BoxFuture<'_, Result<()>>;

    /// Returns whether a record existed.
    fn remove(&self, collection: &str, file_path: &str) -> BoxFuture<'_, Result<bool>>;

    fn list(&self, collection: &str) -> BoxFuture<'_, Result<Vec<FileIndexRecord>>>;

    /// Drop every record of a collection, returning how many were removed.
    fn clear(&self, collection: &str) -> BoxFuture<'_, Result<usize>>;

    fn summary(&self) -> BoxFuture<'_, Result<LedgerSummary>>;
}

/// Process-local ledger for tests and single-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<(String, String), FileIndexRecord>>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> IndexError {
    IndexError::Other("ledger lock poisoned".into())
}

impl LedgerStore for InMemoryLedger {
    fn get(
        &self,
        collection: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<Option<FileIndexRecord>>> {
        let key = (collection.to_owned(), file_path.to_owned());
        Box::pin(async move {
            let records = self.records.read().map_err(poisoned)?;
            Ok(records.get(&key).cloned())
        })
    }

    fn upsert(&self, record: FileIndexRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut records = self.records.write().map_err(poisoned)?;
            records.insert(
                (record.collection.clone(), record.file_path.clone()),
                record,
            );
            Ok(())
        })
    }

    fn remove(&self, collection: &str, file_path: &str) -> BoxFuture<'_, Result<bool>> {
        let key = (collection.to_owned(), file_path.to_owned());
        Box::pin(async move {
            let mut records = self.records.write().map_err(poisoned)?;
            Ok(records.remove(&key).is_some())
        })
    }

    fn list(&self, collection: &str) -> BoxFuture<'_, Result<Vec<FileIndexRecord>>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let records = self.records.read().map_err(poisoned)?;
            let mut out: Vec<_> = records
                .values()
                .filter(|r| r.collection == collection)
                .cloned()
                .collect();
            out.sort_by(|a, b| a.file_path.cmp(&b.file_path));
            Ok(out)
        })
    }

    fn clear(&self, collection: &str) -> BoxFuture<'_, Result<usize>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut records = self.records.write().map_err(poisoned)?;
            let before = records.len();
            records.retain(|(c, _), _| *c != collection);
            Ok(before - records.len())
        })
    }

    fn summary(&self) -> BoxFuture<'_, Result<LedgerSummary>> {
        Box::pin(async move {
            let records = self.records.read().map_err(poisoned)?;
            let mut collections: Vec<String> =
                records.keys().map(|(c, _)| c.clone()).collect();
            collections.sort();
            collections.dedup();
            Ok(LedgerSummary {
                files: records.len(),
                chunks: records.values().map(|r| r.chunk_count).sum(),
                collections,
            })
        })
    }
}

/// Which differences between a file and its record require re-indexing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangePolicy {
    /// Equal content hashes mean unchanged, whatever the mtime says.
    #[default]
    ContentHash,
    /// A newer mtime alone is enough to re-index.
    MtimeOrHash,
}

impl std::str::FromStr for ChangePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "content-hash" => Ok(Self::ContentHash),
            "mtime-or-hash" => Ok(Self::MtimeOrHash),
            other => Err(format!("unknown change policy: {other}")),
        }
    }
}

/// Why a file was or was not classified as changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    /// No record exists.
    New,
    /// The record belongs to a different collection.
    CollectionMismatch,
    /// Same content hash, newer mtime.
    Touched,
    /// Content hash differs.
    Modified,
    Unchanged,
}

impl ChangePolicy {
    #[must_use]
    pub fn requires_reindex(self, status: ChangeStatus) -> bool {
        match status {
            ChangeStatus::New | ChangeStatus::CollectionMismatch | ChangeStatus::Modified => true,
            ChangeStatus::Touched => self == Self::MtimeOrHash,
            ChangeStatus::Unchanged => false,
        }
    }
}

/// Compare a file's current state against its record.
#[must_use]
pub fn classify(
    record: Option<&FileIndexRecord>,
    collection: &str,
    content_hash: &str,
    mtime: i64,
) -> ChangeStatus {
    let Some(record) = record else {
        return ChangeStatus::New;
    };
    if record.collection != collection {
        return ChangeStatus::CollectionMismatch;
    }
    if record.content_hash != content_hash {
        return ChangeStatus::Modified;
    }
    if mtime > record.mtime {
        return ChangeStatus::Touched;
    }
    ChangeStatus::Unchanged
}

/// SHA-256 hex digest of raw bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// File modification time in unix milliseconds, 0 when unavailable.
#[must_use]
pub fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

/// Ledger access with a change policy applied.
#[derive(Clone)]
pub struct ChangeTracker {
    ledger: Arc<dyn LedgerStore>,
    policy: ChangePolicy,
}

impl ChangeTracker {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerStore>, policy: ChangePolicy) -> Self {
        Self { ledger, policy }
    }

    #[must_use]
    pub fn policy(&self) -> ChangePolicy {
        self.policy
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Classify already-read file content against the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub async fn check(
        &self,
        collection: &str,
        file_path: &str,
        content_hash: &str,
        mtime: i64,
    ) -> Result<(ChangeStatus, Option<FileIndexRecord>)> {
        let record = self.ledger.get(collection, file_path).await?;
        let status = classify(record.as_ref(), collection, content_hash, mtime);
        Ok((status, record))
    }

    /// Read `abs_path` and decide whether `file_path` needs re-indexing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or the ledger cannot be read.
    pub async fn is_changed(
        &self,
        collection: &str,
        file_path: &str,
        abs_path: &Path,
    ) -> Result<bool> {
        let bytes = tokio::fs::read(abs_path).await?;
        let metadata = tokio::fs::metadata(abs_path).await?;
        let (status, _) = self
            .check(collection, file_path, &sha256_hex(&bytes), mtime_millis(&metadata))
            .await?;
        Ok(self.policy.requires_reindex(status))
    }

    /// Store the record for a successfully indexed file.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger write fails.
    pub async fn record(
        &self,
        collection: &str,
        file_path: &str,
        content_hash: String,
        mtime: i64,
        chunks: &[Chunk],
    ) -> Result<FileIndexRecord> {
        let hashes = chunks
            .iter()
            .map(|c| (c.id.clone(), c.content_hash()))
            .collect();
        self.record_hashes(collection, file_path, content_hash, mtime, hashes)
            .await
    }

    /// Like [`ChangeTracker::record`], from a precomputed chunk id to hash map.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger write fails.
    pub async fn record_hashes(
        &self,
        collection: &str,
        file_path: &str,
        content_hash: String,
        mtime: i64,
        chunks: BTreeMap<String, String>,
    ) -> Result<FileIndexRecord> {
        let record = FileIndexRecord {
            file_path: file_path.to_owned(),
            collection: collection.to_owned(),
            content_hash,
            mtime,
            chunk_count: chunks.len(),
            chunks,
            indexed_at: Utc::now(),
        };
        self.ledger.upsert(record.clone()).await?;
        Ok(record)
    }

    /// Remove the record of a deleted file, returning it if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be accessed.
    pub async fn forget(
        &self,
        collection: &str,
        file_path: &str,
    ) -> Result<Option<FileIndexRecord>> {
        let record = self.ledger.get(collection, file_path).await?;
        if record.is_some() {
            self.ledger.remove(collection, file_path).await?;
        }
        Ok(record)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(collection: &str, file_path: &str, hash: &str, mtime: i64) -> FileIndexRecord {
    FileIndexRecord {
        file_path: file_path.to_owned(),
        collection: collection.to_owned(),
        content_hash: hash.to_owned(),
        mtime,
        chunk_count: 1,
        chunks: BTreeMap::from([(format!("{file_path}:lines:0:1-1"), "h".to_owned())]),
        indexed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkerConfig, chunk_file};

    #[test]
    fn classify_new_and_mismatch() {
        assert_eq!(classify(None, "c", "h", 1), ChangeStatus::New);
        let rec = sample_record("other", "a.py", "h", 1);
        assert_eq!(
            classify(Some(&rec), "c", "h", 1),
            ChangeStatus::CollectionMismatch
        );
    }

    #[test]
    fn touched_file_per_policy() {
        let rec = sample_record("c", "a.py", "h", 100);
        let status = classify(Some(&rec), "c", "h", 200);
        assert_eq!(status, ChangeStatus::Touched);
        assert!(!ChangePolicy::ContentHash.requires_reindex(status));
        assert!(ChangePolicy::MtimeOrHash.requires_reindex(status));
    }

    #[test]
    fn modified_file_always_changed() {
        let rec = sample_record("c", "a.py", "h1", 200);
        let status = classify(Some(&rec), "c", "h2", 100);
        assert_eq!(status, ChangeStatus::Modified);
        assert!(ChangePolicy::ContentHash.requires_reindex(status));
        assert!(ChangePolicy::MtimeOrHash.requires_reindex(status));
    }

    #[test]
    fn unchanged_file() {
        let rec = sample_record("c", "a.py", "h", 200);
        let status = classify(Some(&rec), "c", "h", 200);
        assert_eq!(status, ChangeStatus::Unchanged);
        assert!(!ChangePolicy::MtimeOrHash.requires_reindex(status));
    }

    #[test]
    fn policy_parse() {
        assert_eq!(
            "mtime-or-hash".parse::<ChangePolicy>(),
            Ok(ChangePolicy::MtimeOrHash)
        );
        assert!("sometimes".parse::<ChangePolicy>().is_err());
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn in_memory_ledger_crud() {
        let ledger = InMemoryLedger::new();
        ledger.upsert(sample_record("c1", "a.py", "h", 1)).await.unwrap();
        ledger.upsert(sample_record("c1", "b.py", "h", 1)).await.unwrap();
        ledger.upsert(sample_record("c2", "a.py", "h", 1)).await.unwrap();

        assert!(ledger.get("c1", "a.py").await.unwrap().is_some());
        assert!(ledger.get("c1", "zzz.py").await.unwrap().is_none());
        assert_eq!(ledger.list("c1").await.unwrap().len(), 2);

        let summary = ledger.summary().await.unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.collections, vec!["c1", "c2"]);

        assert!(ledger.remove("c1", "a.py").await.unwrap());
        assert!(!ledger.remove("c1", "a.py").await.unwrap());
        assert_eq!(ledger.clear("c2").await.unwrap(), 1);
        assert_eq!(ledger.summary().await.unwrap().files, 1);
    }

    #[tokio::test]
    async fn tracker_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "def foo():\n    return 1\n").unwrap();

        let tracker = ChangeTracker::new(Arc::new(InMemoryLedger::new()), ChangePolicy::ContentHash);
        assert!(tracker.is_changed("c", "a.py", &path).await.unwrap());

        let bytes = std::fs::read(&path).unwrap();
        let mtime = mtime_millis(&std::fs::metadata(&path).unwrap());
        let chunks = chunk_file("a.py", "def foo():\n    return 1\n", &ChunkerConfig::default());
        let rec = tracker
            .record("c", "a.py", sha256_hex(&bytes), mtime, &chunks)
            .await
            .unwrap();
        assert_eq!(rec.chunk_count, 1);
        assert!(rec.chunks.contains_key("a.py:function:foo:1-2"));
        assert!(!tracker.is_changed("c", "a.py", &path).await.unwrap());

        std::fs::write(&path, "def bar():\n    return 2\n").unwrap();
        assert!(tracker.is_changed("c", "a.py", &path).await.unwrap());

        assert!(tracker.forget("c", "a.py").await.unwrap().is_some());
        assert!(tracker.forget("c", "a.py").await.unwrap().is_none());
    }
}
