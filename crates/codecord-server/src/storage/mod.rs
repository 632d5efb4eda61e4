//! Embedded key-value storage with named buckets
//!
//! Each store is one redb database file holding one or more buckets (redb
//! tables). The file is held exclusively for the lifetime of the process;
//! dropping the store releases it. Values are opaque byte blobs — callers
//! serialize their own entities.
//!
//! The store is the single source of truth for cold data. In-memory state
//! that disagrees with it is reconciled at startup (see
//! `StreamService::reconcile`).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Stream store file and bucket names
pub const STREAM_STORE: &str = "stream.db";
pub const STREAM_BUCKET: &str = "stream";

/// Participant store file and bucket names
pub const PARTICIPANT_STORE: &str = "participant.db";
pub const PARTICIPANT_BUCKET: &str = "participant";

/// Avatar store file and bucket names
pub const AVATAR_STORE: &str = "avatar.db";
pub const AVATAR_BUCKET: &str = "avatar";

/// Errors raised by the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("could not open database: {0}")]
    Open(String),

    #[error("unknown bucket: {0}")]
    UnknownBucket(String),

    #[error("storage transaction failed: {0}")]
    Transaction(String),

    #[error("could not write backup: {0}")]
    Backup(String),
}

/// A process-local embedded store with named buckets
pub struct KeyedStore {
    path: PathBuf,
    database: Arc<Mutex<Database>>,
    buckets: Vec<String>,
    default_bucket: String,
}

impl KeyedStore {
    /// Open (or create) the database at `path` and ensure all buckets exist
    ///
    /// Fails when the file cannot be created or locked, when a bucket cannot
    /// be created, or when `default_bucket` is not among `buckets`.
    pub fn open(
        path: impl Into<PathBuf>,
        buckets: &[&str],
        default_bucket: &str,
    ) -> Result<Self, StorageError> {
        let path = path.into();

        if !buckets.contains(&default_bucket) {
            return Err(StorageError::UnknownBucket(default_bucket.to_owned()));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| StorageError::Open(err.to_string()))?;
        }

        let database =
            Database::create(&path).map_err(|err| StorageError::Open(err.to_string()))?;

        let txn = database
            .begin_write()
            .map_err(|err| StorageError::Transaction(err.to_string()))?;
        for bucket in buckets {
            txn.open_table(TableDefinition::<&str, &[u8]>::new(bucket))
                .map_err(|err| {
                    StorageError::Transaction(format!("could not create `{bucket}` bucket: {err}"))
                })?;
        }
        txn.commit()
            .map_err(|err| StorageError::Transaction(err.to_string()))?;

        debug!(path = %path.display(), ?buckets, "opened keyed store");

        Ok(Self {
            path,
            database: Arc::new(Mutex::new(database)),
            buckets: buckets.iter().map(|b| (*b).to_owned()).collect(),
            default_bucket: default_bucket.to_owned(),
        })
    }

    /// Name of the default bucket
    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    /// Path of the backing database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if self.buckets.iter().any(|b| b == bucket) {
            Ok(())
        } else {
            Err(StorageError::UnknownBucket(bucket.to_owned()))
        }
    }

    /// Store `value` under `key`, overwriting any previous value
    pub async fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.check_bucket(bucket)?;

        let database = self.database.lock().await;
        let txn = database
            .begin_write()
            .map_err(|err| StorageError::Transaction(err.to_string()))?;
        {
            let mut table = txn
                .open_table(TableDefinition::<&str, &[u8]>::new(bucket))
                .map_err(|err| StorageError::Transaction(err.to_string()))?;
            table
                .insert(key, value)
                .map_err(|err| StorageError::Transaction(err.to_string()))?;
        }
        txn.commit()
            .map_err(|err| StorageError::Transaction(err.to_string()))
    }

    /// Load the value under `key`; absence is not an error
    pub async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_bucket(bucket)?;

        let database = self.database.lock().await;
        let txn = database
            .begin_read()
            .map_err(|err| StorageError::Transaction(err.to_string()))?;
        let table = txn
            .open_table(TableDefinition::<&str, &[u8]>::new(bucket))
            .map_err(|err| StorageError::Transaction(err.to_string()))?;

        let value = table
            .get(key)
            .map_err(|err| StorageError::Transaction(err.to_string()))?
            .map(|guard| guard.value().to_vec());

        Ok(value)
    }

    /// Remove the value under `key`; removing an absent key is a no-op
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.check_bucket(bucket)?;

        let database = self.database.lock().await;
        let txn = database
            .begin_write()
            .map_err(|err| StorageError::Transaction(err.to_string()))?;
        {
            let mut table = txn
                .open_table(TableDefinition::<&str, &[u8]>::new(bucket))
                .map_err(|err| StorageError::Transaction(err.to_string()))?;
            table
                .remove(key)
                .map_err(|err| StorageError::Transaction(err.to_string()))?;
        }
        txn.commit()
            .map_err(|err| StorageError::Transaction(err.to_string()))
    }

    /// Snapshot the bucket and return a cursor over its entries
    ///
    /// The cursor is consistent at the moment scanning starts: writes that
    /// land afterwards are not visible through it.
    pub async fn scan(&self, bucket: &str) -> Result<Cursor, StorageError> {
        self.check_bucket(bucket)?;

        let database = self.database.lock().await;
        let txn = database
            .begin_read()
            .map_err(|err| StorageError::Transaction(err.to_string()))?;
        let table = txn
            .open_table(TableDefinition::<&str, &[u8]>::new(bucket))
            .map_err(|err| StorageError::Transaction(err.to_string()))?;

        let mut entries = Vec::new();
        let iter = table
            .iter()
            .map_err(|err| StorageError::Transaction(err.to_string()))?;
        for item in iter {
            let (key, value) = item.map_err(|err| StorageError::Transaction(err.to_string()))?;
            entries.push((key.value().to_owned(), value.value().to_vec()));
        }

        Ok(Cursor::new(entries))
    }

    /// Stream a consistent backup of the bucket into `sink`
    ///
    /// The backup is a fresh single-bucket database file, so the bytes can be
    /// written to disk and opened as a new store.
    pub async fn snapshot(
        &self,
        bucket: &str,
        sink: &mut (dyn Write + Send),
    ) -> Result<(), StorageError> {
        let cursor = self.scan(bucket).await?;

        let dir = tempfile::tempdir().map_err(|err| StorageError::Backup(err.to_string()))?;
        let backup_path = dir.path().join(format!("{bucket}.db"));
        {
            let database = Database::create(&backup_path)
                .map_err(|err| StorageError::Backup(err.to_string()))?;
            let txn = database
                .begin_write()
                .map_err(|err| StorageError::Backup(err.to_string()))?;
            {
                let mut table = txn
                    .open_table(TableDefinition::<&str, &[u8]>::new(bucket))
                    .map_err(|err| StorageError::Backup(err.to_string()))?;
                for (key, value) in cursor.entries() {
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(|err| StorageError::Backup(err.to_string()))?;
                }
            }
            txn.commit()
                .map_err(|err| StorageError::Backup(err.to_string()))?;
        }

        let bytes =
            std::fs::read(&backup_path).map_err(|err| StorageError::Backup(err.to_string()))?;
        sink.write_all(&bytes)
            .map_err(|err| StorageError::Backup(err.to_string()))
    }
}

/// Cursor over a bucket snapshot
///
/// Restartable from `first()`; not random-access.
pub struct Cursor {
    entries: Vec<(String, Vec<u8>)>,
    pos: usize,
}

impl Cursor {
    fn new(entries: Vec<(String, Vec<u8>)>) -> Self {
        Self { entries, pos: 0 }
    }

    /// Rewind to the first entry and return it
    pub fn first(&mut self) -> Option<(&str, &[u8])> {
        self.pos = 0;
        self.next()
    }

    /// Advance to the next entry
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<(&str, &[u8])> {
        let entry = self.entries.get(self.pos)?;
        self.pos += 1;
        Some((entry.0.as_str(), entry.1.as_slice()))
    }

    /// Number of entries in the snapshot
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entries(&self) -> &[(String, Vec<u8>)] {
        &self.entries
    }
}

/// The three persistent stores of the control plane
pub struct Stores {
    pub stream: KeyedStore,
    pub participant: KeyedStore,
    pub avatar: KeyedStore,
}

impl Stores {
    /// Open all stores under `data_folder`, creating it with owner-only
    /// permissions when missing
    pub fn open(data_folder: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_folder).map_err(|err| StorageError::Open(err.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(data_folder, permissions)
                .map_err(|err| StorageError::Open(err.to_string()))?;
        }

        Ok(Self {
            stream: KeyedStore::open(
                data_folder.join(STREAM_STORE),
                &[STREAM_BUCKET],
                STREAM_BUCKET,
            )?,
            participant: KeyedStore::open(
                data_folder.join(PARTICIPANT_STORE),
                &[PARTICIPANT_BUCKET],
                PARTICIPANT_BUCKET,
            )?,
            avatar: KeyedStore::open(
                data_folder.join(AVATAR_STORE),
                &[AVATAR_BUCKET],
                AVATAR_BUCKET,
            )?,
        })
    }

    /// Look up a store by its public name (as used by the backup endpoint)
    pub fn by_name(&self, name: &str) -> Option<&KeyedStore> {
        match name {
            STREAM_BUCKET => Some(&self.stream),
            PARTICIPANT_BUCKET => Some(&self.participant),
            AVATAR_BUCKET => Some(&self.avatar),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = KeyedStore::open(dir.path().join("test.db"), &["data"], "data").unwrap();

        assert!(store.get("data", "k1").await.unwrap().is_none());

        store.put("data", "k1", b"v1").await.unwrap();
        assert_eq!(store.get("data", "k1").await.unwrap().unwrap(), b"v1");

        // overwrite is idempotent
        store.put("data", "k1", b"v2").await.unwrap();
        assert_eq!(store.get("data", "k1").await.unwrap().unwrap(), b"v2");

        store.delete("data", "k1").await.unwrap();
        assert!(store.get("data", "k1").await.unwrap().is_none());

        // deleting an absent key is fine
        store.delete("data", "k1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_bucket() {
        let dir = TempDir::new().unwrap();
        let store = KeyedStore::open(dir.path().join("test.db"), &["data"], "data").unwrap();

        let err = store.put("nope", "k", b"v").await.unwrap_err();
        assert!(matches!(err, StorageError::UnknownBucket(_)));
    }

    #[tokio::test]
    async fn test_scan_is_snapshot_consistent() {
        let dir = TempDir::new().unwrap();
        let store = KeyedStore::open(dir.path().join("test.db"), &["data"], "data").unwrap();

        store.put("data", "a", b"1").await.unwrap();
        store.put("data", "b", b"2").await.unwrap();

        let mut cursor = store.scan("data").await.unwrap();
        store.put("data", "c", b"3").await.unwrap();

        let mut seen = Vec::new();
        while let Some((key, _)) = cursor.next() {
            seen.push(key.to_owned());
        }
        assert_eq!(seen, vec!["a", "b"]);

        // restartable from first()
        assert_eq!(cursor.first().unwrap().0, "a");
    }

    #[tokio::test]
    async fn test_snapshot_opens_as_new_store() {
        let dir = TempDir::new().unwrap();
        let store = KeyedStore::open(dir.path().join("test.db"), &["data"], "data").unwrap();
        store.put("data", "a", b"alpha").await.unwrap();
        store.put("data", "b", b"beta").await.unwrap();

        let mut backup = Vec::new();
        store.snapshot("data", &mut backup).await.unwrap();

        let restored_path = dir.path().join("restored.db");
        std::fs::write(&restored_path, &backup).unwrap();

        let restored = KeyedStore::open(&restored_path, &["data"], "data").unwrap();
        assert_eq!(restored.get("data", "a").await.unwrap().unwrap(), b"alpha");
        assert_eq!(restored.get("data", "b").await.unwrap().unwrap(), b"beta");
    }
}
