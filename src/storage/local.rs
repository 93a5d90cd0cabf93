use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::storage::traits::DocumentStore;
use crate::{error::RustDwError, types::Document, Result};

const ROW_EXT: &str = ".json";
const TMP_PREFIX: &str = ".tmp-";
/// Longest encoded key used verbatim as a file name; most filesystems cap
/// names at 255 bytes.
const MAX_ENCODED_LEN: usize = 200;
/// Readable prefix kept in front of the digest of an over-long key.
const DIGEST_PREFIX_LEN: usize = 64;

/// On-disk row: the document plus what is needed to order and identify it.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRow {
    key: String,
    seq: u64,
    document: Document,
}

/// Document store with one directory per collection and one file per key.
///
/// Rows are written to a temporary file and renamed into place, so a reader
/// never sees a partial row and concurrent writers (threads or processes)
/// resolve to last-write-wins per key.
pub struct LocalStore {
    root: PathBuf,
    last_seq: AtomicU64,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            last_seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.path.clone())
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RustDwError::Storage(format!(
                "invalid collection name: {collection:?}"
            )));
        }
        Ok(self.root.join(collection))
    }

    fn row_path(dir: &Path, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(RustDwError::Storage("empty document key".to_string()));
        }
        Ok(dir.join(format!("{}{}", file_stem(key), ROW_EXT)))
    }

    /// Monotonic within this process; wall-clock based across processes.
    fn next_seq(&self) -> u64 {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .map(|n| n.max(0) as u64)
            .unwrap_or(0);
        let previous = self
            .last_seq
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    async fn read_row(path: &Path) -> Result<Option<StoredRow>> {
        match fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn row_paths(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(paths),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(ROW_EXT) && !name.starts_with(TMP_PREFIX) {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn upsert(&self, collection: &str, key: &str, document: Document) -> Result<()> {
        let dir = self.collection_dir(collection)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            RustDwError::Storage(format!("cannot create {}: {e}", dir.display()))
        })?;
        let path = Self::row_path(&dir, key)?;

        let seq = match Self::read_row(&path).await {
            Ok(Some(existing)) => existing.seq,
            Ok(None) => self.next_seq(),
            Err(e) => {
                warn!(collection, key, error = %e, "Replacing unreadable row");
                self.next_seq()
            }
        };

        let row = StoredRow {
            key: key.to_string(),
            seq,
            document,
        };
        let tmp_path = dir.join(format!("{TMP_PREFIX}{}", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&serde_json::to_vec(&row)?).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let dir = self.collection_dir(collection)?;
        let path = Self::row_path(&dir, key)?;
        Ok(Self::read_row(&path).await?.map(|row| row.document))
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Document>> {
        let dir = self.collection_dir(collection)?;
        let mut rows = Vec::new();
        for path in Self::row_paths(&dir).await? {
            // a concurrent writer may have replaced the file between list and read
            if let Some(row) = Self::read_row(&path).await? {
                rows.push(row);
            }
        }
        rows.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.key.cmp(&b.key)));
        Ok(rows.into_iter().map(|row| row.document).collect())
    }

    async fn append(&self, collection: &str, document: Document) -> Result<String> {
        let key = format!("{:020}-{}", self.next_seq(), Uuid::new_v4().simple());
        self.upsert(collection, &key, document).await?;
        Ok(key)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let dir = self.collection_dir(collection)?;
        Ok(Self::row_paths(&dir).await?.len())
    }
}

/// File name stem for a key. Keys whose encoding would not fit a file name
/// become a readable prefix plus `~` and a UUID v5 digest of the full key;
/// `encode_key` never emits `~`, so the two shapes cannot collide.
fn file_stem(key: &str) -> String {
    let encoded = encode_key(key);
    if encoded.len() <= MAX_ENCODED_LEN {
        return encoded;
    }
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes());
    format!("{}~{}", &encoded[..DIGEST_PREFIX_LEN], digest.simple())
}

/// Map a key onto a file name injectively: `[A-Za-z0-9_-]` pass through,
/// every other byte becomes `%XX`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
