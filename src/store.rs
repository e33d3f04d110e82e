//! Index persistence.
//!
//! [`IndexStore`] is the seam between the index manager and disk. The
//! SQLite implementation keeps one snapshot per persist directory:
//!
//! ```text
//! storage/
//! └── index.sqlite    meta, documents, chunks (+ embedding BLOBs)
//! ```
//!
//! Writing never modifies a live snapshot. A new snapshot is written to a
//! sibling staging directory, then swapped in with two renames:
//!
//! ```text
//! .storage.staging  ──write──▶  complete snapshot
//! storage           ──rename─▶  .storage.old
//! .storage.staging  ──rename─▶  storage
//! .storage.old      ──remove─▶
//! ```
//!
//! If anything fails before the second rename, the previous snapshot is
//! left (or put back) in place.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{AssistantError, Result};
use crate::index::{IndexedChunk, IndexedDocument, VectorIndex};
use crate::migrate::{create_schema, SCHEMA_VERSION};
use crate::models::Chunk;

pub const SNAPSHOT_FILE_NAME: &str = "index.sqlite";

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Where snapshots live.
    fn location(&self) -> &Path;

    /// Whether persisted state exists. Decides load versus build.
    fn exists(&self) -> bool;

    async fn load(&self) -> Result<VectorIndex>;

    /// Replace any persisted state with `index`.
    async fn persist(&self, index: &VectorIndex) -> Result<()>;
}

pub struct SqliteIndexStore {
    persist_dir: PathBuf,
}

impl SqliteIndexStore {
    pub fn new(persist_dir: impl Into<PathBuf>) -> Self {
        Self {
            persist_dir: persist_dir.into(),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.persist_dir.join(SNAPSHOT_FILE_NAME)
    }

    fn sibling(&self, suffix: &str) -> anyhow::Result<PathBuf> {
        let name = self
            .persist_dir
            .file_name()
            .ok_or_else(|| anyhow!("persist dir '{}' has no name", self.persist_dir.display()))?;
        Ok(self
            .persist_dir
            .with_file_name(format!(".{}.{}", name.to_string_lossy(), suffix)))
    }

    async fn write_snapshot(&self, dir: &Path, index: &VectorIndex) -> anyhow::Result<()> {
        let pool = db::connect(&dir.join(SNAPSHOT_FILE_NAME), true).await?;
        let result = write_tables(&pool, index).await;
        pool.close().await;
        result
    }

    fn swap_in(&self, staging: &Path) -> anyhow::Result<()> {
        let old = self.sibling("old")?;
        remove_dir_if_exists(&old)?;

        let had_previous = self.persist_dir.exists();
        if had_previous {
            std::fs::rename(&self.persist_dir, &old).with_context(|| {
                format!("moving {} aside", self.persist_dir.display())
            })?;
        }

        if let Err(e) = std::fs::rename(staging, &self.persist_dir) {
            if had_previous {
                if let Err(restore) = std::fs::rename(&old, &self.persist_dir) {
                    warn!(error = %restore, "could not restore previous index snapshot");
                }
            }
            return Err(e).with_context(|| {
                format!("moving new snapshot to {}", self.persist_dir.display())
            });
        }

        if had_previous {
            if let Err(e) = std::fs::remove_dir_all(&old) {
                warn!(path = %old.display(), error = %e, "could not remove previous snapshot");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    fn location(&self) -> &Path {
        &self.persist_dir
    }

    fn exists(&self) -> bool {
        self.persist_dir.exists()
    }

    async fn load(&self) -> Result<VectorIndex> {
        let path = self.snapshot_path();
        if !path.is_file() {
            return Err(AssistantError::persistence(anyhow!(
                "no index snapshot at {}",
                path.display()
            )));
        }

        let pool = db::connect(&path, false)
            .await
            .with_context(|| format!("opening {}", path.display()))
            .map_err(AssistantError::persistence)?;
        let result = read_tables(&pool).await;
        pool.close().await;

        let (model, created_at, documents, chunks) = result
            .with_context(|| format!("reading {}", path.display()))
            .map_err(AssistantError::persistence)?;
        let index = VectorIndex::from_parts(model, created_at, documents, chunks)?;
        info!(
            path = %path.display(),
            documents = index.document_count(),
            chunks = index.chunk_count(),
            "loaded index snapshot"
        );
        Ok(index)
    }

    async fn persist(&self, index: &VectorIndex) -> Result<()> {
        let staging = self.sibling("staging").map_err(AssistantError::persistence)?;
        remove_dir_if_exists(&staging).map_err(AssistantError::persistence)?;
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("creating {}", staging.display()))
            .map_err(AssistantError::persistence)?;

        let written = self.write_snapshot(&staging, index).await;
        if let Err(e) = written {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(AssistantError::persistence(e));
        }

        self.swap_in(&staging).map_err(|e| {
            let _ = std::fs::remove_dir_all(&staging);
            AssistantError::persistence(e)
        })?;
        info!(path = %self.persist_dir.display(), "persisted index snapshot");
        Ok(())
    }
}

fn remove_dir_if_exists(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        debug!(path = %path.display(), "removing leftover directory");
        std::fs::remove_dir_all(path).with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(())
}

async fn write_tables(pool: &SqlitePool, index: &VectorIndex) -> anyhow::Result<()> {
    create_schema(pool).await?;
    let mut tx = pool.begin().await?;

    let meta = [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("embedding_model", index.embedding_model().to_string()),
        ("dims", index.dims().to_string()),
        ("created_at", index.created_at().to_rfc3339()),
    ];
    for (key, value) in meta {
        sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for (position, doc) in index.documents().iter().enumerate() {
        sqlx::query("INSERT INTO documents (id, position, metadata_json) VALUES (?, ?, ?)")
            .bind(&doc.id)
            .bind(position as i64)
            .bind(serde_json::to_string(&doc.metadata)?)
            .execute(&mut *tx)
            .await?;
    }

    for (position, entry) in index.chunks().iter().enumerate() {
        let chunk = &entry.chunk;
        sqlx::query(
            r#"
            INSERT INTO chunks (id, position, document_id, chunk_index, text, hash, metadata_json, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(position as i64)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(serde_json::to_string(&chunk.metadata)?)
        .bind(vec_to_blob(&entry.vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

type Snapshot = (
    String,
    DateTime<Utc>,
    Vec<IndexedDocument>,
    Vec<IndexedChunk>,
);

async fn read_tables(pool: &SqlitePool) -> anyhow::Result<Snapshot> {
    let meta: BTreeMap<String, String> = sqlx::query("SELECT key, value FROM meta")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| -> std::result::Result<(String, String), sqlx::Error> {
            Ok((row.try_get("key")?, row.try_get("value")?))
        })
        .collect::<std::result::Result<_, sqlx::Error>>()?;

    let version = meta.get("schema_version").map(String::as_str);
    if version != Some(SCHEMA_VERSION) {
        bail!(
            "unsupported snapshot version {:?}, expected {}",
            version,
            SCHEMA_VERSION
        );
    }
    let model = meta
        .get("embedding_model")
        .cloned()
        .ok_or_else(|| anyhow!("snapshot has no embedding model"))?;
    let created_at = meta
        .get("created_at")
        .map(String::as_str)
        .map(DateTime::parse_from_rfc3339)
        .transpose()?
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("snapshot has no creation time"))?;

    let documents = sqlx::query("SELECT id, metadata_json FROM documents ORDER BY position ASC")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| -> anyhow::Result<IndexedDocument> {
            let metadata_json: String = row.try_get("metadata_json")?;
            Ok(IndexedDocument {
                id: row.try_get("id")?,
                metadata: serde_json::from_str(&metadata_json)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let chunks = sqlx::query(
        "SELECT id, document_id, chunk_index, text, hash, metadata_json, embedding FROM chunks ORDER BY position ASC",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| -> anyhow::Result<IndexedChunk> {
        let metadata_json: String = row.try_get("metadata_json")?;
        let blob: Vec<u8> = row.try_get("embedding")?;
        Ok(IndexedChunk {
            chunk: Chunk {
                id: row.try_get("id")?,
                document_id: row.try_get("document_id")?,
                chunk_index: row.try_get("chunk_index")?,
                text: row.try_get("text")?,
                hash: row.try_get("hash")?,
                metadata: serde_json::from_str(&metadata_json)?,
            },
            vector: blob_to_vec(&blob),
        })
    })
    .collect::<anyhow::Result<Vec<_>>>()?;

    if documents.is_empty() || chunks.is_empty() {
        bail!("snapshot is empty");
    }
    Ok((model, created_at, documents, chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_index(text: &str) -> VectorIndex {
        let mut metadata = BTreeMap::new();
        metadata.insert("file_name".to_string(), "paper.pdf".to_string());
        metadata.insert("page_label".to_string(), "2".to_string());
        let documents = vec![IndexedDocument {
            id: "doc".to_string(),
            metadata: metadata.clone(),
        }];
        let chunks = vec![IndexedChunk {
            chunk: Chunk {
                id: "c0".to_string(),
                document_id: "doc".to_string(),
                chunk_index: 0,
                text: text.to_string(),
                hash: "h".to_string(),
                metadata,
            },
            vector: vec![0.25, -1.0, 3.5],
        }];
        VectorIndex::from_parts("test-model".to_string(), Utc::now(), documents, chunks).unwrap()
    }

    #[tokio::test]
    async fn persist_then_load_restores_index() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteIndexStore::new(tmp.path().join("storage"));
        assert!(!store.exists());

        let index = sample_index("Stroop interference");
        store.persist(&index).await.unwrap();
        assert!(store.exists());
        assert!(store.snapshot_path().is_file());

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.embedding_model(), "test-model");
        assert_eq!(loaded.documents(), index.documents());
        assert_eq!(loaded.chunks(), index.chunks());
        assert_eq!(
            loaded.created_at().timestamp(),
            index.created_at().timestamp()
        );
    }

    #[tokio::test]
    async fn persist_replaces_previous_snapshot_without_leftovers() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteIndexStore::new(tmp.path().join("storage"));
        store.persist(&sample_index("first")).await.unwrap();
        store.persist(&sample_index("second")).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.chunks()[0].chunk.text, "second");

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["storage".to_string()]);
    }

    #[tokio::test]
    async fn directory_without_snapshot_is_persistence_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("storage");
        std::fs::create_dir_all(&dir).unwrap();
        let store = SqliteIndexStore::new(&dir);
        assert!(store.exists());
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, AssistantError::Persistence(_)));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_persistence_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("storage");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SNAPSHOT_FILE_NAME), b"definitely not sqlite").unwrap();
        let err = SqliteIndexStore::new(&dir).load().await.unwrap_err();
        assert!(matches!(err, AssistantError::Persistence(_)));
    }
}
