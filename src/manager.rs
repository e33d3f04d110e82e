//! Index lifecycle: load a persisted index, build one from the corpus, or
//! rebuild it.
//!
//! The manager is the single owner of the current [`VectorIndex`]. It is
//! constructed once in `main` and shared (`Arc`) with the query service and
//! the conversation; there is no global instance.
//!
//! The current index sits behind `RwLock<Option<Arc<VectorIndex>>>`. Readers
//! clone the `Arc` and release the lock immediately, so a query keeps using
//! the index it started with even if a rebuild swaps in a new one meanwhile.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::config::{Config, LoaderConfig};
use crate::embedding::Embedder;
use crate::error::{AssistantError, Result};
use crate::index::VectorIndex;
use crate::loader;
use crate::models::Document;
use crate::progress::{BuildProgressEvent, BuildProgressReporter, NoProgress};
use crate::stats::IndexStats;
use crate::store::IndexStore;

pub struct IndexManager {
    config: Config,
    embedder: Arc<dyn Embedder>,
    store: Box<dyn IndexStore>,
    progress: Box<dyn BuildProgressReporter>,
    current: RwLock<Option<Arc<VectorIndex>>>,
}

impl IndexManager {
    pub fn new(config: Config, embedder: Arc<dyn Embedder>, store: Box<dyn IndexStore>) -> Self {
        Self {
            config,
            embedder,
            store,
            progress: Box::new(NoProgress),
            current: RwLock::new(None),
        }
    }

    /// Report build progress to `progress` instead of discarding it.
    pub fn with_progress(mut self, progress: Box<dyn BuildProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// The loaded index.
    pub fn current(&self) -> Result<Arc<VectorIndex>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| AssistantError::state("no index is loaded; load or build one first"))
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_ok()
    }

    /// Return the loaded index, loading the persisted one if it exists or
    /// building (and persisting) a new one from the document directory.
    ///
    /// When persisted state exists the document directory is not read.
    pub async fn load_or_create(&self) -> Result<Arc<VectorIndex>> {
        if let Ok(index) = self.current() {
            return Ok(index);
        }

        let index = if self.store.exists() {
            info!(path = %self.store.location().display(), "loading persisted index");
            let index = self.store.load().await?;
            if index.embedding_model() != self.embedder.model_name() {
                warn!(
                    persisted = index.embedding_model(),
                    configured = self.embedder.model_name(),
                    "persisted index was built with a different embedding model; rebuild it"
                );
            }
            index
        } else {
            info!(path = %self.store.location().display(), "no persisted index, building");
            let index = self.build_from_corpus().await?;
            self.persist(&index).await?;
            index
        };

        Ok(self.install(index))
    }

    /// Build a fresh index from the document directory and replace the
    /// current one.
    ///
    /// The new index is fully built and persisted before anything is
    /// replaced. On failure the previous index stays loaded and on disk.
    pub async fn rebuild(&self) -> Result<Arc<VectorIndex>> {
        info!("rebuilding index");
        let index = self.build_from_corpus().await?;
        self.persist(&index).await?;
        Ok(self.install(index))
    }

    pub fn stats(&self) -> IndexStats {
        let current = self.current().ok();
        let snapshot_bytes = std::fs::read_dir(self.store.location())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .filter(|m| m.is_file())
                    .map(|m| m.len())
                    .sum()
            })
            .ok();

        IndexStats {
            loaded: current.is_some(),
            document_count: current.as_ref().map(|i| i.document_count()),
            chunk_count: current.as_ref().map(|i| i.chunk_count()),
            embedding_model: current.as_ref().map(|i| i.embedding_model().to_string()),
            dims: current.as_ref().map(|i| i.dims()),
            created_at: current.as_ref().map(|i| i.created_at()),
            data_dir: self.config.paths.data_dir.clone(),
            persist_dir: self.store.location().to_path_buf(),
            persisted: self.store.exists(),
            snapshot_bytes,
        }
    }

    async fn build_from_corpus(&self) -> Result<VectorIndex> {
        let data_dir = self.config.paths.data_dir.clone();
        loader::ensure_corpus_dir(&data_dir)?;
        self.progress.report(BuildProgressEvent::Loading {
            data_dir: data_dir.display().to_string(),
        });

        let documents =
            load_documents_blocking(data_dir.clone(), self.config.loader.clone()).await?;
        if documents.is_empty() {
            return Err(AssistantError::configuration(format!(
                "no loadable documents in '{}'",
                data_dir.display()
            )));
        }
        info!(documents = documents.len(), data_dir = %data_dir.display(), "loaded documents");

        VectorIndex::build(
            &documents,
            &self.config.chunking,
            self.embedder.as_ref(),
            self.config.embedding.batch_size,
            self.progress.as_ref(),
        )
        .await
    }

    async fn persist(&self, index: &VectorIndex) -> Result<()> {
        self.progress.report(BuildProgressEvent::Persisting {
            path: self.store.location().display().to_string(),
        });
        self.store.persist(index).await
    }

    fn install(&self, index: VectorIndex) -> Arc<VectorIndex> {
        let index = Arc::new(index);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&index));
        index
    }
}

/// PDF extraction is CPU-bound, so the walk runs on the blocking pool.
async fn load_documents_blocking(data_dir: PathBuf, config: LoaderConfig) -> Result<Vec<Document>> {
    let shown = data_dir.display().to_string();
    tokio::task::spawn_blocking(move || loader::load_documents(&data_dir, &config))
        .await
        .map_err(|e| AssistantError::configuration(format!("document loading aborted: {}", e)))?
        .map_err(|e| {
            AssistantError::configuration(format!(
                "cannot read documents from '{}': {:#}",
                shown, e
            ))
        })
}
