//! Index Manager: a persistent vector index over document chunks.
//!
//! In memory the index is an ordered list of `(chunk, vector)` records plus an
//! HNSW graph keyed by record position. On disk it is a directory holding a
//! LanceDB table with the records and `index.manifest.json`, which is written
//! last and stamps the embedder that produced the vectors.
//!
//! Saving goes through a sibling staging directory that is swapped into place,
//! so a crash mid-save leaves the previous index readable.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use docqa_core::{Chunk, Embedder, Error, Result, ScoredChunk, Settings};

mod ann;
pub mod manifest;
pub mod schema;
pub mod table;

use ann::AnnGraph;
pub use manifest::{IndexManifest, FORMAT_VERSION, MANIFEST_FILE};
pub use table::IndexRecord;

/// Lifecycle of the index as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Nothing in memory, nothing on disk.
    Absent,
    /// A saved index exists at the configured path but is not loaded.
    OnDisk,
    /// Loaded or built, with changes not yet saved.
    InMemory,
    /// Loaded and identical to what is on disk.
    Persisted,
}

struct LoadedIndex {
    records: Vec<IndexRecord>,
    graph: AnnGraph,
    /// Bumped on every mutation; lets `save` tell whether it wrote the latest state.
    generation: u64,
    dirty: bool,
}

impl LoadedIndex {
    fn build(records: Vec<IndexRecord>) -> Self {
        let mut graph = AnnGraph::new(records.len());
        for (i, r) in records.iter().enumerate() {
            graph.insert(i, &r.vector);
        }
        Self { records, graph, generation: 0, dirty: true }
    }

    fn extend(&mut self, records: Vec<IndexRecord>) {
        for r in records {
            let id = self.records.len();
            self.graph.insert(id, &r.vector);
            self.records.push(r);
        }
        self.generation += 1;
        self.dirty = true;
    }
}

pub struct IndexManager {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    inner: RwLock<Option<LoadedIndex>>,
    /// Serializes `save` and `load`.
    persist: Mutex<()>,
}

impl IndexManager {
    pub fn new(index_path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            path: index_path.into(),
            embedder,
            inner: RwLock::new(None),
            persist: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &Settings, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(settings.index_path.clone(), embedder)
    }

    pub fn index_path(&self) -> &Path { &self.path }

    pub fn embedder_id(&self) -> &str { self.embedder.embedder_id() }

    /// Build a fresh index from `chunks`, replacing whatever is in memory.
    pub async fn create(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Err(Error::EmptyInput("cannot create an index from zero chunks".into()));
        }
        let records = self.embed_records(chunks).await?;
        let n = records.len();
        let built = tokio::task::spawn_blocking(move || LoadedIndex::build(records))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("index build task failed: {e}")))?;

        let mut guard = self.inner.write().await;
        let generation = guard.as_ref().map(|l| l.generation + 1).unwrap_or(0);
        *guard = Some(LoadedIndex { generation, ..built });
        info!(chunks = n, path = %self.path.display(), "created index");
        Ok(())
    }

    /// Append `chunks` to the in-memory index, creating it when none is loaded.
    /// Returns the number of chunks added.
    ///
    /// Whether to create or extend is decided under the write lock, so
    /// concurrent callers on an absent index all land in the same index.
    pub async fn add(&self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let records = self.embed_records(chunks).await?;
        let n = records.len();
        let mut guard = self.inner.write().await;
        match guard.as_mut() {
            Some(loaded) => {
                loaded.extend(records);
                info!(added = n, total = loaded.records.len(), "added chunks to index");
            }
            None => {
                *guard = Some(LoadedIndex::build(records));
                info!(chunks = n, path = %self.path.display(), "created index");
            }
        }
        Ok(n)
    }

    /// Persist the in-memory index to the configured path.
    pub async fn save(&self) -> Result<()> {
        let _persist = self.persist.lock().await;
        let (records, generation) = {
            let guard = self.inner.read().await;
            let loaded = guard.as_ref().ok_or(Error::NoIndex)?;
            (loaded.records.clone(), loaded.generation)
        };

        let dim = self.embedder.dim();
        let manifest = IndexManifest::new(self.embedder.embedder_id(), dim, records.len());
        let staging = sibling(&self.path, "staging")?;
        blocking_fs({
            let staging = staging.clone();
            move || {
                if staging.exists() {
                    std::fs::remove_dir_all(&staging)?;
                }
                std::fs::create_dir_all(&staging)?;
                Ok(())
            }
        })
        .await?;
        {
            let conn = table::open_db(&staging).await?;
            table::write_records(&conn, &records, dim).await?;
        }
        let target = self.path.clone();
        blocking_fs(move || {
            manifest.write(&staging)?;
            swap_into_place(&staging, &target)
        })
        .await?;

        let mut guard = self.inner.write().await;
        if let Some(loaded) = guard.as_mut() {
            if loaded.generation == generation {
                loaded.dirty = false;
            } else {
                debug!("index changed while saving; keeping it dirty");
            }
        }
        info!(chunks = records.len(), path = %self.path.display(), "saved index");
        Ok(())
    }

    /// Load the saved index, replacing whatever is in memory.
    pub async fn load(&self) -> Result<()> {
        let _persist = self.persist.lock().await;
        if !IndexManifest::exists(&self.path) {
            return Err(Error::CorruptOrMissingIndex(format!(
                "no {MANIFEST_FILE} under {}",
                self.path.display()
            )));
        }
        let manifest = IndexManifest::read(&self.path)?;
        if manifest.embedder_id != self.embedder.embedder_id() {
            return Err(Error::EmbedderMismatch {
                stored: manifest.embedder_id,
                current: self.embedder.embedder_id().to_string(),
            });
        }
        let records = async {
            let conn = table::open_db(&self.path).await?;
            table::read_records(&conn, manifest.chunk_count, manifest.dim).await
        }
        .await
        .map_err(|e| Error::CorruptOrMissingIndex(format!("{}: {e:#}", self.path.display())))?;

        let n = records.len();
        let mut built = tokio::task::spawn_blocking(move || LoadedIndex::build(records))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("index build task failed: {e}")))?;
        built.dirty = false;

        let mut guard = self.inner.write().await;
        built.generation = guard.as_ref().map(|l| l.generation + 1).unwrap_or(0);
        *guard = Some(built);
        info!(chunks = n, embedder = %manifest.embedder_id, "loaded index");
        Ok(())
    }

    /// Top `k` chunks for `query`.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        Ok(self.search_with_scores(query, k).await?.into_iter().map(|s| s.chunk).collect())
    }

    /// Top `k` chunks with their cosine distance (lower is closer).
    pub async fn search_with_scores(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if !self.is_loaded().await {
            return Err(Error::NotInitialized);
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut vectors = self.embed_texts(vec![query.to_string()]).await?;
        let query_vec = vectors.pop().ok_or_else(|| Error::Embedding("no vector for query".into()))?;

        let guard = self.inner.read().await;
        let loaded = guard.as_ref().ok_or(Error::NotInitialized)?;
        let hits = loaded
            .graph
            .search(&query_vec, k)
            .into_iter()
            .filter_map(|(id, distance)| {
                loaded.records.get(id).map(|r| ScoredChunk { chunk: r.chunk.clone(), score: distance })
            })
            .collect::<Vec<_>>();
        debug!(k, hits = hits.len(), "searched index");
        Ok(hits)
    }

    /// In memory, or a manifest exists at the configured path.
    pub async fn is_ready(&self) -> bool {
        self.is_loaded().await || IndexManifest::exists(&self.path)
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.read().await.is_some()
    }

    pub async fn state(&self) -> IndexState {
        match self.inner.read().await.as_ref() {
            Some(loaded) if loaded.dirty => IndexState::InMemory,
            Some(_) => IndexState::Persisted,
            None if IndexManifest::exists(&self.path) => IndexState::OnDisk,
            None => IndexState::Absent,
        }
    }

    /// Number of chunks in memory (0 when not loaded).
    pub async fn len(&self) -> usize {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|l| {
                debug_assert_eq!(l.graph.len(), l.records.len());
                l.records.len()
            })
            .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The saved manifest, if one is present and readable.
    pub fn read_manifest(&self) -> Option<IndexManifest> {
        if !IndexManifest::exists(&self.path) {
            return None;
        }
        match IndexManifest::read(&self.path) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(error = %e, "unreadable index manifest");
                None
            }
        }
    }

    async fn embed_records(&self, chunks: Vec<Chunk>) -> Result<Vec<IndexRecord>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_texts(texts).await?;
        if vectors.len() != chunks.len() {
            return Err(Error::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                chunks.len()
            )));
        }
        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexRecord { chunk, vector })
            .collect())
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embedder = Arc::clone(&self.embedder);
        let dim = embedder.dim();
        let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|e| Error::Embedding(format!("embedding task failed: {e}")))?
            .map_err(|e| Error::Embedding(format!("{e:#}")))?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::Embedding(format!("vector has {} dims, expected {dim}", bad.len())));
        }
        Ok(vectors)
    }
}

/// Run filesystem work off the async workers.
async fn blocking_fs<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("filesystem task failed: {e}")))?
}

/// `<path>.<suffix>` next to `path`.
fn sibling(path: &Path, suffix: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::InvalidConfig(format!("index path {} has no final component", path.display())))?;
    Ok(path.with_file_name(format!("{}.{suffix}", name.to_string_lossy())))
}

fn swap_into_place(staging: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let previous = sibling(target, "previous")?;
    if previous.exists() {
        std::fs::remove_dir_all(&previous)?;
    }
    if target.exists() {
        std::fs::rename(target, &previous)?;
    }
    std::fs::rename(staging, target)?;
    if previous.exists() {
        if let Err(e) = std::fs::remove_dir_all(&previous) {
            warn!(dir = %previous.display(), error = %e, "could not remove previous index");
        }
    }
    Ok(())
}
