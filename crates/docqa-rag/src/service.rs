//! Service lifecycle: owns the index and a lazily built engine and exposes
//! the upload / ask / retrieve / status operations.
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use docqa_core::loader::is_supported;
use docqa_core::{BatchReport, Chunk, DocumentLoader, Embedder, Error, Result, Settings};
use docqa_index::IndexManager;

use crate::engine::{ensure_loaded, AnswerResponse, RagEngine, RagOptions, SourceDocument};
use crate::generator::{Generator, LlmSettings, OpenAiGenerator};

pub const STATUS_READY: &str = "System ready for queries";
pub const STATUS_EMPTY: &str = "No documents indexed yet";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReport {
    pub filename: String,
    pub chunks_created: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub question: String,
    pub documents: Vec<SourceDocument>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub initialized: bool,
    pub documents_indexed: usize,
    pub message: String,
}

pub struct RagService {
    settings: Settings,
    loader: DocumentLoader,
    index: Arc<IndexManager>,
    engine: Mutex<Option<Arc<RagEngine>>>,
    generator: Option<Arc<dyn Generator>>,
    /// Held across load, add and save so uploads never interleave.
    ingest: Mutex<()>,
}

impl RagService {
    pub fn new(settings: Settings, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let loader = DocumentLoader::from_settings(&settings)?;
        let index = Arc::new(IndexManager::from_settings(&settings, embedder));
        Ok(Self {
            settings,
            loader,
            index,
            engine: Mutex::new(None),
            generator: None,
            ingest: Mutex::new(()),
        })
    }

    /// Service with the embedder chosen by `docqa_embed::get_default_embedder`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let embedder = docqa_embed::get_default_embedder(&settings)?;
        Self::new(settings, embedder)
    }

    /// Use `generator` instead of the OpenAI client built from the settings.
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn index(&self) -> &Arc<IndexManager> { &self.index }

    /// Prepare directories and, when an index is saved and a credential is
    /// available, load it and build the engine. Failures only degrade the service.
    pub async fn startup(&self) {
        for dir in [&self.settings.documents_path, &self.settings.index_path] {
            if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(dir = %parent.display(), error = %e, "could not create data directory");
                }
            }
        }
        if let Err(e) = std::fs::create_dir_all(&self.settings.documents_path) {
            warn!(dir = %self.settings.documents_path.display(), error = %e, "could not create documents directory");
        }

        if !self.index.is_ready().await {
            info!("no index on disk yet");
            return;
        }
        if self.generator.is_none() && self.settings.api_key().is_none() {
            warn!("index found but no API key configured; questions will fail until one is set");
            return;
        }
        match self.ensure_initialized().await {
            Ok(_) => info!(chunks = self.index.len().await, "service ready"),
            Err(e) => warn!(error = %e, "startup initialization failed"),
        }
    }

    /// The engine, built on first use. Concurrent callers share one build.
    pub async fn ensure_initialized(&self) -> Result<Arc<RagEngine>> {
        let mut slot = self.engine.lock().await;
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }
        if !self.index.is_ready().await {
            return Err(Error::NotIndexed);
        }
        let generator = self.make_generator()?;
        ensure_loaded(&self.index).await?;
        let engine = Arc::new(RagEngine::new(
            Arc::clone(&self.index),
            generator,
            RagOptions::from_settings(&self.settings),
        ));
        *slot = Some(Arc::clone(&engine));
        debug!("engine initialized");
        Ok(engine)
    }

    /// Store an uploaded file under `documents_path`, index it and save.
    pub async fn upload_document(&self, bytes: &[u8], filename: &str) -> Result<UploadReport> {
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::UnsupportedType(filename.to_string()))?;
        if !is_supported(Path::new(&name)) {
            let ext = Path::new(&name)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or(name.clone());
            return Err(Error::UnsupportedType(ext));
        }

        std::fs::create_dir_all(&self.settings.documents_path)?;
        let dest = self.settings.documents_path.join(&name);
        std::fs::write(&dest, bytes)?;
        info!(file = %dest.display(), bytes = bytes.len(), "stored upload");

        let chunks = self.loader.load_and_chunk(&dest)?;
        if chunks.is_empty() {
            return Err(Error::EmptyInput("Document contains no text".into()));
        }
        let chunks_created = chunks.len();
        self.add_and_save(chunks).await?;
        Ok(UploadReport {
            message: format!("Document '{name}' uploaded and indexed successfully"),
            filename: name,
            chunks_created,
        })
    }

    /// Index one file already on disk.
    pub async fn ingest_path(&self, path: &Path) -> Result<UploadReport> {
        let chunks = self.loader.load_and_chunk(path)?;
        if chunks.is_empty() {
            return Err(Error::EmptyInput("Document contains no text".into()));
        }
        let chunks_created = chunks.len();
        self.add_and_save(chunks).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(UploadReport {
            message: format!("Document '{filename}' indexed successfully"),
            filename,
            chunks_created,
        })
    }

    /// Index every supported file in `dir` (up to `max_documents`). Files that
    /// fail are reported, not fatal.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<BatchReport> {
        let report = self.loader.batch_process_directory_limited(dir, self.settings.max_documents);
        if !report.chunks.is_empty() {
            self.add_and_save(report.chunks.clone()).await?;
        }
        Ok(report)
    }

    pub async fn ask(&self, question: &str) -> Result<AnswerResponse> {
        let engine = self.ensure_initialized().await?;
        engine.answer(question).await
    }

    /// Retrieval only; works without an API key.
    pub async fn retrieve(&self, question: &str, k: Option<usize>) -> Result<RetrieveResponse> {
        ensure_loaded(&self.index).await?;
        let k = k.unwrap_or(self.settings.retrieval_k);
        let documents: Vec<SourceDocument> = self
            .index
            .search_with_scores(question, k)
            .await?
            .into_iter()
            .map(SourceDocument::from)
            .collect();
        Ok(RetrieveResponse { question: question.to_string(), count: documents.len(), documents })
    }

    pub async fn status(&self) -> StatusResponse {
        let initialized = self.index.is_ready().await;
        if initialized && self.engine.lock().await.is_none() {
            if let Err(e) = self.ensure_initialized().await {
                debug!(error = %e, "engine not available yet");
            }
        }
        let documents_indexed = if self.index.is_loaded().await {
            self.index.len().await
        } else {
            self.index.read_manifest().map(|m| m.chunk_count).unwrap_or(0)
        };
        StatusResponse {
            initialized,
            documents_indexed,
            message: if initialized { STATUS_READY } else { STATUS_EMPTY }.to_string(),
        }
    }

    fn make_generator(&self) -> Result<Arc<dyn Generator>> {
        if let Some(g) = &self.generator {
            return Ok(Arc::clone(g));
        }
        Ok(Arc::new(OpenAiGenerator::new(LlmSettings::from_settings(&self.settings))?))
    }

    async fn add_and_save(&self, chunks: Vec<Chunk>) -> Result<()> {
        let _ingest = self.ingest.lock().await;
        if !self.index.is_loaded().await && self.index.is_ready().await {
            match self.index.load().await {
                Ok(()) => {}
                Err(Error::CorruptOrMissingIndex(detail)) => {
                    warn!(%detail, "saved index is unreadable; it will be replaced");
                }
                Err(e) => return Err(e),
            }
        }
        let added = self.index.add(chunks).await?;
        self.index.save().await?;
        // rebuilt lazily on the next question
        *self.engine.lock().await = None;
        let total = self.index.len().await;
        info!(added, total, "index updated");
        Ok(())
    }
}
