//! Document loading: source files to page-level text units, then chunks.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::chunker::TextSplitter;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::types::{Chunk, Meta, PageText, META_PAGE, META_SOURCE};

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// Page separator emitted by `pdf-extract`; also honored in plain text files.
const PAGE_BREAK: char = '\x0c';

/// Result of one file inside a batch: the number of chunks or the error message.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: std::result::Result<usize, String>,
}

/// Serialized with the chunk count in place of the chunks themselves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    #[serde(rename = "chunks_created", serialize_with = "serialize_count")]
    pub chunks: Vec<Chunk>,
    pub outcomes: Vec<FileOutcome>,
}

fn serialize_count<S: Serializer>(chunks: &[Chunk], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    chunks.len().serialize(serializer)
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentLoader {
    splitter: TextSplitter,
}

impl DocumentLoader {
    pub fn new(splitter: TextSplitter) -> Self { Self { splitter } }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(TextSplitter::new(settings.chunk_size, settings.chunk_overlap)?))
    }

    pub fn splitter(&self) -> &TextSplitter { &self.splitter }

    /// Parse a source file into ordered text units. Paginated sources yield one
    /// unit per non-empty page, each tagged with its 1-based `page`.
    pub fn load(&self, path: &Path) -> Result<Vec<PageText>> {
        if !path.exists() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let source = path.to_string_lossy().to_string();
        match extension(path).as_deref() {
            Some("pdf") => {
                let text = extract_pdf_text(path)?;
                Ok(paginate(&text, &source))
            }
            Some("txt") | Some("md") => {
                let text = read_file_content(path)?;
                if text.contains(PAGE_BREAK) {
                    Ok(paginate(&text, &source))
                } else {
                    let mut metadata = Meta::new();
                    metadata.insert(META_SOURCE.to_string(), source.into());
                    Ok(vec![PageText { text, metadata }])
                }
            }
            Some(other) => Err(Error::UnsupportedType(format!(".{other}"))),
            None => Err(Error::UnsupportedType(path.display().to_string())),
        }
    }

    pub fn load_and_chunk(&self, path: &Path) -> Result<Vec<Chunk>> {
        let units = self.load(path)?;
        let chunks = self.splitter.split_units(&units);
        debug!(path = %path.display(), units = units.len(), chunks = chunks.len(), "chunked document");
        Ok(chunks)
    }

    pub fn batch_process_directory(&self, dir: &Path) -> BatchReport {
        self.batch_process_directory_limited(dir, usize::MAX)
    }

    /// Load every supported file directly inside `dir` (sorted by name, at most
    /// `limit` files). A failing file is recorded in the report and skipped.
    pub fn batch_process_directory_limited(&self, dir: &Path, limit: usize) -> BatchReport {
        let mut report = BatchReport::default();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "batch directory does not exist");
            return report;
        }
        let mut files = list_supported_files(dir);
        if files.len() > limit {
            files.truncate(limit);
            info!(limit, "limited batch to first files");
        }
        for (file_index, file_path) in files.iter().enumerate() {
            debug!(file = %file_path.display(), n = file_index + 1, total = files.len(), "processing file");
            match self.load_and_chunk(file_path) {
                Ok(chunks) => {
                    report.outcomes.push(FileOutcome { path: file_path.clone(), result: Ok(chunks.len()) });
                    report.chunks.extend(chunks);
                }
                Err(e) => {
                    warn!(file = %file_path.display(), error = %e, "skipping file");
                    report.outcomes.push(FileOutcome { path: file_path.clone(), result: Err(e.to_string()) });
                }
            }
        }
        info!(
            files = files.len(),
            failed = report.failures().count(),
            chunks = report.chunks.len(),
            "processed directory"
        );
        report
    }
}

pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase)
}

fn list_supported_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn read_file_content(file_path: &Path) -> Result<String> {
    match fs::read_to_string(file_path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
    }
}

fn extract_pdf_text(path: &Path) -> Result<String> {
    // pdf-extract panics on some malformed inputs instead of returning an error.
    let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text(path));
    match extracted {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(Error::Parse { path: path.display().to_string(), message: e.to_string() }),
        Err(_) => Err(Error::Parse {
            path: path.display().to_string(),
            message: "PDF extractor panicked on malformed input".to_string(),
        }),
    }
}

fn paginate(text: &str, source: &str) -> Vec<PageText> {
    text.split(PAGE_BREAK)
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| {
            let mut metadata = Meta::new();
            metadata.insert(META_SOURCE.to_string(), source.into());
            metadata.insert(META_PAGE.to_string(), (i + 1).into());
            PageText { text: page.to_string(), metadata }
        })
        .collect()
}
