//! Domain types shared by the loader, the index and the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Meta = BTreeMap<String, serde_json::Value>;

pub const META_SOURCE: &str = "source";
pub const META_PAGE: &str = "page";
pub const META_START_INDEX: &str = "start_index";

/// A chunk of a source document that is independently embedded and indexed.
///
/// - `text`: the chunk payload, an exact slice of the loader unit it came from
/// - `metadata`: at least `source` and `start_index`; `page` (1-based) for paginated sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: Meta,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: Meta) -> Self {
        Self { text: text.into(), metadata }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).and_then(|v| v.as_str())
    }

    pub fn page(&self) -> Option<u64> {
        self.metadata.get(META_PAGE).and_then(|v| v.as_u64())
    }

    pub fn start_index(&self) -> Option<usize> {
        self.metadata
            .get(META_START_INDEX)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
    }
}

/// A retrieved chunk with the raw relevance value reported by the index.
///
/// `score` is a cosine distance: lower is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One loader-level unit of a source file (a whole text file, or one page of a
/// paginated source) before chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub text: String,
    pub metadata: Meta,
}
