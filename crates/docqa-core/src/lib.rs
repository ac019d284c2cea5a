//! docqa-core
//!
//! Shared building blocks for the document QA workspace: the chunk data model,
//! the error taxonomy, settings, the embedding trait, the text splitter and
//! the document loader.
pub mod chunker;
pub mod config;
pub mod error;
pub mod loader;
pub mod traits;
pub mod types;

pub use chunker::TextSplitter;
pub use config::Settings;
pub use error::{Error, Result};
pub use loader::{BatchReport, DocumentLoader, FileOutcome};
pub use traits::Embedder;
pub use types::{Chunk, Meta, PageText, ScoredChunk};
