use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Could not parse document {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Nothing to index: {0}")]
    EmptyInput(String),

    #[error("No index to save")]
    NoIndex,

    #[error("Vector index not initialized")]
    NotInitialized,

    #[error("Vector index not found or corrupted: {0}")]
    CorruptOrMissingIndex(String),

    #[error("Index was built with embedder '{stored}' but the current embedder is '{current}'")]
    EmbedderMismatch { stored: String, current: String },

    #[error("No documents indexed yet. Please upload documents first.")]
    NotIndexed,

    #[error("API key not configured for {0}")]
    MissingCredential(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Precondition violations the caller can fix (bad input, nothing indexed yet).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::UnsupportedType(_)
                | Error::EmptyInput(_)
                | Error::NoIndex
                | Error::NotInitialized
                | Error::NotIndexed
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
