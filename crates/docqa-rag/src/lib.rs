//! Retrieval-augmented question answering over the document index.
//!
//! `RagEngine` answers one question at a time; `RagService` is the lifecycle
//! object an application holds on to.
pub mod engine;
pub mod generator;
pub mod service;

pub use engine::{
    build_prompt, AnswerResponse, RagEngine, RagOptions, SourceDocument, NO_RELEVANT_DOCUMENTS,
    PROMPT_TEMPLATE,
};
pub use generator::{parse_http_error, GenerationError, Generator, LlmSettings, OpenAiGenerator};
pub use service::{RagService, RetrieveResponse, StatusResponse, UploadReport, STATUS_EMPTY, STATUS_READY};
