/// Embedding capability used at index time and at query time.
///
/// The same `embedder_id` must produce the same vectors; persisted indexes are
/// stamped with it so a model change is detected on load.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `bert:all-MiniLM-L6-v2:d384`).
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}
