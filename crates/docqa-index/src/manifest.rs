use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use docqa_core::{Error, Result};

pub const MANIFEST_FILE: &str = "index.manifest.json";
pub const FORMAT_VERSION: u32 = 1;

/// Written last on save; its presence marks a complete index directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedder_id: String,
    pub dim: usize,
    pub chunk_count: usize,
    pub saved_at: DateTime<Utc>,
}

impl IndexManifest {
    pub fn new(embedder_id: &str, dim: usize, chunk_count: usize) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            embedder_id: embedder_id.to_string(),
            dim,
            chunk_count,
            saved_at: Utc::now(),
        }
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::CorruptOrMissingIndex(format!("{}: {e}", path.display())))?;
        let manifest: IndexManifest = serde_json::from_str(&raw)
            .map_err(|e| Error::CorruptOrMissingIndex(format!("{}: {e}", path.display())))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(Error::CorruptOrMissingIndex(format!(
                "unsupported index format version {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).map_err(anyhow::Error::from)?;
        fs::write(dir.join(MANIFEST_FILE), raw)?;
        Ok(())
    }
}
