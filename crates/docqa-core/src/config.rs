//! Settings loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`,
//! the conventional `OPENAI_API_KEY` variable and `APP_*` overrides.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Process-wide configuration, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub generation_timeout_secs: u64,
    pub embedding_model: String,
    pub model_dir: Option<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_documents: usize,
    pub retrieval_k: usize,
    pub index_path: PathBuf,
    pub documents_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            model_name: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            generation_timeout_secs: 60,
            embedding_model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            model_dir: None,
            chunk_size: 1000,
            chunk_overlap: 200,
            max_documents: 50,
            retrieval_k: 4,
            index_path: PathBuf::from("./data/index"),
            documents_path: PathBuf::from("./data/documents"),
        }
    }
}

impl Settings {
    /// Defaults < `config.toml` < `config.<env>.toml` < `OPENAI_API_KEY` < `APP_*`.
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::from_figment(Self::figment_for_env(&env_name))
    }

    pub fn figment_for_env(env_name: &str) -> Figment {
        let mut figment =
            Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment
            .merge(Env::raw().only(&["openai_api_key"]))
            .merge(Env::prefixed("APP_"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut settings: Settings = figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.index_path = expand_path(settings.index_path.to_string_lossy());
        settings.documents_path = expand_path(settings.documents_path.to_string_lossy());
        settings.model_dir = settings.model_dir.map(|p| expand_path(p.to_string_lossy()));
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be greater than 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.retrieval_k == 0 {
            return Err(Error::InvalidConfig("retrieval_k must be greater than 0".into()));
        }
        if self.max_documents == 0 {
            return Err(Error::InvalidConfig("max_documents must be greater than 0".into()));
        }
        if self.generation_timeout_secs == 0 {
            return Err(Error::InvalidConfig("generation_timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }

    /// The API key, treating an empty value as unset.
    pub fn api_key(&self) -> Option<&str> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
