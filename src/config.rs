use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Default embedding model for suggestions. Must match the dimension the
/// vector index was created with.
const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
/// Default similarity threshold for suggestion matches
const DEFAULT_SUGGESTION_THRESHOLD: f32 = 0.35;
const DEFAULT_SUGGESTION_TOP_K: usize = 3;
/// Quiet period before a live query triggers a lookup
const DEFAULT_DEBOUNCE_MS: u64 = 400;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_GENERATIVE_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GENERATIVE_MODEL: &str = "gemini-2.0-flash";

const DEFAULT_INDEX_NAME: &str = "askdoc-questions";
const DEFAULT_INGEST_BATCH_SIZE: usize = 50;
const DEFAULT_CORPUS_PATH: &str = "questions.txt";

/// Configuration for the suggestion embedding + lookup path
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuggestionConfig {
    /// Embedding model name (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension produced by `model`
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Minimum similarity score [0.0, 1.0] for a match to surface
    #[serde(default = "default_suggestion_threshold")]
    pub threshold: f32,

    /// Maximum number of suggestions returned per query
    #[serde(default = "default_suggestion_top_k")]
    pub top_k: usize,

    /// Debounce quiet period in milliseconds for live input
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            threshold: DEFAULT_SUGGESTION_THRESHOLD,
            top_k: DEFAULT_SUGGESTION_TOP_K,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// Remote vector index connection. The API key comes from
/// `VECTOR_INDEX_API_KEY`, never from the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    /// Base URL of the vector database service
    #[serde(default)]
    pub api_base: String,

    #[serde(default = "default_index_name")]
    pub index_name: String,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            index_name: DEFAULT_INDEX_NAME.to_string(),
        }
    }
}

/// Hosted generative model. The API key comes from `GEMINI_API_KEY`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerativeConfig {
    #[serde(default = "default_generative_api_base")]
    pub api_base: String,

    #[serde(default = "default_generative_model")]
    pub model: String,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GENERATIVE_API_BASE.to_string(),
            model: DEFAULT_GENERATIVE_MODEL.to_string(),
        }
    }
}

/// The fixed knowledge document answers are grounded in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroundingConfig {
    /// URL of the knowledge document (fetched once per process)
    #[serde(default)]
    pub document_url: String,

    #[serde(default = "default_grounding_mime")]
    pub mime_type: String,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            document_url: String::new(),
            mime_type: "application/pdf".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Corpus file: one suggestion question per line, '#' comments
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,

    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            corpus_path: DEFAULT_CORPUS_PATH.to_string(),
            batch_size: DEFAULT_INGEST_BATCH_SIZE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_suggestion_threshold() -> f32 {
    DEFAULT_SUGGESTION_THRESHOLD
}

fn default_suggestion_top_k() -> usize {
    DEFAULT_SUGGESTION_TOP_K
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_index_name() -> String {
    DEFAULT_INDEX_NAME.to_string()
}

fn default_generative_api_base() -> String {
    DEFAULT_GENERATIVE_API_BASE.to_string()
}

fn default_generative_model() -> String {
    DEFAULT_GENERATIVE_MODEL.to_string()
}

fn default_grounding_mime() -> String {
    "application/pdf".to_string()
}

fn default_corpus_path() -> String {
    DEFAULT_CORPUS_PATH.to_string()
}

fn default_ingest_batch_size() -> usize {
    DEFAULT_INGEST_BATCH_SIZE
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_body_limit_bytes() -> usize {
    DEFAULT_BODY_LIMIT_BYTES
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub suggestions: SuggestionConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub generative: GenerativeConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Config {
    fn validate(&self) {
        let sug = &self.suggestions;
        if !(0.0..=1.0).contains(&sug.threshold) {
            panic!(
                "suggestions.threshold must be between 0.0 and 1.0, got {}",
                sug.threshold
            );
        }
        if sug.dimension == 0 {
            panic!("suggestions.dimension must be greater than 0");
        }
        if sug.top_k == 0 {
            panic!("suggestions.top_k must be greater than 0");
        }
        if sug.download_timeout_secs == 0 {
            panic!("suggestions.download_timeout_secs must be greater than 0");
        }
        if self.ingest.batch_size == 0 {
            panic!("ingest.batch_size must be greater than 0");
        }
    }

    pub fn load() -> Self {
        Self::load_with(".")
    }

    pub fn load_with(base_path: &str) -> Self {
        let path = Path::new(base_path).join("config.yaml");

        // create new if does not exist
        if !path.exists() {
            std::fs::write(
                &path,
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )
            .expect("failed to write default config");
        }

        let config_str = std::fs::read_to_string(&path).expect("failed to read config");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        config
    }

    /// Directory where embedding model files are cached.
    pub fn model_cache_dir(&self) -> PathBuf {
        Path::new(&self.base_path).to_path_buf()
    }

    /// Corpus file path, resolved against the config directory.
    pub fn corpus_path(&self) -> PathBuf {
        Path::new(&self.base_path).join(&self.ingest.corpus_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let config = Config::default();
        let yaml = serde_yml::to_string(&config).unwrap();
        let parsed: Config = serde_yml::from_str(&yaml).unwrap();
        assert_eq!(parsed.suggestions.threshold, DEFAULT_SUGGESTION_THRESHOLD);
        assert_eq!(parsed.suggestions.top_k, DEFAULT_SUGGESTION_TOP_K);
        assert_eq!(parsed.ingest.batch_size, DEFAULT_INGEST_BATCH_SIZE);
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        let parsed: Config = serde_yml::from_str("server: {}\n").unwrap();
        assert_eq!(parsed.server.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(parsed.suggestions.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(parsed.suggestions.dimension, DEFAULT_EMBEDDING_DIMENSION);
    }

    #[test]
    #[should_panic(expected = "suggestions.threshold")]
    fn threshold_out_of_range_panics() {
        let mut config = Config::default();
        config.suggestions.threshold = 1.5;
        config.validate();
    }
}
