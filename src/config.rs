//! TOML configuration parsing and validation.
//!
//! Every section is optional; omitted keys fall back to the defaults below.
//! Secrets are never stored in the file, only the names of the environment
//! variables that hold them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    #[serde(default = "default_docs_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            dir: default_docs_dir(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("./docs")
}
fn default_include_globs() -> Vec<String> {
    vec!["*.docx".to_string()]
}

/// Word-window chunking. Signed so that negative values reach validation
/// instead of failing deserialization.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    #[serde(default = "default_overlap")]
    pub overlap: i64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> i64 {
    500
}
fn default_overlap() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    /// Per-request HTTP timeout. Unset means none; callers bound the whole
    /// operation instead.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Base URL override (Ollama host, Gemini/OpenAI proxies).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the provider's API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: None,
            url: None,
            api_key_env: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}

/// Which [`EmbeddingIndex`](crate::index::EmbeddingIndex) realization to build.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,
    #[serde(default)]
    pub local: LocalIndexConfig,
    #[serde(default)]
    pub remote: Option<RemoteIndexConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalIndexConfig {
    #[serde(default = "default_vector_path")]
    pub vector_path: PathBuf,
    #[serde(default = "default_texts_path")]
    pub texts_path: PathBuf,
}

impl Default for LocalIndexConfig {
    fn default() -> Self {
        Self {
            vector_path: default_vector_path(),
            texts_path: default_texts_path(),
        }
    }
}

fn default_vector_path() -> PathBuf {
    PathBuf::from("./data/index.bin")
}
fn default_texts_path() -> PathBuf {
    PathBuf::from("./data/texts.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteIndexConfig {
    pub index_name: String,
    pub namespace: String,
    #[serde(default = "default_remote_dimension")]
    pub dimension: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_pinecone_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_controller_url")]
    pub controller_url: String,
    /// Data-plane host; resolved from the controller when absent.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_remote_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_remote_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_upsert_batch")]
    pub batch_size: usize,
    /// Per-request HTTP timeout. Unset means none; callers bound the whole
    /// operation instead.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_remote_dimension() -> usize {
    768
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_cloud() -> String {
    "aws".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_pinecone_key_env() -> String {
    "PINECONE_API_KEY".to_string()
}
fn default_controller_url() -> String {
    "https://api.pinecone.io".to_string()
}
fn default_remote_chunk_size() -> usize {
    400
}
fn default_remote_chunk_overlap() -> usize {
    60
}
fn default_upsert_batch() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_google_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_sampling_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Default response contract when a request does not choose one.
    #[serde(default)]
    pub structured: bool,
    /// Required fields of the structured contract.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            api_key_env: default_google_key_env(),
            base_url: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_sampling_top_k(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: None,
            structured: false,
            fields: default_fields(),
        }
    }
}

fn default_generation_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_google_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_top_p() -> f32 {
    0.8
}
fn default_sampling_top_k() -> u32 {
    40
}
fn default_max_output_tokens() -> u32 {
    2048
}
fn default_fields() -> Vec<String> {
    ["initial", "promotion", "information", "invite"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// What to send when retrieval finds no context.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Tell the model no document context exists and to use general knowledge.
    #[default]
    GeneralKnowledge,
    /// Forward the user's query unmodified.
    RawQuery,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptConfig {
    #[serde(default)]
    pub fallback: FallbackPolicy,
    #[serde(default)]
    pub grounded_template: Option<String>,
    #[serde(default)]
    pub fallback_template: Option<String>,
    #[serde(default)]
    pub hints_template: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Run an ingestion of `docs.dir` before accepting requests.
    #[serde(default = "default_true")]
    pub ingest_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            ingest_on_start: true,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `"text"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub format: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_format() -> String {
    "text".to_string()
}
fn default_log_filter() -> String {
    "docbot=info".to_string()
}

impl Config {
    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        // Overlap >= chunk_size is coerced later, not rejected.
        if self.chunking.chunk_size <= 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap < 0 {
            bail!("chunking.overlap must be >= 0");
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "local" | "openai" | "ollama" | "gemini" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be local, openai, ollama, or gemini.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        if self.index.backend == IndexBackend::Remote {
            let remote = self
                .index
                .remote
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[index.remote] is required when backend = \"remote\""))?;
            if remote.namespace.trim().is_empty() {
                bail!("index.remote.namespace must not be empty");
            }
            if remote.index_name.trim().is_empty() {
                bail!("index.remote.index_name must not be empty");
            }
            if remote.dimension == 0 {
                bail!("index.remote.dimension must be > 0");
            }
            if let Some(dims) = self.embedding.dims {
                if dims != remote.dimension {
                    bail!(
                        "index.remote.dimension ({}) must match embedding.dims ({})",
                        remote.dimension,
                        dims
                    );
                }
            }
            if remote.chunk_size == 0 || remote.chunk_overlap >= remote.chunk_size {
                bail!("index.remote.chunk_overlap must be smaller than a non-zero chunk_size");
            }
            if remote.batch_size == 0 {
                bail!("index.remote.batch_size must be > 0");
            }
        }

        if self.generation.fields.is_empty() {
            bail!("generation.fields must name at least one field");
        }
        if self.generation.fields.iter().any(|f| f.trim().is_empty()) {
            bail!("generation.fields must not contain empty names");
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => bail!("Unknown logging.format: '{}'. Must be text or json.", other),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.index.backend, IndexBackend::Local);
        assert_eq!(config.prompt.fallback, FallbackPolicy::GeneralKnowledge);
        assert_eq!(config.generation.fields.len(), 4);
        assert!(config.server.ingest_on_start);
    }

    #[test]
    fn http_timeouts_are_opt_in() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.embedding.timeout_secs, None);
        assert_eq!(config.generation.timeout_secs, None);

        let config = Config::from_toml_str("[generation]\ntimeout_secs = 90").unwrap();
        assert_eq!(config.generation.timeout_secs, Some(90));
    }

    #[test]
    fn rejects_bad_chunking() {
        assert!(Config::from_toml_str("[chunking]\nchunk_size = 0").is_err());
        assert!(Config::from_toml_str("[chunking]\nchunk_size = -3").is_err());
        assert!(Config::from_toml_str("[chunking]\noverlap = -1").is_err());
        // Coerced at chunking time, not rejected here.
        assert!(Config::from_toml_str("[chunking]\nchunk_size = 10\noverlap = 20").is_ok());
    }

    #[test]
    fn remote_backend_requires_section_and_namespace() {
        assert!(Config::from_toml_str("[index]\nbackend = \"remote\"").is_err());

        let blank_ns = r#"
[index]
backend = "remote"
[index.remote]
index_name = "docs"
namespace = "  "
"#;
        assert!(Config::from_toml_str(blank_ns).is_err());

        let ok = r#"
[embedding]
provider = "gemini"
dims = 768
[index]
backend = "remote"
[index.remote]
index_name = "docs"
namespace = "acme"
"#;
        let config = Config::from_toml_str(ok).unwrap();
        let remote = config.index.remote.unwrap();
        assert_eq!(remote.batch_size, 100);
        assert_eq!(remote.chunk_size, 400);
        assert_eq!(remote.chunk_overlap, 60);
        assert_eq!(remote.metric, "cosine");
    }

    #[test]
    fn remote_dimension_must_match_embedding() {
        let mismatch = r#"
[embedding]
dims = 384
[index]
backend = "remote"
[index.remote]
index_name = "docs"
namespace = "acme"
dimension = 768
"#;
        assert!(Config::from_toml_str(mismatch).is_err());
    }

    #[test]
    fn rejects_unknown_names() {
        assert!(Config::from_toml_str("[embedding]\nprovider = \"magic\"").is_err());
        assert!(Config::from_toml_str("[prompt]\nfallback = \"shrug\"").is_err());
        assert!(Config::from_toml_str("[logging]\nformat = \"xml\"").is_err());
        assert!(Config::from_toml_str("[generation]\nfields = []").is_err());
    }

    #[test]
    fn raw_query_fallback_parses() {
        let config = Config::from_toml_str("[prompt]\nfallback = \"raw_query\"").unwrap();
        assert_eq!(config.prompt.fallback, FallbackPolicy::RawQuery);
    }

    #[test]
    fn example_config_is_valid() {
        let config = Config::from_toml_str(include_str!("../config/docbot.example.toml")).unwrap();
        assert_eq!(config.embedding.dims, Some(384));
        assert_eq!(config.index.backend, IndexBackend::Local);
        assert_eq!(config.index.remote.unwrap().namespace, "default");
    }
}
