use clap::{Parser, ValueEnum};
use docsearch_core::{Analyzer, IndexSchema};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NormalizerKind {
    /// In-process NFKC and whitespace cleanup.
    Local,
    /// OpenAI-compatible chat completion returning a JSON token array.
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnalyzerArg {
    Standard,
    Cjk,
}

impl From<AnalyzerArg> for Analyzer {
    fn from(a: AnalyzerArg) -> Self {
        match a {
            AnalyzerArg::Standard => Analyzer::Standard,
            AnalyzerArg::Cjk => Analyzer::Cjk,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "docsearch-server", about = "Document ingestion and full-text search service")]
pub struct Config {
    /// Index directory path
    #[arg(long, env = "INDEX_PATH", default_value = ".index")]
    pub index: PathBuf,
    /// Document store directory path
    #[arg(long, env = "STORE_PATH", default_value = ".store")]
    pub store: PathBuf,
    /// Host to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// Port to bind
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
    /// Analyzer for the content field when a new index is created
    #[arg(long, env = "INDEX_ANALYZER", value_enum, default_value_t = AnalyzerArg::Standard)]
    pub analyzer: AnalyzerArg,
    /// Text normalization stage applied before storing and indexing
    #[arg(long, env = "NORMALIZER", value_enum, default_value_t = NormalizerKind::Local)]
    pub normalizer: NormalizerKind,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4")]
    pub openai_model: String,
    /// Timeout for a single normalizer call, in seconds
    #[arg(long, env = "NORMALIZER_TIMEOUT_SECS", default_value_t = 60)]
    pub normalizer_timeout_secs: u64,
}

impl Config {
    /// Parse flags, with `.env` in the working directory as a fallback source
    /// for the environment variables.
    pub fn load() -> Self {
        merge_env_file(Path::new(".env"));
        Self::parse()
    }

    pub fn schema(&self) -> IndexSchema {
        IndexSchema::with_analyzer(self.analyzer.into())
    }
}

/// Copy the variables in `path` into the process environment. Variables that
/// are already set keep their value. Returns whether a file was read.
pub fn merge_env_file(path: &Path) -> bool {
    match dotenvy::from_path(path) {
        Ok(()) => true,
        Err(e) if e.not_found() => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable env file");
            false
        }
    }
}
