use crate::error::NormalizeError;
use async_trait::async_trait;
use unicode_normalization::UnicodeNormalization;

/// Turns raw submitted text into the canonical content that is both stored and indexed.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, raw: &str) -> Result<String, NormalizeError>;
}

/// In-process normalizer: NFKC and whitespace collapsing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalNormalizer;

#[async_trait]
impl Normalizer for LocalNormalizer {
    async fn normalize(&self, raw: &str) -> Result<String, NormalizeError> {
        Ok(raw.nfkc().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
    }
}
