use crate::tokenizer::Analyzer;
use serde::{Deserialize, Serialize};

/// On-disk format version written to `meta.json`.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub name: String,
    pub analyzer: Analyzer,
    /// Keep the raw field value so hits can carry it and fragments can be cut from it.
    pub stored: bool,
}

/// Okapi BM25 tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: 1.2, b: 0.75 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub content: FieldMapping,
    #[serde(default)]
    pub bm25: Bm25Params,
}

impl IndexSchema {
    pub fn with_analyzer(analyzer: Analyzer) -> Self {
        Self {
            content: FieldMapping { name: "content".into(), analyzer, stored: true },
            bm25: Bm25Params::default(),
        }
    }
}

impl Default for IndexSchema {
    fn default() -> Self { Self::with_analyzer(Analyzer::Standard) }
}
