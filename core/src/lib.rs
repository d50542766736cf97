//! Full-text search engine: analysis, a persistent inverted index, the durable
//! document store it is rebuilt from, and the cold-start bootstrap tying them together.

pub mod bootstrap;
pub mod error;
pub mod index;
pub mod normalize;
pub mod persist;
pub mod schema;
pub mod store;
pub mod tokenizer;

pub use error::{IndexError, NormalizeError, StoreError};
pub use index::{DocId, IndexStats, SearchHit, SearchIndex, SearchRequest, SearchResults, StoredDocument};
pub use normalize::{LocalNormalizer, Normalizer};
pub use schema::IndexSchema;
pub use store::{DocumentStore, SledStore};
pub use tokenizer::Analyzer;
