//! Cold-start reconstruction of the index from the document store.
//!
//! When no index directory exists, every stored record is normalized and
//! indexed into a sibling staging directory, which is renamed into place
//! only once the whole replay has succeeded. A failed replay therefore never
//! leaves a half-built index at the real path; the next start replays again.
//! Once an index directory exists it is opened as is and never replayed,
//! even if it lags behind the store.

use crate::error::{IndexError, NormalizeError, StoreError};
use crate::index::{DocId, SearchIndex};
use crate::normalize::Normalizer;
use crate::persist::IndexPaths;
use crate::schema::IndexSchema;
use crate::store::DocumentStore;
use std::fs;
use std::path::Path;
use thiserror::Error;

const PROGRESS_EVERY: usize = 1000;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("normalizing document {id} failed: {source}")]
    Normalize { id: DocId, source: NormalizeError },
    #[error("replay io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub documents: usize,
}

/// Open the index at `path`, or rebuild it from `store` when nothing is there.
///
/// The returned report is `None` when an existing index was opened.
pub async fn open_or_bootstrap(
    path: &Path,
    schema: IndexSchema,
    store: &dyn DocumentStore,
    normalizer: &dyn Normalizer,
) -> Result<(SearchIndex, Option<ReplayReport>), BootstrapError> {
    if SearchIndex::exists(path) {
        return Ok((SearchIndex::open(path)?, None));
    }
    tracing::info!(path = %path.display(), "index not found, rebuilding from document store");
    let (index, report) = replay(path, schema, store, normalizer).await?;
    Ok((index, Some(report)))
}

/// Build a fresh index at `path` from every record in `store`. `path` must not exist.
pub async fn replay(
    path: &Path,
    schema: IndexSchema,
    store: &dyn DocumentStore,
    normalizer: &dyn Normalizer,
) -> Result<(SearchIndex, ReplayReport), BootstrapError> {
    replay_observed(path, schema, store, normalizer, &|_: &SearchIndex, _: DocId| {}).await
}

/// [`replay`], calling `on_indexed` with the staging index after each document lands in it.
async fn replay_observed(
    path: &Path,
    schema: IndexSchema,
    store: &dyn DocumentStore,
    normalizer: &dyn Normalizer,
    on_indexed: &dyn Fn(&SearchIndex, DocId),
) -> Result<(SearchIndex, ReplayReport), BootstrapError> {
    if SearchIndex::exists(path) {
        return Err(IndexError::AlreadyExists(path.to_path_buf()).into());
    }
    let staging = IndexPaths::new(path).staging();
    if staging.exists() {
        tracing::warn!(path = %staging.display(), "removing leftover staging directory");
        fs::remove_dir_all(&staging)?;
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let index = SearchIndex::create(&staging, schema)?;
    let filled = fill(&index, store, normalizer, on_indexed).await;
    let closed = index.close();
    drop(index);
    let documents = match filled.and_then(|n| closed.map(|_| n).map_err(Into::into)) {
        Ok(n) => n,
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::warn!(path = %staging.display(), error = %cleanup, "could not remove staging directory");
            }
            return Err(e);
        }
    };

    fs::rename(&staging, path)?;
    let index = SearchIndex::open(path)?;
    tracing::info!(documents, path = %path.display(), "index rebuilt from document store");
    Ok((index, ReplayReport { documents }))
}

async fn fill(
    index: &SearchIndex,
    store: &dyn DocumentStore,
    normalizer: &dyn Normalizer,
    on_indexed: &dyn Fn(&SearchIndex, DocId),
) -> Result<usize, BootstrapError> {
    let mut documents = 0usize;
    for record in store.scan_all() {
        let (id, content) = record?;
        let normalized = normalizer
            .normalize(&content)
            .await
            .map_err(|source| BootstrapError::Normalize { id, source })?;
        index.index(id, &normalized)?;
        on_indexed(index, id);
        documents += 1;
        if documents % PROGRESS_EVERY == 0 {
            tracing::info!(documents, "replay progress");
        }
    }
    Ok(documents)
}
