//! Persistent inverted index.
//!
//! Postings, stored documents and corpus totals live in three trees of one
//! `sled` database under `<root>/segments`, next to a `meta.json` that records
//! the schema. Every upsert is applied in a single multi-tree transaction, so
//! a crash leaves either the old or the new version of a document, never a mix.

use crate::error::{IndexError, IndexResult};
use crate::persist::{load_meta, save_meta, IndexPaths, MetaFile};
use crate::schema::IndexSchema;
use parking_lot::RwLock;
use regex::RegexBuilder;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError, TransactionalTree};
use sled::Transactional;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

pub type DocId = u64;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;
const FRAGMENT_BEFORE: usize = 100;
const FRAGMENT_AFTER: usize = 200;
const TOTALS_KEY: &[u8] = b"totals";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub term_frequency: u32,
    pub positions: Vec<u32>,
    /// Token count of the whole field, carried here so scoring needs no doc lookup.
    pub field_length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub doc_id: DocId,
    pub content: Option<String>,
    pub length: u32,
    /// Distinct terms this document was posted under; used to retract it on upsert.
    pub terms: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct Totals {
    num_docs: u64,
    total_length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub num_docs: u64,
    pub num_terms: usize,
    pub avg_doc_length: f32,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub size: usize,
    pub from: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), size: DEFAULT_PAGE_SIZE, from: 0 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub total_hits: usize,
    pub max_score: f32,
    pub hits: Vec<SearchHit>,
}

pub struct SearchIndex {
    paths: IndexPaths,
    schema: IndexSchema,
    db: sled::Db,
    postings: sled::Tree,
    docs: sled::Tree,
    stats: sled::Tree,
    // Writers take it exclusively, searches share it.
    lock: RwLock<()>,
    closed: AtomicBool,
}

impl SearchIndex {
    /// Whether an index structure (or anything at all) is present at `path`.
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists()
    }

    pub fn create<P: AsRef<Path>>(path: P, schema: IndexSchema) -> IndexResult<Self> {
        let paths = IndexPaths::new(path);
        let occupied = match std::fs::read_dir(&paths.root) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => paths.root.exists(),
        };
        if occupied {
            return Err(IndexError::AlreadyExists(paths.root.clone()));
        }
        save_meta(&paths, &MetaFile::new(schema.clone())?)?;
        let db = sled::open(paths.segments()).map_err(|e| open_error(&paths, e))?;
        let index = Self::attach(paths, schema, db).map_err(|e| IndexError::Write(e.to_string()))?;
        index
            .stats
            .insert(TOTALS_KEY, encode_plain(&Totals::default())?)
            .map_err(|e| IndexError::Write(e.to_string()))?;
        index.db.flush().map_err(|e| IndexError::Write(e.to_string()))?;
        tracing::info!(path = %index.paths.root.display(), analyzer = ?index.schema.content.analyzer, "created index");
        Ok(index)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> IndexResult<Self> {
        let paths = IndexPaths::new(path);
        let meta = load_meta(&paths)?;
        let corrupt = |reason: String| IndexError::Corrupt { path: paths.root.clone(), reason };
        if !paths.segments().is_dir() {
            return Err(corrupt("segments directory is missing".into()));
        }
        let db = sled::open(paths.segments()).map_err(|e| open_error(&paths, e))?;
        let index = Self::attach(IndexPaths::new(&paths.root), meta.schema, db).map_err(|e| open_error(&paths, e))?;
        let totals = index.totals()?;
        tracing::info!(path = %index.paths.root.display(), num_docs = totals.num_docs, "opened index");
        Ok(index)
    }

    fn attach(paths: IndexPaths, schema: IndexSchema, db: sled::Db) -> sled::Result<Self> {
        Ok(Self {
            postings: db.open_tree("postings")?,
            docs: db.open_tree("docs")?,
            stats: db.open_tree("stats")?,
            paths,
            schema,
            db,
            lock: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn schema(&self) -> &IndexSchema { &self.schema }

    pub fn path(&self) -> &Path { &self.paths.root }

    /// Index `content` under `doc_id`, replacing whatever the id held before.
    pub fn index(&self, doc_id: DocId, content: &str) -> IndexResult<()> {
        self.ensure_open()?;
        let mut grouped: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        let mut length = 0u32;
        for (term, pos) in self.schema.content.analyzer.analyze(content) {
            grouped.entry(term).or_default().push(pos as u32);
            length += 1;
        }
        let stored = StoredDocument {
            doc_id,
            content: self.schema.content.stored.then(|| content.to_string()),
            length,
            terms: grouped.keys().cloned().collect(),
        };
        let doc_bytes = encode_plain(&stored)?;
        let key = doc_id.to_be_bytes();

        let guard = self.lock.write();
        (&self.postings, &self.docs, &self.stats)
            .transaction(|(postings, docs, stats)| {
                let mut totals: Totals = match stats.get(TOTALS_KEY)? {
                    Some(raw) => decode(&raw)?,
                    None => Totals::default(),
                };
                if let Some(raw) = docs.get(key)? {
                    let old: StoredDocument = decode(&raw)?;
                    for term in &old.terms {
                        let Some(raw) = postings.get(term.as_bytes())? else { continue };
                        let mut list: Vec<Posting> = decode(&raw)?;
                        list.retain(|p| p.doc_id != doc_id);
                        if list.is_empty() {
                            postings.remove(term.as_bytes())?;
                        } else {
                            postings.insert(term.as_bytes(), encode(&list)?)?;
                        }
                    }
                    totals.num_docs = totals.num_docs.saturating_sub(1);
                    totals.total_length = totals.total_length.saturating_sub(old.length as u64);
                }
                for (term, positions) in &grouped {
                    let mut list: Vec<Posting> = match postings.get(term.as_bytes())? {
                        Some(raw) => decode(&raw)?,
                        None => Vec::new(),
                    };
                    let posting = Posting {
                        doc_id,
                        term_frequency: positions.len() as u32,
                        positions: positions.clone(),
                        field_length: length,
                    };
                    // Lists stay sorted by doc id.
                    match list.binary_search_by_key(&doc_id, |p| p.doc_id) {
                        Ok(i) => list[i] = posting,
                        Err(i) => list.insert(i, posting),
                    }
                    postings.insert(term.as_bytes(), encode(&list)?)?;
                }
                docs.insert(&key[..], doc_bytes.as_slice())?;
                totals.num_docs += 1;
                totals.total_length += length as u64;
                put_totals(stats, &totals)?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => IndexError::Write(e.to_string()),
            })?;
        // Committed; searches may proceed while the log is synced.
        drop(guard);
        self.db.flush().map_err(|e| IndexError::Write(e.to_string()))?;
        tracing::debug!(doc_id, terms = grouped.len(), length, "indexed document");
        Ok(())
    }

    /// Match query: every document sharing at least one analyzed term with the
    /// query, ranked by BM25 and then by ascending doc id.
    pub fn search(&self, request: &SearchRequest) -> IndexResult<SearchResults> {
        self.ensure_open()?;
        let query = request.query.trim();
        if query.is_empty() {
            return Err(IndexError::InvalidQuery("query must not be empty".into()));
        }
        let terms: BTreeSet<String> = self
            .schema
            .content
            .analyzer
            .analyze(query)
            .into_iter()
            .map(|(term, _)| term)
            .collect();

        let _guard = self.lock.read();
        let totals = self.totals()?;
        let n = totals.num_docs as f32;
        let avgdl = if totals.num_docs == 0 { 1.0 } else { totals.total_length as f32 / n };
        let k1 = self.schema.bm25.k1;
        let b = self.schema.bm25.b;

        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for term in &terms {
            let Some(raw) = self.postings.get(term.as_bytes()).map_err(|e| IndexError::Read(e.to_string()))? else {
                continue;
            };
            let list: Vec<Posting> = decode_plain(&self.paths, &raw)?;
            let df = list.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for p in &list {
                let tf = p.term_frequency as f32;
                let dl = p.field_length as f32;
                let tf_norm = (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / avgdl.max(f32::EPSILON)));
                *scores.entry(p.doc_id).or_insert(0.0) += idf * tf_norm;
            }
        }

        let mut scored: Vec<(DocId, f32)> = scores.into_iter().collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        let total_hits = scored.len();
        let max_score = scored.first().map(|(_, s)| *s).unwrap_or(0.0);
        // size 0 is a count-only request.
        let size = request.size.min(MAX_PAGE_SIZE);

        let raw_terms: Vec<&str> = query.split_whitespace().collect();
        let mut hits = Vec::with_capacity(size.min(total_hits));
        for (doc_id, score) in scored.into_iter().skip(request.from).take(size) {
            let content = self.load_document(doc_id)?.and_then(|d| d.content);
            let fragment = content.as_deref().and_then(|text| fragment(text, &raw_terms));
            hits.push(SearchHit { doc_id, score, content, fragment });
        }
        Ok(SearchResults { total_hits, max_score, hits })
    }

    pub fn document(&self, doc_id: DocId) -> IndexResult<Option<StoredDocument>> {
        self.ensure_open()?;
        let _guard = self.lock.read();
        self.load_document(doc_id)
    }

    pub fn contains(&self, doc_id: DocId) -> IndexResult<bool> {
        self.ensure_open()?;
        self.docs.contains_key(doc_id.to_be_bytes()).map_err(|e| IndexError::Read(e.to_string()))
    }

    pub fn stats(&self) -> IndexResult<IndexStats> {
        self.ensure_open()?;
        let _guard = self.lock.read();
        let totals = self.totals()?;
        let avg_doc_length = if totals.num_docs == 0 { 0.0 } else { totals.total_length as f32 / totals.num_docs as f32 };
        Ok(IndexStats { num_docs: totals.num_docs, num_terms: self.postings.len(), avg_doc_length })
    }

    /// Flush and detach. Every later call fails with [`IndexError::Unavailable`].
    pub fn close(&self) -> IndexResult<()> {
        let _guard = self.lock.write();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.db.flush().map_err(|e| IndexError::Write(e.to_string()))?;
        tracing::info!(path = %self.paths.root.display(), "closed index");
        Ok(())
    }

    fn ensure_open(&self) -> IndexResult<()> {
        if self.closed.load(Ordering::SeqCst) { Err(IndexError::Unavailable) } else { Ok(()) }
    }

    fn load_document(&self, doc_id: DocId) -> IndexResult<Option<StoredDocument>> {
        let raw = self.docs.get(doc_id.to_be_bytes()).map_err(|e| IndexError::Read(e.to_string()))?;
        raw.map(|raw| decode_plain(&self.paths, &raw)).transpose()
    }

    fn totals(&self) -> IndexResult<Totals> {
        match self.stats.get(TOTALS_KEY).map_err(|e| IndexError::Read(e.to_string()))? {
            Some(raw) => decode_plain(&self.paths, &raw),
            None => Err(IndexError::Corrupt { path: self.paths.root.clone(), reason: "corpus totals are missing".into() }),
        }
    }
}

/// A database that cannot be opened is only corrupt when sled says so. Lock
/// contention with another process and plain I/O failures are read errors.
fn open_error(paths: &IndexPaths, e: sled::Error) -> IndexError {
    match e {
        sled::Error::Corruption { .. } => IndexError::Corrupt { path: paths.root.clone(), reason: e.to_string() },
        other => IndexError::Read(format!("{}: {other}", paths.segments().display())),
    }
}

fn put_totals(stats: &TransactionalTree, totals: &Totals) -> ConflictableTransactionResult<(), IndexError> {
    stats.insert(TOTALS_KEY, encode(totals)?)?;
    Ok(())
}

fn encode<T: Serialize>(value: &T) -> ConflictableTransactionResult<Vec<u8>, IndexError> {
    bincode::serialize(value).map_err(|e| ConflictableTransactionError::Abort(IndexError::Write(e.to_string())))
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> ConflictableTransactionResult<T, IndexError> {
    bincode::deserialize(raw).map_err(|e| ConflictableTransactionError::Abort(IndexError::Read(format!("undecodable record: {e}"))))
}

fn encode_plain<T: Serialize>(value: &T) -> IndexResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| IndexError::Write(e.to_string()))
}

fn decode_plain<T: DeserializeOwned>(paths: &IndexPaths, raw: &[u8]) -> IndexResult<T> {
    bincode::deserialize(raw).map_err(|e| IndexError::Corrupt { path: paths.root.clone(), reason: format!("undecodable record: {e}") })
}

/// Cut a window of `text` around the first case-insensitive occurrence of any
/// raw query word and wrap every occurrence in `<em>`. Falls back to the
/// leading characters when nothing matches.
pub fn fragment(text: &str, raw_terms: &[&str]) -> Option<String> {
    if text.is_empty() { return None; }
    let alternation = raw_terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    let pat = if alternation.is_empty() {
        None
    } else {
        RegexBuilder::new(&alternation).case_insensitive(true).build().ok()
    };
    let Some(pat) = pat else {
        return Some(text.chars().take(FRAGMENT_AFTER).collect());
    };
    let snippet = match pat.find(text) {
        Some(m) => {
            let start = floor_char_boundary(text, m.start().saturating_sub(FRAGMENT_BEFORE));
            let end = ceil_char_boundary(text, (m.start() + FRAGMENT_AFTER).min(text.len()));
            &text[start..end]
        }
        None => return Some(text.chars().take(FRAGMENT_AFTER).collect()),
    };
    Some(pat.replace_all(snippet, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).into_owned())
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while !text.is_char_boundary(idx) { idx -= 1; }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while !text.is_char_boundary(idx) { idx += 1; }
    idx
}
