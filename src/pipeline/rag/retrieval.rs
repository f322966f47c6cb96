use std::sync::Arc;

use super::classify::extract_keywords;
use super::types::{
    EmbeddingService, EncyclopediaLookup, EvidenceSpan, IndexHit, SourceKind, VectorIndex,
    WebSearchService,
};
use super::{RagError, ServiceError};

/// Uniform retrieval contract over every evidence source.
///
/// Zero results is not an error. Implementations must not share mutable
/// state: the orchestrator calls `retrieve` for several adapters at once.
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Whether the source can be consulted at all (index built, client configured).
    fn is_available(&self) -> bool {
        true
    }

    fn retrieve(&self, query_text: &str, top_k: usize) -> Result<Vec<EvidenceSpan>, RagError>;
}

/// Collapse whitespace runs, drop control characters, trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `1 / (1 + rank)` for 0-based ranks: the top result scores 1.0.
pub fn rank_score(rank: usize) -> f32 {
    1.0 / (1.0 + rank as f32)
}

fn failure(kind: SourceKind, e: ServiceError) -> RagError {
    RagError::AdapterFailure {
        kind,
        reason: e.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════
// Document adapter
// ═══════════════════════════════════════════════════════════

/// Private corpus: embeds the query and searches the vector index.
/// raw_score is the index similarity as reported.
pub struct DocumentAdapter {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
}

impl DocumentAdapter {
    pub fn new(embedder: Arc<dyn EmbeddingService>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }
}

impl SourceAdapter for DocumentAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Document
    }

    fn is_available(&self) -> bool {
        self.index.is_ready()
    }

    fn retrieve(&self, query_text: &str, top_k: usize) -> Result<Vec<EvidenceSpan>, RagError> {
        let vector = self
            .embedder
            .embed(query_text)
            .map_err(|e| failure(SourceKind::Document, e))?;
        let hits = self
            .index
            .search(&vector, top_k)
            .map_err(|e| failure(SourceKind::Document, e))?;

        Ok(hits
            .into_iter()
            .take(top_k)
            .map(|hit| (clean_text(&hit.text), hit))
            .filter(|(text, _)| !text.is_empty())
            .enumerate()
            .map(|(rank, (text, hit))| {
                EvidenceSpan::new(SourceKind::Document, hit.locator, text, hit.score, rank)
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════
// Encyclopedia adapter
// ═══════════════════════════════════════════════════════════

/// Encyclopedia summaries. raw_score = `1/(1+rank)`, locator = article title.
pub struct EncyclopediaAdapter {
    lookup: Arc<dyn EncyclopediaLookup>,
}

impl EncyclopediaAdapter {
    pub fn new(lookup: Arc<dyn EncyclopediaLookup>) -> Self {
        Self { lookup }
    }
}

impl SourceAdapter for EncyclopediaAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Encyclopedia
    }

    fn retrieve(&self, query_text: &str, top_k: usize) -> Result<Vec<EvidenceSpan>, RagError> {
        let hits = self
            .lookup
            .search(query_text, top_k)
            .map_err(|e| failure(SourceKind::Encyclopedia, e))?;

        Ok(hits
            .into_iter()
            .take(top_k)
            .filter_map(|hit| {
                let text = clean_text(&hit.excerpt);
                if text.is_empty() {
                    return None;
                }
                Some(
                    EvidenceSpan::new(
                        SourceKind::Encyclopedia,
                        hit.title.clone(),
                        text,
                        rank_score(hit.rank),
                        hit.rank,
                    )
                    .with_title(hit.title),
                )
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════
// Web adapter
// ═══════════════════════════════════════════════════════════

/// Live web search. raw_score = provided relevance, else `1/(1+rank)`.
pub struct WebAdapter {
    search: Arc<dyn WebSearchService>,
}

impl WebAdapter {
    pub fn new(search: Arc<dyn WebSearchService>) -> Self {
        Self { search }
    }
}

impl SourceAdapter for WebAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    fn retrieve(&self, query_text: &str, top_k: usize) -> Result<Vec<EvidenceSpan>, RagError> {
        let hits = self
            .search
            .search(query_text, top_k)
            .map_err(|e| failure(SourceKind::Web, e))?;

        Ok(hits
            .into_iter()
            .take(top_k)
            .enumerate()
            .filter_map(|(rank, hit)| {
                let text = clean_text(&hit.excerpt);
                if text.is_empty() {
                    return None;
                }
                let score = hit
                    .relevance
                    .filter(|r| r.is_finite())
                    .unwrap_or_else(|| rank_score(rank));
                let span = EvidenceSpan::new(SourceKind::Web, hit.url, text, score, rank);
                Some(match hit.title {
                    Some(title) => span.with_title(title),
                    None => span,
                })
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════
// In-memory collaborators
// ═══════════════════════════════════════════════════════════

/// Feature-hashing bag-of-words embedder: cosine similarity tracks keyword overlap.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingService for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vec = vec![0.0f32; self.dimension];
        for keyword in extract_keywords(text) {
            let bucket = (fnv1a(keyword.as_bytes()) % self.dimension as u64) as usize;
            vec[bucket] += 1.0;
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut vec {
                *val /= norm;
            }
        }
        Ok(vec)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// In-memory vector index using cosine similarity.
pub struct InMemoryVectorIndex {
    entries: Vec<StoredEntry>,
}

struct StoredEntry {
    locator: String,
    text: String,
    embedding: Vec<f32>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, locator: &str, text: &str, embedding: Vec<f32>) {
        self.entries.push(StoredEntry {
            locator: locator.to_string(),
            text: text.to_string(),
            embedding,
        });
    }

    /// Embed `text` with `embedder` and add it.
    pub fn add_text(
        &mut self,
        embedder: &dyn EmbeddingService,
        locator: &str,
        text: &str,
    ) -> Result<(), ServiceError> {
        let embedding = embedder.embed(text)?;
        self.add(locator, text, embedding);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.text.as_str())
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>, ServiceError> {
        let mut scored: Vec<(f32, &StoredEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(vector, &entry.embedding), entry))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, entry)| IndexHit {
                locator: entry.locator.clone(),
                text: entry.text.clone(),
                score,
            })
            .collect())
    }

    fn is_ready(&self) -> bool {
        !self.entries.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
