use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::ServiceError;

// ═══════════════════════════════════════════════════════════
// Sources
// ═══════════════════════════════════════════════════════════

/// An evidence source the router can select.
///
/// Variant order is authority order: private documents outrank the
/// encyclopedia, which outranks open web text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Document,
    Encyclopedia,
    Web,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Document, SourceKind::Encyclopedia, SourceKind::Web];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Document => "document",
            SourceKind::Encyclopedia => "encyclopedia",
            SourceKind::Web => "web",
        }
    }

    /// Lower is more authoritative.
    pub fn priority(&self) -> u8 {
        match self {
            SourceKind::Document => 0,
            SourceKind::Encyclopedia => 1,
            SourceKind::Web => 2,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceKind::Document => "DOCUMENT",
            SourceKind::Encyclopedia => "ENCYCLOPEDIA",
            SourceKind::Web => "WEB",
        };
        f.write_str(label)
    }
}

// ═══════════════════════════════════════════════════════════
// Query + routing
// ═══════════════════════════════════════════════════════════

/// A user's question. Immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    text: String,
    session_id: Uuid,
    web_search_enabled: bool,
    timestamp: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>, session_id: Uuid, web_search_enabled: bool) -> Self {
        Self {
            text: text.into(),
            session_id,
            web_search_enabled,
            timestamp: Utc::now(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn web_search_enabled(&self) -> bool {
        self.web_search_enabled
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Which routing rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// Temporal cue with web available, documents also consulted.
    TemporalCueHybrid,
    /// Temporal cue with web available, documents unavailable or out of corpus.
    TemporalCue,
    /// Documents available and the query was not judged out of corpus.
    DocumentCorpus,
    /// Neither documents nor web were selected.
    EncyclopediaFallback,
}

/// Display grouping of a decision, as shown next to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    Internal,
    Web,
    Hybrid,
    Encyclopedia,
}

impl RouteMode {
    pub fn label(&self) -> &'static str {
        match self {
            RouteMode::Internal => "Document-based",
            RouteMode::Web => "Web-based",
            RouteMode::Hybrid => "Hybrid",
            RouteMode::Encyclopedia => "Encyclopedia",
        }
    }
}

/// Outcome of a corpus classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusLabel {
    InCorpus,
    OutOfCorpus,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: CorpusLabel,
    pub confidence: f32,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            label: CorpusLabel::Unknown,
            confidence: 0.0,
        }
    }
}

/// Routing decision for one query. Created once by `QueryRouter`, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    query: Query,
    selected_sources: BTreeSet<SourceKind>,
    reason: RouteReason,
    classification: Option<Classification>,
}

impl RouteDecision {
    pub(crate) fn new(
        query: Query,
        selected_sources: BTreeSet<SourceKind>,
        reason: RouteReason,
        classification: Option<Classification>,
    ) -> Self {
        Self {
            query,
            selected_sources,
            reason,
            classification,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn selected_sources(&self) -> &BTreeSet<SourceKind> {
        &self.selected_sources
    }

    pub fn reason(&self) -> RouteReason {
        self.reason
    }

    /// Corpus classification consulted for the document rule, if any.
    pub fn classification(&self) -> Option<Classification> {
        self.classification
    }

    pub fn mode(&self) -> RouteMode {
        let docs = self.selected_sources.contains(&SourceKind::Document);
        let web = self.selected_sources.contains(&SourceKind::Web);
        match (docs, web) {
            (true, true) => RouteMode::Hybrid,
            (true, false) => RouteMode::Internal,
            (false, true) => RouteMode::Web,
            (false, false) => RouteMode::Encyclopedia,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Evidence
// ═══════════════════════════════════════════════════════════

/// Deterministic span id over (source, locator, text).
pub fn span_id(source_kind: SourceKind, locator: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_kind.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(locator.as_bytes());
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// A retrieved unit of text with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    id: String,
    source_kind: SourceKind,
    locator: String,
    title: Option<String>,
    text: String,
    raw_score: f32,
    normalized_score: f32,
    rank: usize,
}

impl EvidenceSpan {
    /// `rank` is the 0-based position in the adapter's own result list.
    pub fn new(
        source_kind: SourceKind,
        locator: impl Into<String>,
        text: impl Into<String>,
        raw_score: f32,
        rank: usize,
    ) -> Self {
        let locator = locator.into();
        let text = text.into();
        Self {
            id: span_id(source_kind, &locator, &text),
            source_kind,
            locator,
            title: None,
            text,
            raw_score,
            normalized_score: raw_score.clamp(0.0, 1.0),
            rank,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the normalized score directly (clamped to [0,1]).
    pub fn with_normalized_score(mut self, score: f32) -> Self {
        self.normalized_score = clamp_unit(score);
        self
    }

    pub(crate) fn set_normalized_score(&mut self, score: f32) {
        self.normalized_score = clamp_unit(score);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn raw_score(&self) -> f32 {
        self.raw_score
    }

    pub fn normalized_score(&self) -> f32 {
        self.normalized_score
    }

    pub fn rank(&self) -> usize {
        self.rank
    }
}

fn clamp_unit(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// One citation in an assembled context: marker `[n]` to the span it cites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub marker: usize,
    pub span_id: String,
    pub source_kind: SourceKind,
    pub locator: String,
    pub title: Option<String>,
    /// Span text as included in the context, after any truncation.
    pub text: String,
    pub excerpt: String,
    pub relevance_score: f32,
    pub truncated: bool,
}

impl Citation {
    pub fn marker_label(&self) -> String {
        marker_label(self.marker)
    }
}

pub fn marker_label(marker: usize) -> String {
    format!("[{marker}]")
}

/// Grounded context handed to generation.
///
/// `token_count <= token_budget` and every marker in `text` has exactly one
/// entry in `citations`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub text: String,
    pub token_count: usize,
    pub citations: Vec<Citation>,
}

impl AssembledContext {
    /// No evidence found. A valid result, not an error.
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    pub fn truncated(&self) -> bool {
        self.citations.iter().any(|c| c.truncated)
    }
}

// ═══════════════════════════════════════════════════════════
// Collaborator contracts
// ═══════════════════════════════════════════════════════════

/// Text embedding collaborator.
pub trait EmbeddingService: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub locator: String,
    pub text: String,
    pub score: f32,
}

/// Read-only handle to an externally persisted vector index.
pub trait VectorIndex: Send + Sync {
    fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>, ServiceError>;

    /// False when no index has been built yet.
    fn is_ready(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupHit {
    pub title: String,
    pub excerpt: String,
    /// 0-based relevance rank.
    pub rank: usize,
}

pub trait EncyclopediaLookup: Send + Sync {
    fn search(&self, text: &str, top_k: usize) -> Result<Vec<LookupHit>, ServiceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebHit {
    pub url: String,
    pub title: Option<String>,
    pub excerpt: String,
    pub relevance: Option<f32>,
}

pub trait WebSearchService: Send + Sync {
    fn search(&self, text: &str, top_k: usize) -> Result<Vec<WebHit>, ServiceError>;
}

/// Token counting in generation-model units.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Final prose synthesis. Citation markers must be passed through verbatim.
pub trait GenerationService: Send + Sync {
    fn generate(&self, system: &str, prompt: &str) -> Result<String, ServiceError>;
}

/// Decides whether a query can be answered from the private corpus.
pub trait CorpusClassifier: Send + Sync {
    fn classify(&self, query: &str) -> Classification;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_id_is_deterministic() {
        let a = span_id(SourceKind::Web, "https://a.example", "same text");
        let b = span_id(SourceKind::Web, "https://a.example", "same text");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn span_id_depends_on_every_component() {
        let base = span_id(SourceKind::Web, "loc", "text");
        assert_ne!(base, span_id(SourceKind::Document, "loc", "text"));
        assert_ne!(base, span_id(SourceKind::Web, "loc2", "text"));
        assert_ne!(base, span_id(SourceKind::Web, "loc", "text2"));
    }

    #[test]
    fn span_id_separator_prevents_boundary_collisions() {
        assert_ne!(
            span_id(SourceKind::Web, "ab", "c"),
            span_id(SourceKind::Web, "a", "bc")
        );
    }

    #[test]
    fn new_span_clamps_initial_normalized_score() {
        let span = EvidenceSpan::new(SourceKind::Document, "a.pdf#p1", "text", -0.4, 0);
        assert_eq!(span.raw_score(), -0.4);
        assert_eq!(span.normalized_score(), 0.0);

        let span = span.with_normalized_score(f32::NAN);
        assert_eq!(span.normalized_score(), 0.0);
    }

    #[test]
    fn source_priority_follows_authority() {
        assert!(SourceKind::Document.priority() < SourceKind::Encyclopedia.priority());
        assert!(SourceKind::Encyclopedia.priority() < SourceKind::Web.priority());
        assert_eq!(SourceKind::Encyclopedia.to_string(), "ENCYCLOPEDIA");
    }

    #[test]
    fn route_mode_from_selection() {
        let query = Query::new("q", Uuid::new_v4(), true);
        let both: BTreeSet<_> = [SourceKind::Document, SourceKind::Web].into_iter().collect();
        let decision = RouteDecision::new(query.clone(), both, RouteReason::TemporalCueHybrid, None);
        assert_eq!(decision.mode(), RouteMode::Hybrid);
        assert_eq!(decision.mode().label(), "Hybrid");

        let enc: BTreeSet<_> = [SourceKind::Encyclopedia].into_iter().collect();
        let decision = RouteDecision::new(query, enc, RouteReason::EncyclopediaFallback, None);
        assert_eq!(decision.mode(), RouteMode::Encyclopedia);
    }

    #[test]
    fn empty_context_means_no_evidence() {
        let ctx = AssembledContext::default();
        assert!(ctx.is_empty());
        assert!(!ctx.truncated());
        assert_eq!(ctx.token_count, 0);
    }
}
