//! Evidence pool: per-source score normalization and deduplication.
//!
//! Owned by one orchestration run and discarded afterwards. Spans arrive in
//! adapter-completion order; `finalize` is a pure function of the span set,
//! so arrival order never changes which spans survive.

use std::collections::{HashMap, HashSet};

use super::context::rank_order;
use super::types::{EvidenceSpan, SourceKind};

/// Default near-duplicate threshold (token-set Jaccard).
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.9;

#[derive(Debug)]
pub struct EvidencePool {
    spans: Vec<EvidenceSpan>,
    similarity_threshold: f32,
}

impl Default for EvidencePool {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_THRESHOLD)
    }
}

impl EvidencePool {
    pub fn new(similarity_threshold: f32) -> Self {
        Self {
            spans: Vec::new(),
            similarity_threshold,
        }
    }

    pub fn ingest(&mut self, spans: Vec<EvidenceSpan>) {
        self.spans.extend(spans);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Normalize per source, collapse identical ids, then collapse
    /// cross-source near duplicates. Survivors keep insertion order.
    pub fn finalize(self) -> Vec<EvidenceSpan> {
        let threshold = self.similarity_threshold;
        let mut spans = self.spans;
        normalize_scores(&mut spans);

        // Best representative per id: higher normalized score, then lower rank.
        let mut best: HashMap<String, usize> = HashMap::new();
        for (idx, span) in spans.iter().enumerate() {
            match best.get(span.id()) {
                Some(&current) if !rank_order(span, &spans[current]).is_lt() => {}
                _ => {
                    best.insert(span.id().to_string(), idx);
                }
            }
        }

        // Walk candidates strongest-first; a span is dropped when a stronger
        // kept span from a different source says the same thing.
        let mut candidates: Vec<usize> = best.into_values().collect();
        candidates.sort_by(|&a, &b| rank_order(&spans[a], &spans[b]));

        let token_sets: HashMap<usize, HashSet<String>> = candidates
            .iter()
            .map(|&idx| (idx, token_set(spans[idx].text())))
            .collect();

        let mut kept: Vec<usize> = Vec::new();
        for &idx in &candidates {
            let duplicate = kept.iter().any(|&k| {
                spans[k].source_kind() != spans[idx].source_kind()
                    && jaccard(&token_sets[&k], &token_sets[&idx]) >= threshold
            });
            if duplicate {
                tracing::debug!(
                    span_id = spans[idx].id(),
                    source = %spans[idx].source_kind(),
                    "Dropped near-duplicate span"
                );
            } else {
                kept.push(idx);
            }
        }

        let kept: HashSet<usize> = kept.into_iter().collect();
        spans
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| kept.contains(idx))
            .map(|(_, span)| span)
            .collect()
    }
}

/// Min-max scale raw scores to [0,1] within each source kind.
/// A source with a single span, or with all-equal scores, is clamped instead.
pub fn normalize_scores(spans: &mut [EvidenceSpan]) {
    let mut ranges: HashMap<SourceKind, (f32, f32, usize)> = HashMap::new();
    for span in spans.iter() {
        let raw = span.raw_score();
        if !raw.is_finite() {
            continue;
        }
        let entry = ranges.entry(span.source_kind()).or_insert((raw, raw, 0));
        entry.0 = entry.0.min(raw);
        entry.1 = entry.1.max(raw);
        entry.2 += 1;
    }

    for span in spans.iter_mut() {
        let raw = span.raw_score();
        let normalized = match ranges.get(&span.source_kind()) {
            Some(&(min, max, count)) if count > 1 && max > min && raw.is_finite() => {
                (raw - min) / (max - min)
            }
            _ => raw,
        };
        span.set_normalized_score(normalized);
    }
}

fn token_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity of two token sets. An empty set matches nothing, so
/// content-free spans are never near-duplicates.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let union = a.union(b).count();
    a.intersection(b).count() as f32 / union as f32
}

/// Token-set Jaccard similarity of two texts.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    jaccard(&token_set(a), &token_set(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(kind: SourceKind, locator: &str, text: &str, raw: f32, rank: usize) -> EvidenceSpan {
        EvidenceSpan::new(kind, locator, text, raw, rank)
    }

    #[test]
    fn ingesting_same_span_twice_yields_one() {
        let s = span(SourceKind::Web, "https://a.example", "Mars rover lands", 0.7, 0);
        let mut pool = EvidencePool::default();
        pool.ingest(vec![s.clone()]);
        pool.ingest(vec![s.clone()]);
        let out = pool.finalize();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), s.id());
    }

    #[test]
    fn min_max_normalizes_within_source() {
        let mut pool = EvidencePool::default();
        pool.ingest(vec![
            span(SourceKind::Document, "d1", "alpha beta", -0.2, 0),
            span(SourceKind::Document, "d2", "gamma delta", 0.4, 1),
            span(SourceKind::Document, "d3", "epsilon zeta", 0.1, 2),
        ]);
        let out = pool.finalize();
        let by_loc = |loc: &str| out.iter().find(|s| s.locator() == loc).unwrap().normalized_score();
        assert_eq!(by_loc("d1"), 0.0);
        assert_eq!(by_loc("d2"), 1.0);
        assert!((by_loc("d3") - 0.5).abs() < 1e-5);
    }

    #[test]
    fn single_span_source_is_clamped() {
        let mut pool = EvidencePool::default();
        pool.ingest(vec![span(SourceKind::Web, "u", "only one", 3.5, 0)]);
        pool.ingest(vec![span(SourceKind::Document, "d", "negative", -0.5, 0)]);
        let out = pool.finalize();
        let web = out.iter().find(|s| s.source_kind() == SourceKind::Web).unwrap();
        let doc = out.iter().find(|s| s.source_kind() == SourceKind::Document).unwrap();
        assert_eq!(web.normalized_score(), 1.0);
        assert_eq!(doc.normalized_score(), 0.0);
    }

    #[test]
    fn sources_are_normalized_independently() {
        let mut pool = EvidencePool::default();
        pool.ingest(vec![
            span(SourceKind::Document, "d1", "one two", 0.80, 0),
            span(SourceKind::Document, "d2", "three four", 0.82, 1),
            span(SourceKind::Web, "w1", "five six", 10.0, 0),
            span(SourceKind::Web, "w2", "seven eight", 20.0, 1),
        ]);
        let out = pool.finalize();
        let top_doc = out.iter().find(|s| s.locator() == "d2").unwrap();
        let top_web = out.iter().find(|s| s.locator() == "w2").unwrap();
        assert_eq!(top_doc.normalized_score(), 1.0);
        assert_eq!(top_web.normalized_score(), 1.0);
    }

    #[test]
    fn near_duplicate_across_sources_prefers_document_on_tie() {
        let text = "Paris is the capital and most populous city of France";
        let mut pool = EvidencePool::default();
        pool.ingest(vec![span(SourceKind::Web, "https://x.example", text, 0.9, 0)]);
        pool.ingest(vec![span(SourceKind::Document, "atlas.pdf#p2", text, 0.9, 0)]);
        pool.ingest(vec![span(SourceKind::Encyclopedia, "Paris", text, 0.9, 0)]);
        let out = pool.finalize();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_kind(), SourceKind::Document);
    }

    #[test]
    fn near_duplicate_keeps_higher_score() {
        let mut pool = EvidencePool::default();
        pool.ingest(vec![
            span(SourceKind::Document, "d1", "Paris is the capital of France", 0.1, 0),
            span(SourceKind::Document, "d2", "unrelated budget figures", 0.9, 1),
        ]);
        pool.ingest(vec![span(SourceKind::Web, "w", "Paris is the capital of France!", 0.8, 0)]);
        let out = pool.finalize();
        // d1 normalizes to 0.0, the web copy (single span) keeps 0.8.
        assert!(out.iter().any(|s| s.locator() == "w"));
        assert!(!out.iter().any(|s| s.locator() == "d1"));
        assert!(out.iter().any(|s| s.locator() == "d2"));
    }

    #[test]
    fn same_source_near_duplicates_are_kept() {
        let mut pool = EvidencePool::default();
        pool.ingest(vec![
            span(SourceKind::Web, "https://a.example", "Rover found water ice", 0.9, 0),
            span(SourceKind::Web, "https://b.example", "Rover found water ice", 0.8, 1),
        ]);
        assert_eq!(pool.finalize().len(), 2);
    }

    #[test]
    fn dissimilar_spans_survive() {
        let mut pool = EvidencePool::default();
        pool.ingest(vec![span(SourceKind::Document, "d", "Revenue grew twelve percent", 0.5, 0)]);
        pool.ingest(vec![span(SourceKind::Web, "w", "Rover landed in Jezero crater", 0.5, 0)]);
        assert_eq!(pool.finalize().len(), 2);
    }

    #[test]
    fn finalize_is_order_independent() {
        let spans = vec![
            span(SourceKind::Document, "d1", "Paris is the capital of France", 0.7, 0),
            span(SourceKind::Web, "w1", "Paris is the capital of France", 0.7, 0),
            span(SourceKind::Encyclopedia, "France", "France is in western Europe", 1.0, 0),
            span(SourceKind::Encyclopedia, "Paris", "Paris hosts the Louvre museum", 0.5, 1),
        ];
        let mut forward = EvidencePool::default();
        forward.ingest(spans.clone());
        let mut reverse = EvidencePool::default();
        reverse.ingest(spans.into_iter().rev().collect());

        let mut a: Vec<String> = forward.finalize().iter().map(|s| s.id().to_string()).collect();
        let mut b: Vec<String> = reverse.finalize().iter().map(|s| s.id().to_string()).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn text_similarity_bounds() {
        assert_eq!(text_similarity("a b c", "C B A"), 1.0);
        assert_eq!(text_similarity("a b", "c d"), 0.0);
        assert!((text_similarity("a b c d", "a b c e") - 0.6).abs() < 1e-5);
        assert_eq!(text_similarity("—", "..."), 0.0);
        assert_eq!(text_similarity("", "a b"), 0.0);
    }

    #[test]
    fn content_free_spans_from_different_sources_both_survive() {
        let mut pool = EvidencePool::default();
        pool.ingest(vec![
            span(SourceKind::Web, "https://a.example", "—", 0.4, 0),
            span(SourceKind::Encyclopedia, "Ellipsis", "...", 0.4, 0),
        ]);
        assert_eq!(pool.finalize().len(), 2);
    }

    #[test]
    fn empty_pool_finalizes_empty() {
        assert!(EvidencePool::default().finalize().is_empty());
    }
}
