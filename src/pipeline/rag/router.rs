use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::RagConfig;

use super::classify::{TemporalCues, VocabularyClassifier};
use super::types::{
    Classification, CorpusClassifier, CorpusLabel, Query, RouteDecision, RouteReason, SourceKind,
};
use super::RagError;

/// Rule-based source selection with a pluggable corpus classifier.
///
/// 1. Temporal cue + web eligible → WEB.
/// 2. DOCUMENT available → DOCUMENT, unless classified out of corpus above
///    the threshold.
/// 3. Nothing selected → ENCYCLOPEDIA if available, else `NoSourceAvailable`.
pub struct QueryRouter {
    cues: TemporalCues,
    classifier: Arc<dyn CorpusClassifier>,
    out_of_corpus_threshold: f32,
}

impl QueryRouter {
    pub fn new(
        cues: TemporalCues,
        classifier: Arc<dyn CorpusClassifier>,
        out_of_corpus_threshold: f32,
    ) -> Self {
        Self {
            cues,
            classifier,
            out_of_corpus_threshold,
        }
    }

    /// Router with the default heuristic classifier (abstains until given a vocabulary).
    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(
            TemporalCues::from_config(config),
            Arc::new(VocabularyClassifier::new()),
            config.out_of_corpus_threshold,
        )
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn CorpusClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn route(
        &self,
        query: &Query,
        available_sources: &BTreeSet<SourceKind>,
    ) -> Result<RouteDecision, RagError> {
        let text = query.text().trim();
        if text.is_empty() {
            return Err(RagError::InvalidQuery);
        }

        let mut selected = BTreeSet::new();

        // Rule 1: the user toggle gates web regardless of availability.
        let web_eligible =
            query.web_search_enabled() && available_sources.contains(&SourceKind::Web);
        let temporal_cue = self.cues.detect(text);
        if web_eligible && temporal_cue.is_some() {
            selected.insert(SourceKind::Web);
        }

        // Rule 2
        let mut classification: Option<Classification> = None;
        if available_sources.contains(&SourceKind::Document) {
            let result = self.classifier.classify(text);
            classification = Some(result);
            let out_of_corpus = result.label == CorpusLabel::OutOfCorpus
                && result.confidence > self.out_of_corpus_threshold;
            if out_of_corpus {
                tracing::debug!(
                    confidence = result.confidence,
                    "Query classified out of corpus, skipping documents"
                );
            } else {
                selected.insert(SourceKind::Document);
            }
        }

        let has_docs = selected.contains(&SourceKind::Document);
        let has_web = selected.contains(&SourceKind::Web);
        let reason = match (has_docs, has_web) {
            (true, true) => RouteReason::TemporalCueHybrid,
            (false, true) => RouteReason::TemporalCue,
            (true, false) => RouteReason::DocumentCorpus,
            (false, false) => {
                // Rule 3
                if available_sources.contains(&SourceKind::Encyclopedia) {
                    selected.insert(SourceKind::Encyclopedia);
                    RouteReason::EncyclopediaFallback
                } else {
                    tracing::warn!("No evidence source available for query");
                    return Err(RagError::NoSourceAvailable);
                }
            }
        };

        tracing::info!(
            sources = ?selected,
            reason = ?reason,
            cue = temporal_cue.as_deref().unwrap_or(""),
            "Query routed"
        );

        Ok(RouteDecision::new(query.clone(), selected, reason, classification))
    }
}
