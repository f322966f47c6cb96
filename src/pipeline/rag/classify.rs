use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RagConfig;

use super::types::{Classification, CorpusClassifier, CorpusLabel, GenerationService};

// ═══════════════════════════════════════════════════════════
// Temporal cues
// ═══════════════════════════════════════════════════════════

/// Detects references to current events or dates past the corpus.
#[derive(Debug, Clone)]
pub struct TemporalCues {
    words: HashSet<String>,
    phrases: Vec<String>,
    corpus_latest_year: Option<i32>,
}

impl TemporalCues {
    pub fn new(cues: &[String], corpus_latest_year: Option<i32>) -> Self {
        let mut words = HashSet::new();
        let mut phrases = Vec::new();
        for cue in cues {
            let cue = cue.trim().to_lowercase();
            if cue.is_empty() {
                continue;
            }
            if cue.contains(char::is_whitespace) {
                phrases.push(cue);
            } else {
                words.insert(cue);
            }
        }
        Self {
            words,
            phrases,
            corpus_latest_year,
        }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(&config.temporal_cues, config.corpus_latest_year)
    }

    /// Returns the cue that fired, if any.
    pub fn detect(&self, text: &str) -> Option<String> {
        let lower = text.to_lowercase();

        if let Some(phrase) = self.phrases.iter().find(|p| lower.contains(p.as_str())) {
            return Some(phrase.clone());
        }

        for token in tokens(&lower) {
            if self.words.contains(token) {
                return Some(token.to_string());
            }
            if let Some(latest) = self.corpus_latest_year {
                if let Some(year) = parse_year(token) {
                    if year > latest {
                        return Some(token.to_string());
                    }
                }
            }
        }
        None
    }
}

fn parse_year(token: &str) -> Option<i32> {
    if token.len() != 4 || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse::<i32>().ok().filter(|y| (1000..=2999).contains(y))
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty())
}

// ═══════════════════════════════════════════════════════════
// Keyword extraction
// ═══════════════════════════════════════════════════════════

const STOPWORDS: &[&str] = &[
    "what", "whats", "when", "where", "which", "who", "whom", "whose", "why", "how", "the",
    "and", "for", "are", "was", "were", "with", "about", "from", "that", "this", "these",
    "those", "does", "did", "have", "has", "had", "tell", "can", "could", "would", "should",
    "there", "their", "them", "they", "you", "your", "our", "its", "into", "any", "all",
    "some", "been", "being", "will", "not", "but", "than", "then", "also", "please",
];

/// Lower-cased content words of at least 3 characters, stopwords removed.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut keywords = Vec::new();

    for word in query.split_whitespace() {
        let clean: String = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if clean.chars().count() >= 3 && !STOPWORDS.contains(&clean.as_str()) {
            keywords.push(clean);
        }
    }

    keywords
}

// ═══════════════════════════════════════════════════════════
// Classifiers
// ═══════════════════════════════════════════════════════════

/// Heuristic classifier over the vocabulary of the indexed corpus.
///
/// Out-of-corpus confidence is the share of query keywords the corpus never
/// mentions. Abstains (`Unknown`) when no vocabulary is loaded.
#[derive(Debug, Clone, Default)]
pub struct VocabularyClassifier {
    vocabulary: HashSet<String>,
}

impl VocabularyClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut classifier = Self::new();
        for text in texts {
            classifier.add_text(text);
        }
        classifier
    }

    pub fn add_text(&mut self, text: &str) {
        self.vocabulary.extend(extract_keywords(text));
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }
}

impl CorpusClassifier for VocabularyClassifier {
    fn classify(&self, query: &str) -> Classification {
        if self.vocabulary.is_empty() {
            return Classification::unknown();
        }
        let keywords = extract_keywords(query);
        if keywords.is_empty() {
            return Classification::unknown();
        }

        let missing = keywords
            .iter()
            .filter(|k| !self.vocabulary.contains(k.as_str()))
            .count();
        let missing_share = missing as f32 / keywords.len() as f32;

        if missing_share >= 0.5 {
            Classification {
                label: CorpusLabel::OutOfCorpus,
                confidence: missing_share,
            }
        } else {
            Classification {
                label: CorpusLabel::InCorpus,
                confidence: 1.0 - missing_share,
            }
        }
    }
}

pub const ROUTER_SYSTEM_PROMPT: &str = r#"You are an expert query router. Answer with exactly one word.
- Use 'internal' for questions about specific documents, notes, or uploaded file content.
- Use 'web' for current events, real-time statistics, or news.
- Use 'hybrid' if the query requires comparing internal data with external trends."#;

/// Model-backed classifier: asks a generator for `internal | web | hybrid`.
pub struct GenerativeClassifier {
    generator: Arc<dyn GenerationService>,
}

impl GenerativeClassifier {
    pub fn new(generator: Arc<dyn GenerationService>) -> Self {
        Self { generator }
    }
}

impl CorpusClassifier for GenerativeClassifier {
    fn classify(&self, query: &str) -> Classification {
        match self.generator.generate(ROUTER_SYSTEM_PROMPT, query) {
            Ok(raw) => parse_route_label(&raw),
            Err(e) => {
                tracing::warn!(error = %e, "Query classifier unavailable, abstaining");
                Classification::unknown()
            }
        }
    }
}

/// Map the router model's one-word answer to a corpus classification.
pub fn parse_route_label(raw: &str) -> Classification {
    let lower = raw.to_lowercase();
    let label = tokens(&lower).find(|t| matches!(*t, "internal" | "web" | "hybrid"));
    match label {
        Some("internal") => Classification {
            label: CorpusLabel::InCorpus,
            confidence: 0.9,
        },
        Some("hybrid") => Classification {
            label: CorpusLabel::InCorpus,
            confidence: 0.6,
        },
        Some("web") => Classification {
            label: CorpusLabel::OutOfCorpus,
            confidence: 0.9,
        },
        _ => Classification::unknown(),
    }
}
