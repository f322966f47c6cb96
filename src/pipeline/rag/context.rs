use std::cmp::Ordering;
use std::sync::Arc;

use super::citation::MARKER_RE;
use super::tokenizer::CharRatioTokenizer;
use super::types::{marker_label, AssembledContext, Citation, EvidenceSpan, Tokenizer};

/// Default context budget in generation-model tokens.
pub const MAX_CONTEXT_TOKENS: usize = 3000;
/// Default length of a citation excerpt, in characters.
pub const DEFAULT_EXCERPT_CHARS: usize = 200;

const BLOCK_SEPARATOR: &str = "\n\n";

/// Total ranking order over evidence.
/// Normalized score desc, then source priority, then retrieval rank, then id.
pub fn rank_order(a: &EvidenceSpan, b: &EvidenceSpan) -> Ordering {
    b.normalized_score()
        .total_cmp(&a.normalized_score())
        .then_with(|| a.source_kind().priority().cmp(&b.source_kind().priority()))
        .then_with(|| a.rank().cmp(&b.rank()))
        .then_with(|| a.id().cmp(b.id()))
}

/// Spans in ranked order. Independent of input order.
pub fn rank_spans(spans: &[EvidenceSpan]) -> Vec<&EvidenceSpan> {
    let mut ranked: Vec<&EvidenceSpan> = spans.iter().collect();
    ranked.sort_by(|a, b| rank_order(a, b));
    ranked
}

/// Builds the grounded context text with `[n]` markers under a token budget.
pub struct ContextAssembler {
    tokenizer: Arc<dyn Tokenizer>,
    excerpt_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(Arc::new(CharRatioTokenizer))
    }
}

impl ContextAssembler {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }

    /// Greedily include ranked spans until the next one would overflow the
    /// budget. Only the top span may be shortened, and only at a sentence,
    /// line or word boundary.
    pub fn assemble(&self, spans: &[EvidenceSpan], token_budget: usize) -> AssembledContext {
        let mut text = String::new();
        let mut token_count = 0;
        let mut citations = Vec::new();

        for (position, span) in rank_spans(spans).into_iter().enumerate() {
            let marker = citations.len() + 1;
            let header = block_header(marker, span);
            let body = neutralize_markers(span.text());

            let block = format!("{header}\n{body}");
            let candidate = join_block(&text, &block);
            let count = self.tokenizer.count_tokens(&candidate);

            if count <= token_budget {
                text = candidate;
                token_count = count;
                citations.push(self.citation(marker, span, &body, false));
                continue;
            }

            if position == 0 {
                if let Some((shortened, count)) = self.fit_prefix(&header, &body, token_budget) {
                    tracing::info!(
                        span_id = span.id(),
                        source = %span.source_kind(),
                        kept_chars = shortened.chars().count(),
                        original_chars = body.chars().count(),
                        budget = token_budget,
                        "Top evidence span truncated to fit token budget"
                    );
                    text = format!("{header}\n{shortened}");
                    token_count = count;
                    citations.push(self.citation(marker, span, &shortened, true));
                } else {
                    tracing::info!(
                        span_id = span.id(),
                        budget = token_budget,
                        "Token budget too small for any evidence"
                    );
                }
            }
            break;
        }

        AssembledContext {
            text,
            token_count,
            citations,
        }
    }

    /// Longest prefix of `body` that fits, trying sentence ends, then line
    /// ends, then word ends. Token counts grow with prefix length, so each
    /// boundary set is binary searched.
    fn fit_prefix(&self, header: &str, body: &str, budget: usize) -> Option<(String, usize)> {
        let fits = |end: usize| {
            let prefix = body[..end].trim_end();
            let count = self.tokenizer.count_tokens(&format!("{header}\n{prefix}"));
            (count <= budget).then(|| (prefix.to_string(), count))
        };

        let boundary_sets = [sentence_ends(body), line_ends(body), word_ends(body)];
        for ends in boundary_sets {
            let ends: Vec<usize> = ends
                .into_iter()
                .filter(|&end| !body[..end].trim_end().is_empty())
                .collect();

            let mut best = None;
            let (mut lo, mut hi) = (0, ends.len());
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                match fits(ends[mid]) {
                    Some(found) => {
                        best = Some(found);
                        lo = mid + 1;
                    }
                    None => hi = mid,
                }
            }
            if best.is_some() {
                return best;
            }
        }
        None
    }

    fn citation(&self, marker: usize, span: &EvidenceSpan, text: &str, truncated: bool) -> Citation {
        Citation {
            marker,
            span_id: span.id().to_string(),
            source_kind: span.source_kind(),
            locator: span.locator().to_string(),
            title: span.title().map(str::to_string),
            text: text.to_string(),
            excerpt: excerpt(text, self.excerpt_chars),
            relevance_score: span.normalized_score(),
            truncated,
        }
    }
}

fn block_header(marker: usize, span: &EvidenceSpan) -> String {
    format!(
        "{} ({}: {})",
        marker_label(marker),
        span.source_kind(),
        neutralize_markers(span.locator())
    )
}

fn join_block(text: &str, block: &str) -> String {
    if text.is_empty() {
        block.to_string()
    } else {
        format!("{text}{BLOCK_SEPARATOR}{block}")
    }
}

/// Retrieved text and locators may carry their own `[n]` (footnotes, query
/// strings, file names); rewrite them so that every bracketed marker in the
/// context is one we issued.
fn neutralize_markers(text: &str) -> String {
    MARKER_RE.replace_all(text, "($1)").into_owned()
}

/// Byte offsets just past each sentence terminator.
fn sentence_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let end = idx + c.len_utf8();
            match chars.peek() {
                None => ends.push(end),
                Some((_, next)) if next.is_whitespace() => ends.push(end),
                _ => {}
            }
        }
    }
    ends
}

fn line_ends(text: &str) -> Vec<usize> {
    text.char_indices()
        .filter(|(_, c)| *c == '\n')
        .map(|(idx, _)| idx)
        .collect()
}

fn word_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut in_word = false;
    for (idx, c) in text.char_indices() {
        if c.is_whitespace() {
            if in_word {
                ends.push(idx);
            }
            in_word = false;
        } else {
            in_word = true;
        }
    }
    if in_word {
        ends.push(text.len());
    }
    ends
}

/// First `max_chars` characters, cut back to a word boundary.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}…", trimmed.trim_end())
}
