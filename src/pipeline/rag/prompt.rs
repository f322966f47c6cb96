use super::types::{AssembledContext, RouteMode};

pub const HYBRID_SYSTEM_PROMPT: &str = r#"You are an expert research assistant. You may be given evidence from three kinds of sources:
1. DOCUMENT: private data from the user's indexed files.
2. ENCYCLOPEDIA: general reference summaries.
3. WEB: real-time information from the internet.

RULES:
1. Ground every statement in the provided evidence.
2. If sources disagree, prefer DOCUMENT evidence for private or organization-specific facts, and mention WEB evidence for broader or current context.
3. If an answer needs several sources, blend them naturally.
4. Do not repeat the evidence verbatim.
5. Cite every claim with the bracketed marker of its evidence block, exactly as given, e.g. [1] or [2]. Never invent markers.
6. If the evidence is insufficient, say so clearly."#;

pub const NO_EVIDENCE_NOTICE: &str = "No grounding evidence is available for this question. \
Answer from general knowledge, state clearly that the answer is not backed by any source, \
and do not use citation markers.";

pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You summarize source excerpts for a reader. Reply with exactly two sentences.";

/// Build the user prompt for grounded answer generation.
pub fn build_grounded_prompt(query: &str, context: &AssembledContext, mode: RouteMode) -> String {
    let mut prompt = String::new();

    if context.is_empty() {
        prompt.push_str(NO_EVIDENCE_NOTICE);
        prompt.push_str("\n\n");
    } else {
        prompt.push_str(&format!("<EVIDENCE mode=\"{}\">\n", mode.label()));
        prompt.push_str(&context.text);
        prompt.push_str("\n</EVIDENCE>\n\n");
    }

    prompt.push_str(&format!("Question: {query}\n\n"));
    if context.is_empty() {
        prompt.push_str("Answer:");
    } else {
        prompt.push_str("Answer using the evidence above, citing markers inline.");
    }

    prompt
}

/// Prompt asking for a two-sentence summary of one source's evidence text.
pub fn build_summary_prompt(text: &str) -> String {
    format!("Summarize the key points of this source in 2 sentences:\n\n{text}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rag::types::{Citation, SourceKind};

    fn context(text: &str) -> AssembledContext {
        AssembledContext {
            text: text.to_string(),
            token_count: text.len() / 4,
            citations: vec![Citation {
                marker: 1,
                span_id: "abc".into(),
                source_kind: SourceKind::Document,
                locator: "report.pdf#p3".into(),
                title: None,
                text: "Revenue grew 12% in Q3.".into(),
                excerpt: "Revenue grew".into(),
                relevance_score: 1.0,
                truncated: false,
            }],
        }
    }

    #[test]
    fn system_prompt_requires_markers_and_authority() {
        assert!(HYBRID_SYSTEM_PROMPT.contains("bracketed marker"));
        assert!(HYBRID_SYSTEM_PROMPT.contains("prefer DOCUMENT"));
        assert!(HYBRID_SYSTEM_PROMPT.contains("insufficient"));
    }

    #[test]
    fn prompt_contains_query_and_evidence() {
        let ctx = context("[1] (DOCUMENT: report.pdf#p3)\nRevenue grew 12%.");
        let prompt = build_grounded_prompt("How did revenue change?", &ctx, RouteMode::Internal);
        assert!(prompt.contains("How did revenue change?"));
        assert!(prompt.contains("[1] (DOCUMENT: report.pdf#p3)"));
        assert!(prompt.contains("mode=\"Document-based\""));
        assert!(!prompt.contains(NO_EVIDENCE_NOTICE));
    }

    #[test]
    fn empty_context_uses_general_knowledge_notice() {
        let prompt = build_grounded_prompt(
            "Who wrote Hamlet?",
            &AssembledContext::default(),
            RouteMode::Encyclopedia,
        );
        assert!(prompt.starts_with(NO_EVIDENCE_NOTICE));
        assert!(prompt.contains("Who wrote Hamlet?"));
        assert!(!prompt.contains("<EVIDENCE"));
    }

    #[test]
    fn summary_prompt_embeds_source_text() {
        let prompt = build_summary_prompt("Paris is the capital of France.");
        assert!(prompt.contains("2 sentences"));
        assert!(prompt.ends_with("Paris is the capital of France."));
    }
}
