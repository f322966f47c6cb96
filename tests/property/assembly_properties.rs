use std::sync::Arc;

use hybrid_rag::pipeline::rag::citation::{cited_markers, markers_consistent, AttributionLedger};
use hybrid_rag::pipeline::rag::context::ContextAssembler;
use hybrid_rag::pipeline::rag::pool::EvidencePool;
use hybrid_rag::pipeline::rag::tokenizer::{CharRatioTokenizer, WordTokenizer};
use hybrid_rag::pipeline::rag::types::{EvidenceSpan, SourceKind, Tokenizer};
use proptest::prelude::*;

fn kind_strategy() -> impl Strategy<Value = SourceKind> {
    prop_oneof![
        Just(SourceKind::Document),
        Just(SourceKind::Encyclopedia),
        Just(SourceKind::Web),
    ]
}

fn span_strategy() -> impl Strategy<Value = EvidenceSpan> {
    (
        kind_strategy(),
        "[a-z]{1,8}(\\[[0-9]\\])?(\\.md)?",
        "([A-Za-z]{1,9}( \\[[0-9]\\])?[ .\n]){1,40}",
        -1.0f32..1.0f32,
        0usize..10,
    )
        .prop_map(|(kind, locator, text, raw, rank)| {
            EvidenceSpan::new(kind, locator, text.trim().to_string(), raw, rank)
        })
}

fn spans_strategy() -> impl Strategy<Value = Vec<EvidenceSpan>> {
    prop::collection::vec(span_strategy(), 0..12)
}

fn finalize(spans: Vec<EvidenceSpan>) -> Vec<EvidenceSpan> {
    let mut pool = EvidencePool::default();
    pool.ingest(spans);
    pool.finalize()
}

fn signature(spans: &[EvidenceSpan]) -> Vec<(String, u32, usize)> {
    let mut sig: Vec<_> = spans
        .iter()
        .map(|s| (s.id().to_string(), s.normalized_score().to_bits(), s.rank()))
        .collect();
    sig.sort();
    sig
}

proptest! {
    #[test]
    fn token_count_never_exceeds_budget(spans in spans_strategy(), budget in 0usize..400) {
        let tokenizer = CharRatioTokenizer;
        let ctx = ContextAssembler::new(Arc::new(tokenizer)).assemble(&finalize(spans), budget);
        prop_assert!(ctx.token_count <= budget, "{} > {}", ctx.token_count, budget);
        prop_assert_eq!(ctx.token_count, tokenizer.count_tokens(&ctx.text));
    }

    #[test]
    fn word_budget_is_respected(spans in spans_strategy(), budget in 0usize..120) {
        let ctx = ContextAssembler::new(Arc::new(WordTokenizer)).assemble(&spans, budget);
        prop_assert!(ctx.token_count <= budget);
        prop_assert!(ctx.citations.iter().skip(1).all(|c| !c.truncated));
    }

    #[test]
    fn ingesting_twice_is_idempotent(spans in spans_strategy()) {
        let once = finalize(spans.clone());
        let mut doubled = spans.clone();
        doubled.extend(spans);
        let twice = finalize(doubled);
        prop_assert_eq!(signature(&once), signature(&twice));
    }

    #[test]
    fn finalized_ids_are_unique_and_scores_normalized(spans in spans_strategy()) {
        let out = finalize(spans);
        let mut ids: Vec<&str> = out.iter().map(|s| s.id()).collect();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), out.len());
        prop_assert!(out.iter().all(|s| (0.0..=1.0).contains(&s.normalized_score())));
    }

    #[test]
    fn pool_is_stable_under_permutation(
        (spans, shuffled) in spans_strategy().prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        prop_assert_eq!(signature(&finalize(spans)), signature(&finalize(shuffled)));
    }

    #[test]
    fn assembly_is_stable_under_permutation(
        (spans, shuffled) in spans_strategy().prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
        budget in 0usize..600,
    ) {
        let assembler = ContextAssembler::default();
        prop_assert_eq!(
            assembler.assemble(&finalize(spans), budget),
            assembler.assemble(&finalize(shuffled), budget)
        );
    }

    #[test]
    fn markers_and_ledger_are_a_bijection(spans in spans_strategy(), budget in 0usize..600) {
        let ctx = ContextAssembler::default().assemble(&finalize(spans), budget);
        prop_assert!(markers_consistent(&ctx));
        let ledger = AttributionLedger::from_context(&ctx);
        prop_assert_eq!(ledger.markers(), cited_markers(&ctx.text));
        let expected: Vec<usize> = (1..=ctx.citations.len()).collect();
        let markers: Vec<usize> = ctx.citations.iter().map(|c| c.marker).collect();
        prop_assert_eq!(markers, expected);
    }
}
