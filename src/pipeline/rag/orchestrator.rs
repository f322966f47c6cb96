use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

use crate::config::RagConfig;

use super::citation::{unresolved_markers, AttributionLedger, SourceLine};
use super::context::ContextAssembler;
use super::pool::EvidencePool;
use super::prompt::{
    build_grounded_prompt, build_summary_prompt, HYBRID_SYSTEM_PROMPT, SUMMARY_SYSTEM_PROMPT,
};
use super::retrieval::SourceAdapter;
use super::router::QueryRouter;
use super::tokenizer::CharRatioTokenizer;
use super::types::{
    AssembledContext, EvidenceSpan, GenerationService, Query, RouteDecision, SourceKind, Tokenizer,
};
use super::RagError;

// ═══════════════════════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════════════════════

/// Fires cancellation for one query exchange.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by a run. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token nobody can cancel.
    pub fn never() -> CancelToken {
        let (_, token) = Self::new();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════

/// A source that contributed nothing because it timed out or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceWarning {
    pub kind: SourceKind,
    pub timed_out: bool,
    pub message: String,
}

impl SourceWarning {
    fn from_error(kind: SourceKind, error: &RagError) -> Self {
        Self {
            kind,
            timed_out: matches!(error, RagError::AdapterTimeout { .. }),
            message: error.to_string(),
        }
    }

    fn from_join_error(kind: SourceKind, error: &JoinError) -> Self {
        Self {
            kind,
            timed_out: false,
            message: format!("adapter task did not complete: {error}"),
        }
    }
}

impl fmt::Display for SourceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} source degraded: {}", self.kind, self.message)
    }
}

/// Everything generation needs, produced only after fan-in completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundedContext {
    pub decision: RouteDecision,
    pub context: AssembledContext,
    pub ledger: AttributionLedger,
    pub warnings: Vec<SourceWarning>,
}

impl GroundedContext {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// No evidence found. Generation should answer from general knowledge.
    pub fn no_evidence(&self) -> bool {
        self.context.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundedAnswer {
    pub grounded: GroundedContext,
    /// Generator output, markers passed through verbatim.
    pub text: String,
    /// Markers the answer cites that the ledger does not contain.
    pub unresolved_markers: Vec<usize>,
}

impl GroundedAnswer {
    pub fn sources(&self) -> Vec<SourceLine> {
        self.grounded.ledger.render()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub marker: usize,
    pub locator: String,
    pub source_kind: SourceKind,
    pub summary: String,
}

// ═══════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════

/// Hybrid retrieval orchestrator.
///
/// route → fan out to adapters (concurrent, per-adapter timeout) → pool →
/// assemble → ledger, then optionally generate.
pub struct HybridRagPipeline {
    config: RagConfig,
    router: QueryRouter,
    adapters: BTreeMap<SourceKind, Arc<dyn SourceAdapter>>,
    assembler: ContextAssembler,
    generator: Option<Arc<dyn GenerationService>>,
}

impl HybridRagPipeline {
    pub fn new(config: RagConfig, router: QueryRouter, tokenizer: Arc<dyn Tokenizer>) -> Self {
        let assembler = ContextAssembler::new(tokenizer).with_excerpt_chars(config.excerpt_chars);
        Self {
            config,
            router,
            adapters: BTreeMap::new(),
            assembler,
            generator: None,
        }
    }

    /// Router and tokenizer built from `config` defaults.
    pub fn from_config(config: RagConfig) -> Self {
        let router = QueryRouter::from_config(&config);
        Self::new(config, router, Arc::new(CharRatioTokenizer))
    }

    /// Register the adapter for its source kind, replacing any previous one.
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerationService>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Sources with a registered adapter that reports itself available.
    pub fn available_sources(&self) -> BTreeSet<SourceKind> {
        self.adapters
            .iter()
            .filter(|(_, adapter)| adapter.is_available())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Route, retrieve, pool and assemble for one query.
    ///
    /// Adapter timeouts and failures degrade the run with a warning; only
    /// the failure of every selected source aborts it.
    pub async fn run(&self, query: &Query, cancel: &CancelToken) -> Result<GroundedContext, RagError> {
        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        let decision = self.router.route(query, &self.available_sources())?;

        let mut pool = EvidencePool::new(self.config.dedup_similarity_threshold);
        let warnings = self.gather(&decision, cancel, &mut pool).await?;

        let spans = pool.finalize();
        let context = self.assembler.assemble(&spans, self.config.token_budget);
        let ledger = AttributionLedger::from_context(&context);

        if context.is_empty() {
            tracing::info!(
                session_id = %query.session_id(),
                "No evidence found, generation will answer ungrounded"
            );
        } else {
            tracing::debug!(
                spans = spans.len(),
                cited = ledger.len(),
                tokens = context.token_count,
                truncated = context.truncated(),
                "Context assembled"
            );
        }

        Ok(GroundedContext {
            decision,
            context,
            ledger,
            warnings,
        })
    }

    /// Fan out to every selected adapter and ingest results as they complete.
    async fn gather(
        &self,
        decision: &RouteDecision,
        cancel: &CancelToken,
        pool: &mut EvidencePool,
    ) -> Result<Vec<SourceWarning>, RagError> {
        let query_text: Arc<str> = Arc::from(decision.query().text().trim());
        let top_k = self.config.top_k_per_source;

        let mut warnings = Vec::new();
        let mut tasks = JoinSet::new();
        let mut task_kinds = HashMap::new();
        for &kind in decision.selected_sources() {
            let Some(adapter) = self.adapters.get(&kind) else {
                let error = RagError::AdapterFailure {
                    kind,
                    reason: "no adapter registered".into(),
                };
                warnings.push(SourceWarning::from_error(kind, &error));
                continue;
            };
            let adapter = Arc::clone(adapter);
            let text = Arc::clone(&query_text);
            let timeout = self.config.adapter_timeouts.timeout_for(kind);
            let handle = tasks.spawn(run_adapter(adapter, kind, text, top_k, timeout));
            task_kinds.insert(handle.id(), kind);
        }

        let mut succeeded = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    tracing::info!(
                        session_id = %decision.query().session_id(),
                        "Query exchange cancelled, partial evidence discarded"
                    );
                    return Err(RagError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((kind, Ok(spans), elapsed))) => {
                        tracing::debug!(
                            source = %kind,
                            spans = spans.len(),
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Adapter completed"
                        );
                        succeeded += 1;
                        pool.ingest(spans);
                    }
                    Some(Ok((kind, Err(e), _))) => {
                        tracing::warn!(source = %kind, error = %e, "Evidence source degraded");
                        warnings.push(SourceWarning::from_error(kind, &e));
                    }
                    Some(Err(e)) => match task_kinds.get(&e.id()) {
                        Some(&kind) => {
                            tracing::warn!(source = %kind, error = %e, "Adapter task did not complete");
                            warnings.push(SourceWarning::from_join_error(kind, &e));
                        }
                        None => tracing::warn!(error = %e, "Adapter task did not complete"),
                    },
                },
            }
        }

        if succeeded == 0 {
            tracing::warn!(
                attempted = decision.selected_sources().len(),
                "Every selected evidence source failed"
            );
            return Err(RagError::NoSourceAvailable);
        }
        Ok(warnings)
    }

    /// Run the exchange and generate a grounded answer.
    pub async fn answer(&self, query: &Query, cancel: &CancelToken) -> Result<GroundedAnswer, RagError> {
        let generator = self.require_generator()?;
        let grounded = self.run(query, cancel).await?;

        let prompt = build_grounded_prompt(query.text(), &grounded.context, grounded.decision.mode());
        let task = tokio::task::spawn_blocking(move || generator.generate(HYBRID_SYSTEM_PROMPT, &prompt));

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Query exchange cancelled during generation");
                return Err(RagError::Cancelled);
            }
            joined = task => joined
                .map_err(|e| RagError::Generation(e.to_string()))?
                .map_err(|e| RagError::Generation(e.to_string()))?,
        };

        let text = raw.trim().to_string();
        let unresolved = unresolved_markers(&text, &grounded.ledger);

        Ok(GroundedAnswer {
            grounded,
            text,
            unresolved_markers: unresolved,
        })
    }

    /// Two-sentence summaries of the first `n` distinct locators in the
    /// ledger, document sources first, each over the evidence text the context
    /// carried for it. A source whose summary fails is skipped.
    pub async fn summarize_sources(
        &self,
        ledger: &AttributionLedger,
        n: usize,
    ) -> Result<Vec<SourceSummary>, RagError> {
        let generator = self.require_generator()?;

        let mut entries: Vec<_> = ledger.entries().collect();
        entries.sort_by_key(|(marker, entry)| (entry.source_kind != SourceKind::Document, *marker));

        let mut seen = HashSet::new();
        let jobs: Vec<(usize, String, SourceKind, String)> = entries
            .into_iter()
            .filter(|(_, entry)| seen.insert(entry.locator.clone()))
            .take(n)
            .map(|(marker, entry)| {
                (marker, entry.locator.clone(), entry.source_kind, entry.text.clone())
            })
            .collect();

        tokio::task::spawn_blocking(move || {
            jobs.into_iter()
                .filter_map(|(marker, locator, source_kind, text)| {
                    match generator.generate(SUMMARY_SYSTEM_PROMPT, &build_summary_prompt(&text)) {
                        Ok(summary) => Some(SourceSummary {
                            marker,
                            locator,
                            source_kind,
                            summary: summary.trim().to_string(),
                        }),
                        Err(e) => {
                            tracing::warn!(locator = %locator, error = %e, "Source summary failed");
                            None
                        }
                    }
                })
                .collect::<Vec<SourceSummary>>()
        })
        .await
        .map_err(|e| RagError::Generation(e.to_string()))
    }

    fn require_generator(&self) -> Result<Arc<dyn GenerationService>, RagError> {
        self.generator
            .clone()
            .ok_or_else(|| RagError::Generation("No generation service configured".into()))
    }
}

/// One adapter call on the blocking pool, bounded by its deadline. A call
/// that overruns is abandoned; its thread finishes on its own.
async fn run_adapter(
    adapter: Arc<dyn SourceAdapter>,
    kind: SourceKind,
    text: Arc<str>,
    top_k: usize,
    timeout: Duration,
) -> (SourceKind, Result<Vec<EvidenceSpan>, RagError>, Duration) {
    let started = Instant::now();
    let call = tokio::task::spawn_blocking(move || adapter.retrieve(&text, top_k));
    let outcome = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(RagError::AdapterFailure {
            kind,
            reason: format!("adapter task panicked: {e}"),
        }),
        Err(_) => Err(RagError::AdapterTimeout { kind, timeout }),
    };
    (kind, outcome, started.elapsed())
}
