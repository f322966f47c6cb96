use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::{marker_label, AssembledContext, SourceKind};

/// Bracketed numeric citation marker, e.g. `[3]`.
pub(crate) static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("marker pattern is valid"));

/// Provenance of one citation marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub span_id: String,
    pub source_kind: SourceKind,
    pub locator: String,
    pub title: Option<String>,
    /// Evidence text as it appeared in the context.
    pub text: String,
    pub excerpt: String,
    pub truncated: bool,
}

/// One rendered "Sources" line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLine {
    pub marker: usize,
    pub source_kind: SourceKind,
    pub locator: String,
}

impl fmt::Display for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            marker_label(self.marker),
            self.source_kind,
            self.locator
        )
    }
}

/// Marker → provenance for one query-answer exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionLedger {
    entries: BTreeMap<usize, LedgerEntry>,
}

impl AttributionLedger {
    pub fn from_context(context: &AssembledContext) -> Self {
        let entries = context
            .citations
            .iter()
            .map(|c| {
                (
                    c.marker,
                    LedgerEntry {
                        span_id: c.span_id.clone(),
                        source_kind: c.source_kind,
                        locator: c.locator.clone(),
                        title: c.title.clone(),
                        text: c.text.clone(),
                        excerpt: c.excerpt.clone(),
                        truncated: c.truncated,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, marker: usize) -> Option<&LedgerEntry> {
        self.entries.get(&marker)
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &LedgerEntry)> {
        self.entries.iter().map(|(m, e)| (*m, e))
    }

    pub fn markers(&self) -> BTreeSet<usize> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pure projection for a "Sources" display, in marker order.
    pub fn render(&self) -> Vec<SourceLine> {
        self.entries
            .iter()
            .map(|(marker, entry)| SourceLine {
                marker: *marker,
                source_kind: entry.source_kind,
                locator: entry.locator.clone(),
            })
            .collect()
    }
}

impl fmt::Display for AttributionLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.render().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{line}")?;
        }
        Ok(())
    }
}

/// All `[n]` markers present in a text.
pub fn cited_markers(text: &str) -> BTreeSet<usize> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<usize>().ok())
        .collect()
}

/// Markers a generated answer cites that the ledger does not know.
/// The answer itself is never rewritten.
pub fn unresolved_markers(answer: &str, ledger: &AttributionLedger) -> Vec<usize> {
    let unknown: Vec<usize> = cited_markers(answer)
        .into_iter()
        .filter(|m| ledger.get(*m).is_none())
        .collect();
    if !unknown.is_empty() {
        tracing::warn!(
            markers = ?unknown,
            known = ledger.len(),
            "Answer cites markers absent from the attribution ledger"
        );
    }
    unknown
}

/// Every marker in the context text has exactly one citation and every
/// citation is referenced in the text.
pub fn markers_consistent(context: &AssembledContext) -> bool {
    let in_text = cited_markers(&context.text);
    let listed: Vec<usize> = context.citations.iter().map(|c| c.marker).collect();
    let listed_set: BTreeSet<usize> = listed.iter().copied().collect();
    listed.len() == listed_set.len() && in_text == listed_set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rag::types::Citation;

    fn citation(marker: usize, kind: SourceKind, locator: &str) -> Citation {
        Citation {
            marker,
            span_id: format!("span{marker}"),
            source_kind: kind,
            locator: locator.to_string(),
            title: None,
            text: format!("text {marker}"),
            excerpt: format!("excerpt {marker}"),
            relevance_score: 1.0,
            truncated: false,
        }
    }

    fn context() -> AssembledContext {
        AssembledContext {
            text: "[1] (ENCYCLOPEDIA: France)\nParis.\n\n[2] (WEB: https://a.example)\nNews.".into(),
            token_count: 12,
            citations: vec![
                citation(1, SourceKind::Encyclopedia, "France"),
                citation(2, SourceKind::Web, "https://a.example"),
            ],
        }
    }

    #[test]
    fn ledger_mirrors_citations() {
        let ledger = AttributionLedger::from_context(&context());
        assert_eq!(ledger.len(), 2);
        let entry = ledger.get(1).unwrap();
        assert_eq!(entry.source_kind, SourceKind::Encyclopedia);
        assert_eq!(entry.locator, "France");
        assert!(ledger.get(3).is_none());
    }

    #[test]
    fn render_lists_marker_kind_locator() {
        let lines = AttributionLedger::from_context(&context()).render();
        assert_eq!(
            lines[0],
            SourceLine {
                marker: 1,
                source_kind: SourceKind::Encyclopedia,
                locator: "France".into(),
            }
        );
        assert_eq!(lines[1].to_string(), "[2] WEB: https://a.example");
    }

    #[test]
    fn display_joins_lines() {
        let ledger = AttributionLedger::from_context(&context());
        assert_eq!(
            ledger.to_string(),
            "[1] ENCYCLOPEDIA: France\n[2] WEB: https://a.example"
        );
    }

    #[test]
    fn empty_ledger_renders_nothing() {
        let ledger = AttributionLedger::from_context(&AssembledContext::default());
        assert!(ledger.is_empty());
        assert!(ledger.render().is_empty());
        assert_eq!(ledger.to_string(), "");
    }

    #[test]
    fn cited_markers_extracts_numbers() {
        let markers = cited_markers("Paris [1] is large [2][1]. Not a marker: [x] [ 3 ]");
        assert_eq!(markers.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn unresolved_markers_reports_unknown() {
        let ledger = AttributionLedger::from_context(&context());
        assert!(unresolved_markers("Paris [1], news [2].", &ledger).is_empty());
        assert_eq!(unresolved_markers("See [2] and [7].", &ledger), vec![7]);
    }

    #[test]
    fn markers_consistent_detects_orphans() {
        assert!(markers_consistent(&context()));
        assert!(markers_consistent(&AssembledContext::default()));

        let mut orphan = context();
        orphan.citations.push(citation(3, SourceKind::Document, "a.pdf"));
        assert!(!markers_consistent(&orphan));

        let mut dangling = context();
        dangling.text.push_str(" [9]");
        assert!(!markers_consistent(&dangling));
    }
}
