use super::types::Tokenizer;

/// English text averages ~4 chars/token for subword tokenizers.
const CHARS_PER_TOKEN_EN: usize = 4;
/// French text averages ~3.3 chars/token due to longer words and diacritics.
/// Use a conservative estimate to avoid exceeding token budget.
const CHARS_PER_TOKEN_FR: usize = 3;

/// Detect if text is predominantly French using common French markers.
fn detect_french_content(text: &str) -> bool {
    let lower = text.to_lowercase();
    let french_markers = [
        " le ", " la ", " les ", " des ", " du ", " un ", " une ",
        " de ", " est ", " sont ", " avec ", " pour ", " dans ",
        " qui ", " que ", " ce ", " cette ", " ces ",
        "é", "è", "ê", "à", "ù", "ç", "ô", "î",
    ];
    let hits: usize = french_markers.iter().filter(|m| lower.contains(*m)).count();
    hits >= 5
}

/// Heuristic tokenizer: characters divided by a language-aware ratio, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharRatioTokenizer;

impl CharRatioTokenizer {
    fn ratio(text: &str) -> usize {
        if detect_french_content(text) {
            CHARS_PER_TOKEN_FR
        } else {
            CHARS_PER_TOKEN_EN
        }
    }
}

impl Tokenizer for CharRatioTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(Self::ratio(text))
    }
}

/// Whitespace-separated words. Useful when budgets are expressed in words.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

// ═══════════════════════════════════════════════════════════
// HuggingFace tokenizer (`hf-tokenizer` feature)
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use std::path::Path;

    use super::Tokenizer;
    use crate::pipeline::rag::ServiceError;

    /// Exact counts from a `tokenizer.json` matching the generation model.
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
    }

    impl HfTokenizer {
        pub fn from_file(path: &Path) -> Result<Self, ServiceError> {
            let inner = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| ServiceError::Tokenizer(format!("Tokenizer load failed: {e}")))?;
            tracing::info!("Tokenizer loaded from {}", path.display());
            Ok(Self { inner })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn count_tokens(&self, text: &str) -> usize {
            match self.inner.encode(text, false) {
                Ok(encoding) => encoding.get_ids().len(),
                Err(e) => {
                    // Fall back to an overestimate so budgets stay safe.
                    tracing::warn!(error = %e, "Tokenization failed, using byte count");
                    text.len()
                }
            }
        }
    }
}

#[cfg(feature = "hf-tokenizer")]
pub use hf::HfTokenizer;
