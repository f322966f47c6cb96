use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::rag::types::SourceKind;
use crate::pipeline::rag::RagError;

/// Application-level constants
pub const APP_NAME: &str = "HybridRag";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Env var naming an explicit config file.
pub const CONFIG_ENV: &str = "HYBRID_RAG_CONFIG";

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "hybrid_rag=info"
}

/// Get the application data directory
/// ~/HybridRag/ on all platforms
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_NAME))
}

/// Default config file location.
pub fn config_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join("config.json"))
}

// ═══════════════════════════════════════════════════════════
// Runtime configuration
// ═══════════════════════════════════════════════════════════

/// Per-source adapter deadlines, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterTimeouts {
    pub document_secs: f64,
    pub encyclopedia_secs: f64,
    pub web_secs: f64,
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        Self {
            document_secs: 3.0,
            encyclopedia_secs: 3.0,
            web_secs: 8.0,
        }
    }
}

impl AdapterTimeouts {
    pub fn timeout_for(&self, kind: SourceKind) -> Duration {
        let secs = match kind {
            SourceKind::Document => self.document_secs,
            SourceKind::Encyclopedia => self.encyclopedia_secs,
            SourceKind::Web => self.web_secs,
        };
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Endpoints of the HTTP collaborators. Credentials are never stored here:
/// `tavily_api_key_env` names the environment variable that holds the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub ollama_url: String,
    pub ollama_model: String,
    pub ollama_timeout_secs: u64,
    pub wikipedia_url: String,
    pub wikipedia_language: String,
    pub tavily_url: String,
    pub tavily_api_key_env: String,
    pub http_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".into(),
            ollama_model: "llama3.1:8b".into(),
            ollama_timeout_secs: 300,
            wikipedia_url: "https://{lang}.wikipedia.org/w/api.php".into(),
            wikipedia_language: "en".into(),
            tavily_url: "https://api.tavily.com/search".into(),
            tavily_api_key_env: "TAVILY_API_KEY".into(),
            http_timeout_secs: 10,
        }
    }
}

/// Recognized options for a retrieval run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Default for `Query::web_search_enabled` when the caller does not choose.
    pub web_search_enabled: bool,
    pub token_budget: usize,
    pub top_k_per_source: usize,
    pub adapter_timeouts: AdapterTimeouts,
    pub dedup_similarity_threshold: f32,
    /// Documents are skipped only above this out-of-corpus confidence.
    pub out_of_corpus_threshold: f32,
    pub temporal_cues: Vec<String>,
    /// Years after this one count as temporal cues.
    pub corpus_latest_year: Option<i32>,
    /// Characters kept in each ledger excerpt.
    pub excerpt_chars: usize,
    pub services: ServiceConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            web_search_enabled: false,
            token_budget: 3000,
            top_k_per_source: 5,
            adapter_timeouts: AdapterTimeouts::default(),
            dedup_similarity_threshold: 0.9,
            out_of_corpus_threshold: 0.8,
            temporal_cues: default_temporal_cues(),
            corpus_latest_year: None,
            excerpt_chars: 200,
            services: ServiceConfig::default(),
        }
    }
}

pub fn default_temporal_cues() -> Vec<String> {
    [
        "latest",
        "today",
        "tonight",
        "yesterday",
        "current",
        "currently",
        "recent",
        "recently",
        "news",
        "breaking",
        "right now",
        "this week",
        "this month",
        "this year",
        "upcoming",
        "live",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl RagConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, RagError> {
        let raw = std::fs::read_to_string(path)?;
        let config: RagConfig = serde_json::from_str(&raw)
            .map_err(|e| RagError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// `$HYBRID_RAG_CONFIG`, then `~/HybridRag/config.json`, then defaults.
    pub fn load_or_default() -> Result<Self, RagError> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&explicit));
        }
        match config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.token_budget == 0 {
            return Err(RagError::Config("token_budget must be positive".into()));
        }
        if self.top_k_per_source == 0 {
            return Err(RagError::Config("top_k_per_source must be positive".into()));
        }
        for kind in SourceKind::ALL {
            if self.adapter_timeouts.timeout_for(kind).is_zero() {
                return Err(RagError::Config(format!("{kind} timeout must be positive")));
            }
        }
        for (name, value) in [
            ("dedup_similarity_threshold", self.dedup_similarity_threshold),
            ("out_of_corpus_threshold", self.out_of_corpus_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(RagError::Config(format!("{name} must be in (0, 1], got {value}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir().unwrap();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("HybridRag"));
    }

    #[test]
    fn config_path_under_app_data() {
        let path = config_path().unwrap();
        assert!(path.starts_with(app_data_dir().unwrap()));
        assert!(path.ends_with("config.json"));
    }

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.adapter_timeouts.timeout_for(SourceKind::Web), Duration::from_secs(8));
        assert_eq!(
            config.adapter_timeouts.timeout_for(SourceKind::Document),
            Duration::from_secs(3)
        );
        assert!(!config.web_search_enabled);
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "web_search_enabled": true, "token_budget": 500, "adapter_timeouts": { "web_secs": 2.5 } }"#,
        )
        .unwrap();

        let config = RagConfig::load(&path).unwrap();
        assert!(config.web_search_enabled);
        assert_eq!(config.token_budget, 500);
        assert_eq!(config.top_k_per_source, 5);
        assert_eq!(
            config.adapter_timeouts.timeout_for(SourceKind::Web),
            Duration::from_millis(2500)
        );
        assert_eq!(config.adapter_timeouts.encyclopedia_secs, 3.0);
        assert_eq!(config.services.tavily_api_key_env, "TAVILY_API_KEY");
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(RagConfig::load(&path), Err(RagError::Config(_))));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = RagConfig::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(RagError::Io(_))));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = RagConfig::default();
        config.token_budget = 0;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.dedup_similarity_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.adapter_timeouts.web_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}
