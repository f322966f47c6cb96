pub mod config;
pub mod pipeline;

pub use pipeline::rag::orchestrator::{CancelHandle, CancelToken, HybridRagPipeline};
pub use pipeline::rag::{RagError, ServiceError};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` wins over the default filter.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
