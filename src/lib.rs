pub mod artifacts; // Statement + certificate generation
pub mod backend; // Inference capability interface
pub mod config;
pub mod db;
pub mod models;
pub mod notify; // Run alerting
pub mod pipeline;
pub mod pipeline_config;
pub mod watch; // Watch-folder ingestion

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process. RUST_LOG wins when set; otherwise
/// the application default filter applies.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
