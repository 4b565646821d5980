pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod server;
pub mod validation;

use std::sync::Arc;

use config::AppConfig;
use engine::llm::OpenRouterClient;
use error::AppError;
use server::AppState;

/// Install logging and serve until Ctrl-C.
pub fn run(config: AppConfig) -> Result<(), AppError> {
    let _log_guard = logging::init(Some(config.log_dir().as_path()));
    logging::install_crash_hook(&config.data_dir);

    tracing::info!("Starting AppForge v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(start(config))
}

async fn start(config: AppConfig) -> Result<(), AppError> {
    if config.llm.api_key.is_none() {
        tracing::warn!("OPENROUTER_API_KEY is not set; generation requests will fail");
    }
    tokio::fs::create_dir_all(&config.projects_dir).await?;
    tracing::info!(
        projects_dir = %config.projects_dir.display(),
        model = %config.llm.model,
        styling = ?config.styling,
        "Configuration loaded"
    );

    let provider = Arc::new(OpenRouterClient::new(config.llm.clone())?);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()?).await?;
    let state = Arc::new(AppState::new(config, provider));
    server::serve(state, listener, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
