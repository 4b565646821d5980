//! HTTP surface.

mod generate;
mod preview;
mod projects;

use std::future::Future;
use std::sync::Arc;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::engine::devserver::{DevServerManager, InMemoryRegistry, PortMappingStore};
use crate::engine::llm::ChatProvider;
use crate::engine::locks::ProjectLocks;
use crate::engine::queue::{QueueSettings, RequestQueue};
use crate::engine::workspace::ProjectStore;
use crate::error::AppError;

/// Shared state for every handler.
pub struct AppState {
    pub config: AppConfig,
    pub provider: Arc<dyn ChatProvider>,
    pub queue: RequestQueue,
    pub store: ProjectStore,
    pub locks: Arc<ProjectLocks>,
    pub devservers: DevServerManager,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: AppConfig, provider: Arc<dyn ChatProvider>) -> Self {
        let store = ProjectStore::new(&config.projects_dir);
        let locks = Arc::new(ProjectLocks::new());
        let devservers = DevServerManager::new(
            config.preview.clone(),
            store.clone(),
            Arc::new(InMemoryRegistry::new()),
            Arc::new(PortMappingStore::new(&config.port_mapping_file)),
            locks.clone(),
        );
        Self {
            queue: RequestQueue::new(QueueSettings::from(&config.queue)),
            provider,
            store,
            locks,
            devservers,
            config,
        }
    }
}

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/projects", post(projects::create_project))
        .route("/api/generate/stream", post(generate::generate_stream))
        .route("/api/generate", post(generate::generate))
        .route("/api/parse", post(generate::parse))
        .route("/api/queue-status", get(generate::queue_status))
        .route("/api/save-project", post(projects::save_project))
        .route("/api/validate-project", post(projects::validate_project))
        .route("/api/fix-markdown", post(projects::fix_markdown))
        .route("/api/node-preview", post(preview::node_preview))
        .route("/api/live-preview/{project_id}", get(preview::live_preview))
        .route("/api/preview/compose", post(preview::compose))
        .route("/api/preview/{project_id}", get(preview::project_preview))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves, then stop supervised dev servers.
pub async fn serve(
    state: SharedState,
    listener: tokio::net::TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    let addr = listener.local_addr()?;
    tracing::info!("AppForge server listening on http://{}", addr);

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("AppForge server shutting down");
    state.devservers.shutdown();
    Ok(())
}

/// Health check endpoint.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "appforge" }))
}

/// Run blocking filesystem work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {e}")))?
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider and state builder for handler tests.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::stream::{self, StreamExt};

    use super::*;
    use crate::engine::llm::{ChatMessage, LlmError, TextStream};

    /// Replays canned chunks; records the messages of each call.
    pub struct ScriptedProvider {
        pub chunks: Vec<Result<String, LlmError>>,
        pub calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        pub fn new(chunks: Vec<Result<String, LlmError>>) -> Self {
            Self { chunks, calls: Mutex::new(Vec::new()) }
        }

        pub fn text(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            let mut out = String::new();
            for chunk in &self.chunks {
                out.push_str(chunk.as_ref().map_err(Clone::clone)?);
            }
            Ok(out)
        }

        async fn open_stream(&self, messages: &[ChatMessage]) -> Result<TextStream, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok(stream::iter(self.chunks.clone()).boxed())
        }
    }

    pub fn state_in(dir: &std::path::Path, provider: Arc<dyn ChatProvider>) -> SharedState {
        let mut config = AppConfig::default();
        config.data_dir = dir.to_path_buf();
        config.projects_dir = dir.join("projects");
        config.port_mapping_file = dir.join(".port-mapping.json");
        config.preview.auto_start = false;
        config.queue.min_interval_ms = 0;
        config.queue.base_delay_ms = 1;
        config.queue.max_delay_ms = 1;
        Arc::new(AppState::new(config, provider))
    }
}
