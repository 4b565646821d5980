use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use ts_rs::TS;

use crate::engine::llm::ChatMessage;
use crate::engine::prompt::build_messages;
use crate::engine::queue::{format_wait_time, QueueInfo, QueueStatus};
use crate::engine::types::{ConversationMessage, FileRecord, ParsedTurn, TurnContext};
use crate::engine::finish_turn;
use crate::error::AppError;
use crate::validation::require_non_empty;

use super::SharedState;

/// Relay buffer between the upstream stream and the HTTP body.
const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationMessage>,
    /// Defaults to whether the history is empty.
    #[serde(default)]
    pub is_first_request: Option<bool>,
}

impl GenerateRequest {
    fn is_first(&self) -> bool {
        self.is_first_request
            .unwrap_or(self.conversation_history.is_empty())
    }

    fn messages(&self, history_window: usize) -> Result<Vec<ChatMessage>, AppError> {
        require_non_empty("prompt", &self.prompt)
            .map_err(|_| AppError::Validation("Invalid prompt".into()))?;
        Ok(build_messages(
            &self.prompt,
            &self.conversation_history,
            self.is_first(),
            history_window,
        ))
    }
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TurnResponse {
    pub turn: ParsedTurn,
    pub files: Vec<FileRecord>,
}

/// POST /api/generate/stream: relay raw model text as it arrives.
///
/// Headers are committed before the upstream call is made, so upstream
/// failures are reported in-band as an `Error:` line.
pub async fn generate_stream(
    State(state): State<SharedState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, AppError> {
    let messages = request.messages(state.config.history_window)?;
    let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(relay(state, messages, tx));

    let body = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

async fn relay(
    state: SharedState,
    messages: Vec<ChatMessage>,
    tx: mpsc::Sender<Result<String, Infallible>>,
) {
    let provider = Arc::clone(&state.provider);
    let opened = state.queue.run(|| provider.open_stream(&messages)).await;
    let mut upstream = match opened {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open upstream stream");
            let _ = tx.send(Ok(format!("\nError: {}\n", e))).await;
            return;
        }
    };

    let mut relayed = 0usize;
    while let Some(item) = upstream.next().await {
        let chunk = match item {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, relayed, "Upstream stream failed");
                format!("\nError: {}\n", e)
            }
        };
        relayed += chunk.len();
        if tx.send(Ok(chunk)).await.is_err() {
            // Client went away; the upstream request is simply dropped
            tracing::debug!(relayed, "Client disconnected mid-stream");
            return;
        }
    }
    tracing::info!(relayed, "Stream relayed");
}

/// POST /api/generate: run a whole turn and return it parsed.
pub async fn generate(
    State(state): State<SharedState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    let messages = request.messages(state.config.history_window)?;
    let provider = Arc::clone(&state.provider);
    let text = state.queue.run(|| provider.complete(&messages)).await?;

    let (turn, files) = finish_turn(&text, TurnContext::finished(request.is_first()));
    tracing::info!(files = files.len(), chars = text.len(), "Turn generated");
    Ok(Json(TurnResponse { turn, files }))
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ParseRequest {
    pub text: String,
    #[serde(default)]
    pub is_first_request: bool,
    #[serde(default)]
    pub complete: bool,
}

/// POST /api/parse: segment a buffer snapshot.
pub async fn parse(Json(request): Json<ParseRequest>) -> Json<TurnResponse> {
    let ctx = TurnContext {
        is_first_request: request.is_first_request,
        complete: request.complete,
    };
    let (turn, files) = finish_turn(&request.text, ctx);
    Json(TurnResponse { turn, files })
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct QueueStatusResponse {
    #[serde(flatten)]
    pub info: QueueInfo,
    pub estimated_wait_time_formatted: String,
    pub status: QueueStatus,
}

/// GET /api/queue-status
pub async fn queue_status(State(state): State<SharedState>) -> Json<QueueStatusResponse> {
    let info = state.queue.info();
    Json(QueueStatusResponse {
        estimated_wait_time_formatted: format_wait_time(info.estimated_wait_time),
        status: QueueStatus::classify(&info),
        info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::llm::LlmError;
    use crate::server::testing::{state_in, ScriptedProvider};

    fn request(prompt: &str) -> GenerateRequest {
        GenerateRequest {
            prompt: prompt.into(),
            conversation_history: Vec::new(),
            is_first_request: None,
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_stream_relays_chunks_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("/// file: a.ts\n".into()),
            Ok("x\n/// endfile\n".into()),
        ]));
        let state = state_in(tmp.path(), provider.clone());

        let response = generate_stream(State(state), Json(request("build"))).await.unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "/// file: a.ts\nx\n/// endfile\n");

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].last().unwrap().content, "build");
    }

    #[tokio::test]
    async fn test_stream_failure_is_in_band() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("partial".into()),
            Err(LlmError::Transport("connection reset".into())),
        ]));
        let state = state_in(tmp.path(), provider);

        let response = generate_stream(State(state), Json(request("build"))).await.unwrap();
        assert!(response.status().is_success());
        let text = body_text(response).await;
        assert!(text.starts_with("partial"));
        assert!(text.contains("Error: network error: connection reset"));
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_in(tmp.path(), Arc::new(ScriptedProvider::text("")));
        let err = generate_stream(State(state), Json(request("   "))).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Invalid prompt"));
    }

    #[tokio::test]
    async fn test_generate_returns_parsed_turn_and_files() {
        let tmp = tempfile::tempdir().unwrap();
        let text = "Here you go.\n/// file: src/App.tsx\nexport default 1\n/// endfile\n/// file: preview.html\n<p>hi</p>\n/// endfile";
        let state = state_in(tmp.path(), Arc::new(ScriptedProvider::text(text)));

        let Json(out) = generate(State(state), Json(request("build"))).await.unwrap();
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].path, "src/App.tsx");
        assert_eq!(out.turn.preview_html, "<p>hi</p>");
        assert!(!out.turn.code.contains("<p>hi</p>"));
    }

    #[tokio::test]
    async fn test_parse_withholds_files_until_complete() {
        let text = "/// file: a.ts\nconst a = 1\n/// endfile";
        let Json(partial) = parse(Json(ParseRequest {
            text: text.into(),
            is_first_request: true,
            complete: false,
        }))
        .await;
        assert!(partial.files.is_empty());
        assert!(partial.turn.code.contains("/// file: a.ts"));

        let Json(done) = parse(Json(ParseRequest {
            text: text.into(),
            is_first_request: true,
            complete: true,
        }))
        .await;
        assert_eq!(done.files.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_status_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_in(tmp.path(), Arc::new(ScriptedProvider::text("")));
        let Json(status) = queue_status(State(state)).await;
        assert_eq!(status.status, QueueStatus::Ready);
        assert_eq!(status.estimated_wait_time_formatted, "0s");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["queueLength"], 0);
        assert_eq!(json["status"], "ready");
    }
}
