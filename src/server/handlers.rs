use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info};

use super::errors::ApiError;
use super::state::AppContext;
use crate::database::sessions::ChatMessage;
use crate::indexer::{BatchReport, FileReport};
use crate::rag::AnswerEvent;

pub const DEFAULT_SESSION_ID: &str = "default";

type AppState = State<Arc<AppContext>>;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub message: String,
    pub document_count: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub document_count: usize,
    pub dimension: Option<usize>,
    pub sessions: usize,
}

/// Uploaded files in a multipart body, in arrival order
async fn read_files(multipart: &mut Multipart) -> Result<Vec<(String, Vec<u8>)>, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(ApiError::bad_request)? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            debug!("Ignoring multipart field without a file name");
            continue;
        };
        let bytes = field.bytes().await.map_err(ApiError::bad_request)?;
        files.push((file_name, bytes.to_vec()));
    }
    Ok(files)
}

pub async fn upload(
    State(ctx): AppState,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut files = read_files(&mut multipart).await?;
    if files.len() != 1 {
        return Err(ApiError::bad_request(format!(
            "Expected exactly one file, got {}",
            files.len()
        )));
    }
    let Some((file_name, bytes)) = files.pop() else {
        return Err(ApiError::bad_request("No file uploaded"));
    };

    let outcome = ctx.indexer.ingest_upload(&file_name, &bytes).await?;
    Ok(Json(UploadResponse {
        status: "success",
        message: format!("Successfully processed {}", outcome.file_name),
        document_count: outcome.document_count,
    }))
}

pub async fn upload_batch(
    State(ctx): AppState,
    mut multipart: Multipart,
) -> Result<Json<BatchReport>, ApiError> {
    let files = read_files(&mut multipart).await?;
    if files.is_empty() {
        return Err(ApiError::bad_request("No files uploaded"));
    }

    let mut report = BatchReport::default();
    for (file_name, bytes) in files {
        let file_report = match ctx.indexer.ingest_upload(&file_name, &bytes).await {
            Ok(outcome) => {
                report.chunks_added += outcome.document_count;
                FileReport {
                    source: outcome.file_name,
                    chunks: outcome.document_count,
                    error: None,
                }
            }
            Err(e) => FileReport {
                source: file_name,
                chunks: 0,
                error: Some(e.to_string()),
            },
        };
        report.files.push(file_report);
    }

    info!("Batch upload: {}", report.summary());
    Ok(Json(report))
}

/// Stream an answer as server-sent events.
///
/// Fragments are unnamed `data:` events; the stream ends with one `done`
/// event or one `error` event carrying the message.
pub async fn chat(
    State(ctx): AppState,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::bad_request("Question must not be empty"));
    }
    if request.session_id.trim().is_empty() {
        return Err(ApiError::bad_request("Session id must not be empty"));
    }

    let answer = ctx
        .orchestrator
        .answer(&request.session_id, question)
        .await?;

    let events = answer.map(|event| {
        let event = match event {
            AnswerEvent::Fragment(text) => Event::default().data(text),
            AnswerEvent::Completed { .. } => Event::default().event("done").data(""),
            AnswerEvent::Failed(error) => Event::default().event("error").data(error.to_string()),
        };
        Ok::<_, Infallible>(event)
    });

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

pub async fn get_history(
    State(ctx): AppState,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let messages = ctx.orchestrator.history(&session_id).await?;
    Ok(Json(HistoryResponse {
        session_id,
        messages,
    }))
}

pub async fn clear_history(
    State(ctx): AppState,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.orchestrator.clear_session(&session_id).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Cleared history for session {}", session_id),
    })))
}

pub async fn clear_all_history(State(ctx): AppState) -> Result<impl IntoResponse, ApiError> {
    ctx.orchestrator.clear_all_sessions().await?;
    Ok(Json(json!({
        "status": "success",
        "message": "Cleared all session history",
    })))
}

pub async fn rebuild(State(ctx): AppState) -> Result<Json<BatchReport>, ApiError> {
    let report = ctx.indexer.rebuild_from_data_dir(|_| {}).await?;
    Ok(Json(report))
}

pub async fn status(State(ctx): AppState) -> Result<Json<StatusResponse>, ApiError> {
    let sessions = ctx.sessions().session_ids().await?.len();
    Ok(Json(StatusResponse {
        status: "ok",
        document_count: ctx.index.count().await,
        dimension: ctx.index.dimension().await,
        sessions,
    }))
}
