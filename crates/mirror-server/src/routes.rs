use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt as _;
use mirror_ai::tasks::{
    ActionContext, ActionTask, ChatOutput, CheckinInput, CheckinOutput, GoalContext,
    ReframeOutput, future_self_reply_request,
};
use mirror_ai::{BinaryPart, FallbackReply, StreamEvent, TurnRecord, TurnRequest};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::ImageFetcher;
use crate::error::ApiError;
use crate::safety::SAFETY_NOTICE;

const IMAGE_FETCH_FAILED: &str = "Failed to fetch image.";
const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ChatPayload {
    session_id: String,
    goal: GoalContext,
    user_message: String,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ReframePayload {
    session_id: String,
    goal: GoalContext,
    image_url: String,
    #[serde(default)]
    user_context_text: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ActionGeneratePayload {
    session_id: String,
    goal: GoalContext,
    context: ActionContext,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct CheckinPayload {
    action_task_id: String,
    photo_url: String,
    #[serde(flatten)]
    input: CheckinInput,
}

#[derive(serde::Serialize)]
struct IdentifiedActionTask {
    id: uuid::Uuid,
    #[serde(flatten)]
    task: ActionTask,
}

#[derive(serde::Serialize)]
struct ActionResponse {
    action_task: IdentifiedActionTask,
}

#[derive(serde::Serialize)]
struct CheckinResponse {
    #[serde(flatten)]
    feedback: CheckinOutput,
    checkin_id: uuid::Uuid,
    action_task_id: String,
}

fn parse_payload<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "invalid payload");
        ApiError::InvalidPayload
    })
}

fn require_non_empty(value: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::InvalidPayload);
    }
    Ok(())
}

fn require_http_url(value: &str) -> Result<reqwest::Url, ApiError> {
    match reqwest::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => Err(ApiError::InvalidPayload),
    }
}

pub(crate) async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Streams one conversational turn.
pub(crate) async fn chat_stream(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: ChatPayload = parse_payload(&body)?;
    require_non_empty(&payload.user_message)?;

    if state.safety.is_blocked(&payload.user_message) {
        info!(session_id = %payload.session_id, "chat turn screened out");
        return Ok(Json(FallbackReply::safety_notice(SAFETY_NOTICE)).into_response());
    }

    let request = future_self_reply_request(&payload.goal, &payload.user_message).map_err(|e| {
        debug!(error = %e, "invalid chat request");
        ApiError::InvalidPayload
    })?;
    let turn = state
        .turns
        .start(TurnRequest {
            session_id: payload.session_id.clone(),
            user_message: payload.user_message,
            request,
        })
        .await?;
    info!(session_id = %payload.session_id, turn_id = %turn.turn_id(), "chat turn streaming");

    let events = turn.into_events().map(|event: StreamEvent| {
        Ok::<_, Infallible>(
            Event::default()
                .event(event.kind())
                .data(event.payload().to_string()),
        )
    });
    Ok(Sse::new(events).into_response())
}

/// Single-shot structured chat reply, persisted as one turn.
pub(crate) async fn chat_structured(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ChatOutput>, ApiError> {
    let payload: ChatPayload = parse_payload(&body)?;
    require_non_empty(&payload.user_message)?;

    let output = state
        .tasks
        .future_self_chat(&payload.goal, &payload.user_message)
        .await?;

    let assistant = serde_json::to_string(&output)
        .map_err(|e| ApiError::Internal(format!("failed to encode chat output: {e}")))?;
    let record = TurnRecord {
        session_id: payload.session_id,
        turn_id: uuid::Uuid::new_v4(),
        user: payload.user_message,
        assistant,
    };
    state.store.append_turn(record).await.map_err(|e| {
        warn!(error = %e, "failed to persist structured chat turn");
        ApiError::Internal(e.to_string())
    })?;
    Ok(Json(output))
}

pub(crate) async fn reframe(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ReframeOutput>, ApiError> {
    let payload: ReframePayload = parse_payload(&body)?;
    let url = require_http_url(&payload.image_url)?;

    let image = fetch_image(&state.images, url).await?;
    let output = state
        .tasks
        .reframe(&payload.goal, payload.user_context_text.as_deref(), image)
        .await?;
    info!(session_id = %payload.session_id, deltas = output.future_deltas.len(), "reframe generated");
    Ok(Json(output))
}

pub(crate) async fn action_generate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<impl serde::Serialize>, ApiError> {
    let payload: ActionGeneratePayload = parse_payload(&body)?;

    let output = state.tasks.action_task(&payload.goal, &payload.context).await?;
    let id = uuid::Uuid::new_v4();
    info!(session_id = %payload.session_id, action_task_id = %id, "action task generated");
    Ok(Json(ActionResponse {
        action_task: IdentifiedActionTask {
            id,
            task: output.action_task,
        },
    }))
}

pub(crate) async fn action_checkin(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<impl serde::Serialize>, ApiError> {
    let payload: CheckinPayload = parse_payload(&body)?;
    require_http_url(&payload.photo_url)?;

    let feedback = state.tasks.checkin_feedback(&payload.input).await?;
    Ok(Json(CheckinResponse {
        feedback,
        checkin_id: uuid::Uuid::new_v4(),
        action_task_id: payload.action_task_id,
    }))
}

async fn fetch_image(fetcher: &ImageFetcher, url: reqwest::Url) -> Result<BinaryPart, ApiError> {
    let response = fetcher.http.get(url.clone()).send().await.map_err(|e| {
        warn!(%url, error = %e, "image fetch failed");
        ApiError::BadGateway(IMAGE_FETCH_FAILED)
    })?;
    let status = response.status();
    if !status.is_success() {
        warn!(%url, %status, "image fetch returned non-success status");
        return Err(ApiError::BadGateway(IMAGE_FETCH_FAILED));
    }
    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_IMAGE_MIME)
        .to_string();
    let data = response.bytes().await.map_err(|e| {
        warn!(%url, error = %e, "image body read failed");
        ApiError::BadGateway(IMAGE_FETCH_FAILED)
    })?;
    if data.is_empty() {
        return Err(ApiError::BadGateway(IMAGE_FETCH_FAILED));
    }
    debug!(%url, %mime_type, bytes = data.len(), "image fetched");
    Ok(BinaryPart::new(mime_type, data))
}
