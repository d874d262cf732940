//! HTTP surface: the OpenAI-compatible chat endpoint and the model list.

use std::convert::Infallible;
use std::sync::Arc;

use agyproxy_common::{Mode, ProxyError};
use agyproxy_core::{ProxyOrchestrator, ProxyReply};
use agyproxy_protocol::openai::{ChatCompletionRequest, ErrorBody};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ProxyOrchestrator>,
    /// Which credential class this listener serves.
    pub mode: Mode,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/quota", get(quota))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    // A body axum cannot parse gets the same normalized error shape as
    // every other failure, not the extractor's plain-text default.
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_body_response(rejection),
    };
    match state.orchestrator.chat_completion(state.mode, request).await {
        Ok(ProxyReply::Completion(response)) => Json(response).into_response(),
        Ok(ProxyReply::Stream(frames)) => sse_response(frames),
        Err(err) => error_response(err),
    }
}

async fn list_models(State(state): State<AppState>) -> Response {
    match state.orchestrator.list_models(state.mode).await {
        Ok(list) => Json(list).into_response(),
        Err(err) => error_response(err),
    }
}

async fn quota(State(state): State<AppState>) -> Response {
    match state.orchestrator.quota(state.mode).await {
        Ok(quota) => Json(quota).into_response(),
        Err(err) => error_response(err),
    }
}

fn sse_response(frames: tokio::sync::mpsc::Receiver<bytes::Bytes>) -> Response {
    let stream = futures_util::StreamExt::map(ReceiverStream::new(frames), Ok::<_, Infallible>);
    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response
}

fn invalid_body_response(rejection: JsonRejection) -> Response {
    debug!(detail = %rejection.body_text(), "rejected request body");
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new("invalid_request", rejection.body_text())),
    )
        .into_response()
}

fn error_response(err: ProxyError) -> Response {
    debug!(error = %err, code = err.code(), "request failed");
    let status = status_for(&err);
    (status, Json(ErrorBody::new(err.code(), err.to_string()))).into_response()
}

fn status_for(err: &ProxyError) -> StatusCode {
    match err {
        ProxyError::NoEligibleCredential(_) | ProxyError::CredentialExhausted => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ProxyError::TokenRefreshFailed(_) => StatusCode::BAD_GATEWAY,
        ProxyError::Upstream { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
        ProxyError::Translation(_) => StatusCode::BAD_GATEWAY,
        ProxyError::ClientDisconnected => StatusCode::BAD_REQUEST,
    }
}
