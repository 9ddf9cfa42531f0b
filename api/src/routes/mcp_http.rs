use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use uuid::Uuid;
use vision_core::{Credential, SessionError, SessionId};
use vision_mcp_runtime::{InvocationContext, RpcError, error_response, is_initialize_request};

use crate::error::AppError;
use crate::state::AppState;

const MCP_PATH: &str = "/mcp";
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const API_KEY_HEADER: &str = "x-api-key";

pub fn router() -> Router<AppState> {
    Router::new().route(MCP_PATH, post(mcp_post).get(mcp_get).delete(mcp_delete))
}

async fn mcp_get() -> Response {
    // No server-initiated stream.
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let supplied = session_from_headers(&headers)?;

    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            let reply = error_response(Value::Null, RpcError::parse_error());
            return Ok((StatusCode::OK, Json(reply)).into_response());
        }
    };

    // Ids are only ever issued here; a client cannot pick one by initializing with it.
    let initializing = is_initialize_request(&incoming);
    let session = if initializing {
        Some(mint_session_id()?)
    } else {
        supplied
    };

    if initializing {
        if let Some(session) = &session {
            bind_supplied_credential(&state, session, &headers).await?;
        }
    }

    let context = InvocationContext::new(session.as_ref().map(|s| s.as_str().to_string()));
    let responses = state.mcp.handle_incoming_message(&context, incoming).await;

    let mut response = if responses.is_empty() {
        StatusCode::ACCEPTED.into_response()
    } else if responses.len() == 1 {
        (
            StatusCode::OK,
            Json(responses.into_iter().next().unwrap_or(Value::Null)),
        )
            .into_response()
    } else {
        (StatusCode::OK, Json(Value::Array(responses))).into_response()
    };

    if let Some(session) = &session {
        let value = HeaderValue::from_str(session.as_str())
            .map_err(|e| AppError::Internal(format!("session id is not a header value: {e}")))?;
        response.headers_mut().insert(SESSION_HEADER, value);
    }

    Ok(response)
}

async fn mcp_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let session = session_from_headers(&headers)?.ok_or(SessionError::MissingSessionId)?;
    state.resolver().unbind(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `Ok(None)` when the header is absent; an unusable header is an error.
fn session_from_headers(headers: &HeaderMap) -> Result<Option<SessionId>, SessionError> {
    let Some(raw) = headers.get(SESSION_HEADER) else {
        return Ok(None);
    };
    let raw = raw.to_str().map_err(|_| SessionError::InvalidSessionId {
        reason: "contains non-visible characters",
    })?;
    SessionId::parse(raw).map(Some)
}

fn mint_session_id() -> Result<SessionId, AppError> {
    Ok(SessionId::parse(&Uuid::new_v4().to_string())?)
}

async fn bind_supplied_credential(
    state: &AppState,
    session: &SessionId,
    headers: &HeaderMap,
) -> Result<(), AppError> {
    match extract_credential(headers) {
        Some(credential) => {
            state.resolver().bind(session, &credential).await?;
        }
        None => tracing::info!(
            event = "mcp_session_without_credential",
            session = %session.fingerprint(),
            "initialize carried no API key; tool calls will return auth_missing"
        ),
    }
    Ok(())
}

/// `Authorization: Bearer <key>` wins over `X-Api-Key`.
fn extract_credential(headers: &HeaderMap) -> Option<Credential> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| {
            let mut parts = raw.splitn(2, ' ');
            let scheme = parts.next().unwrap_or_default();
            let token = parts.next().unwrap_or_default().trim();
            scheme.eq_ignore_ascii_case("bearer").then_some(token)
        })
        .and_then(|token| Credential::new(token).ok());

    bearer.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Credential::new(raw.trim()).ok())
    })
}
