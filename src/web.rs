//! HTTP 入口（feature `web`）
//!
//! - `GET /` 健康检查
//! - `POST /chat` 对话：`{message, session_id?}` → `{response, status, rounds}`
//! - `GET /login` 已授权时返回 JSON，否则 302 到 iSolarCloud 授权页
//! - `GET /callback?code=` 授权码换取凭证
//! - `GET /tokens` 凭证状态（不含 token 本身）
//! - `POST /sessions/clear` 清空会话历史

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agent::Agent;
use crate::auth::{AuthError, CredentialStatus};
use crate::core::TurnStatus;

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
}

impl AppState {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/chat", post(chat))
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/tokens", get(tokens))
        .route("/sessions/clear", post(clear_session))
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn auth_error(e: AuthError) -> ApiError {
    let status = match &e {
        AuthError::Authentication { .. } | AuthError::Refresh { .. } => StatusCode::BAD_REQUEST,
        AuthError::Upstream(_) => StatusCode::BAD_GATEWAY,
        AuthError::Storage(_) | AuthError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "Solar Assistant is running" }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response: String,
    status: TurnStatus,
    rounds: usize,
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| state.agent.config().web.default_session_id.clone());

    let reply = state
        .agent
        .post_message_detailed(Some(&session_id), &req.message)
        .await;
    Ok(Json(ChatResponse {
        response: reply.text,
        status: reply.status,
        rounds: reply.rounds,
    }))
}

async fn login(State(state): State<AppState>) -> Result<Response, ApiError> {
    let agent = &state.agent;
    let status = agent
        .tokens()
        .status(agent.provider())
        .await
        .map_err(auth_error)?;
    if status.authorized {
        return Ok(Json(json!({
            "message": "Already authorized",
            "status": status,
        }))
        .into_response());
    }

    let url = agent
        .tokens()
        .authorization_url(&agent.config().auth.redirect_uri)
        .map_err(auth_error)?;
    info!("Redirecting to authorization page");
    Ok(Redirect::to(&url).into_response())
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
}

async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Value>, ApiError> {
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return Err((StatusCode::BAD_REQUEST, "missing authorization code".to_string()));
    };
    let agent = &state.agent;
    let status = agent
        .tokens()
        .complete_authorization(agent.provider(), &code, &agent.config().auth.redirect_uri)
        .await
        .map_err(|e| {
            warn!("Authorization callback failed: {}", e);
            auth_error(e)
        })?;
    Ok(Json(json!({
        "message": "Authorization successful",
        "status": status,
    })))
}

async fn tokens(State(state): State<AppState>) -> Result<Json<Vec<CredentialStatus>>, ApiError> {
    let statuses = state.agent.tokens().status_all().await.map_err(auth_error)?;
    Ok(Json(statuses))
}

#[derive(Debug, Default, Deserialize)]
struct ClearRequest {
    #[serde(default)]
    session_id: Option<String>,
}

async fn clear_session(
    State(state): State<AppState>,
    body: Option<Json<ClearRequest>>,
) -> Json<Value> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| state.agent.config().web.default_session_id.clone());
    let cleared = state.agent.clear_session(Some(&session_id)).await;
    Json(json!({ "session_id": session_id, "cleared": cleared }))
}
