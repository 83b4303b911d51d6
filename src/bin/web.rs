//! Helpdesk HTTP 接口
//!
//! 启动: cargo run --bin helpdesk-web --features web
//! 默认监听 0.0.0.0:8080（HELPDESK__WEB__PORT 或 HELPDESK_WEB_PORT 可覆盖）

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use helpdesk::config::load_config;
use helpdesk::conversation::{ConversationSummary, StoredMessage};
use helpdesk::service::build_service;
use helpdesk::{AgentKind, ReplyKind, ServiceError, SupportService};

struct AppState {
    service: SupportService,
    /// GET / 返回的会话数
    recent_limit: usize,
    /// 按发送者过滤的返回上限
    filter_limit: usize,
}

/// 错误响应：`{"detail": ...}`
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "detail": self.1 }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError(StatusCode::BAD_REQUEST, e.to_string())
    }
}

#[derive(Deserialize)]
struct ConversationBody {
    /// 缺省时生成新的会话 id
    #[serde(default)]
    conversation_id: Option<String>,
    user_input: String,
}

#[derive(Serialize)]
struct ConversationResponse {
    conversation_id: String,
    agent: AgentKind,
    agent_response: String,
    reply_kind: ReplyKind,
    retrieved_policies: Vec<String>,
    history: Vec<StoredMessage>,
}

#[derive(Deserialize)]
struct PolicyQuery {
    query: String,
}

#[derive(Deserialize)]
struct FilterParams {
    agent_type: Option<String>,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(latest_conversations))
        // 静态段优先于参数段匹配；id 恰为 latest 的会话仍可删除
        .route("/conversation/latest", get(latest_conversation).delete(delete_conversation))
        .route("/conversation/:key", post(handle_conversation).delete(delete_conversation))
        .route("/conversations/filter", get(filter_conversations))
        .route("/retrieve_policy", post(retrieve_policy))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    helpdesk::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("config load failed, using defaults: {}", e);
        Default::default()
    });
    let service = build_service(&cfg)?;
    let state = Arc::new(AppState {
        service,
        recent_limit: cfg.conversation.recent_limit,
        filter_limit: cfg.conversation.filter_limit,
    });

    let port = std::env::var("HELPDESK_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.web.port);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Helpdesk API: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn handle_conversation(
    State(state): State<Arc<AppState>>,
    Path(agent_type): Path<String>,
    Json(body): Json<ConversationBody>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let conversation_id = body
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let outcome = state
        .service
        .handle_turn(&conversation_id, &agent_type, &body.user_input)
        .await?;
    Ok(Json(ConversationResponse {
        conversation_id: outcome.conversation_id,
        agent: outcome.agent,
        agent_response: outcome.reply.response,
        reply_kind: outcome.reply.kind,
        retrieved_policies: outcome.retrieved_policies,
        history: outcome.history,
    }))
}

async fn retrieve_policy(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PolicyQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let lookup = state.service.retrieve_policies(&body.query).await.map_err(|e| match e {
        ServiceError::EmptyInput => ApiError(StatusCode::BAD_REQUEST, "Policy query cannot be empty.".to_string()),
        other => other.into(),
    })?;
    Ok(Json(json!({
        "query": body.query,
        "retrieved_policies": lookup.texts(),
    })))
}

async fn latest_conversation(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.service.conversations().latest_conversation() {
        Some(ConversationSummary {
            conversation_id,
            messages,
            ..
        }) => Json(json!({ "conversation_id": conversation_id, "messages": messages })),
        None => Json(json!({ "message": "No conversations found." })),
    }
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.service.conversations().delete_conversation(&conversation_id) {
        Ok(0) => Err(ApiError(StatusCode::NOT_FOUND, "Conversation not found.".to_string())),
        Ok(_) => Ok(Json(json!({
            "message": format!("Conversation {} deleted.", conversation_id)
        }))),
        Err(e) => {
            tracing::error!(conversation_id = %conversation_id, "delete failed: {}", e);
            Err(ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn filter_conversations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FilterParams>,
) -> Json<serde_json::Value> {
    let sender = params.agent_type.as_deref().filter(|s| !s.is_empty());
    let messages = state.service.conversations().filter_by_sender(sender, state.filter_limit);
    Json(json!({ "filtered_messages": messages }))
}

async fn latest_conversations(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let conversations = state.service.conversations().recent_conversations(state.recent_limit);
    Json(json!({ "latest_conversations": conversations }))
}
