use std::collections::BTreeMap;

use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Json, async_trait};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::AppState;
use crate::agents::NewAgent;
use crate::agents::defaults::{AVAILABLE_TOOLS, builtin_agents, catalog_json};
use crate::chat::{ChatReply, ChatRequest, ConversationDetail};
use crate::db::models::{AgentPatch, Conversation};
use crate::error::{AppError, AppResult};
use crate::tools::catalog::{self, server_info};

/// `Json` whose rejections use the API error body.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

fn require_agent_id(id: &str) -> AppResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AppError::BadRequest("Agent ID is required".into()));
    }
    Ok(id)
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": if state.config.is_test_mode() { "test" } else { "production" },
    }))
}

pub async fn chat_with_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<ChatRequest>,
) -> AppResult<Json<ChatReply>> {
    let identity = state.auth.authenticate(&headers).await?;
    info!("Chat request from {} to {}", identity.email, req.agent_id);
    Ok(Json(state.chat.chat(&identity, req).await?))
}

// ── Agent configuration ──────────────────────────────────────────────

pub async fn get_agent_configs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let identity = state.auth.authenticate(&headers).await?;
    let is_admin = state.auth.gate().is_admin(&identity);
    Ok(Json(state.chat.agents().configs_view(is_admin).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigBody {
    #[serde(default)]
    agent_id: String,
    system_prompt: Option<String>,
    #[serde(default)]
    tools: Vec<String>,
}

pub async fn update_agent_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<UpdateConfigBody>,
) -> AppResult<Json<Value>> {
    let identity = state.auth.authenticate_admin(&headers).await?;
    state
        .chat
        .agents()
        .update_config(
            &body.agent_id,
            body.system_prompt.as_deref(),
            &body.tools,
            &identity.uid,
        )
        .await?;
    Ok(Json(json!({"message": "Agent configuration updated successfully"})))
}

// ── Agent management ─────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AgentsQuery {
    category: Option<String>,
}

/// Catalogue ids plus every dispatcher tool name and alias.
fn known_tools(state: &AppState) -> Vec<String> {
    let mut known: Vec<String> = AVAILABLE_TOOLS.iter().map(|e| e.id.to_string()).collect();
    known.extend(state.chat.executor().dispatcher().tool_names());
    known
}

pub async fn get_all_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AgentsQuery>,
) -> AppResult<Json<Value>> {
    let identity = state.auth.authenticate(&headers).await?;
    let is_admin = state.auth.gate().is_admin(&identity);

    let listed = match query.category.as_deref().filter(|c| !c.is_empty()) {
        Some(category) => state.chat.agents().by_category(Some(category)).await?,
        None => state.chat.agents().all().await?,
    };
    let mut agents = BTreeMap::new();
    for agent in listed {
        let mut entry = serde_json::to_value(&agent).map_err(anyhow::Error::from)?;
        if is_admin {
            entry["available_tools_all"] = catalog_json(AVAILABLE_TOOLS);
        }
        agents.insert(agent.id, entry);
    }
    Ok(Json(json!({
        "count": agents.len(),
        "agents": agents,
        "is_admin": is_admin,
    })))
}

pub async fn create_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<NewAgent>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let identity = state.auth.authenticate_admin(&headers).await?;
    let agents = state.chat.agents();
    let agent = agents.create(body, &identity.uid).await?;
    let validation = agents.validate_tools(&agent.id, &known_tools(&state)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Agent created successfully",
            "agentId": agent.id,
            "toolValidation": validation,
        })),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentBody {
    #[serde(default)]
    agent_id: String,
    #[serde(flatten)]
    patch: AgentPatch,
}

pub async fn update_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<UpdateAgentBody>,
) -> AppResult<Json<Value>> {
    let identity = state.auth.authenticate_admin(&headers).await?;
    let id = require_agent_id(&body.agent_id)?;
    let agents = state.chat.agents();
    let agent = agents.update(id, &body.patch, &identity.uid).await?;
    let validation = agents.validate_tools(&agent.id, &known_tools(&state)).await?;
    Ok(Json(json!({
        "message": "Agent updated successfully",
        "agentId": agent.id,
        "toolValidation": validation,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAgentBody {
    #[serde(default)]
    agent_id: String,
    #[serde(default)]
    hard_delete: bool,
}

pub async fn delete_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<DeleteAgentBody>,
) -> AppResult<Json<Value>> {
    let identity = state.auth.authenticate_admin(&headers).await?;
    let id = require_agent_id(&body.agent_id)?;
    state
        .chat
        .agents()
        .delete(id, body.hard_delete, &identity.uid)
        .await?;
    let action = if body.hard_delete { "permanently deleted" } else { "disabled" };
    Ok(Json(json!({"message": format!("Agent {action} successfully"), "agentId": id})))
}

pub async fn migrate_legacy_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    state.auth.authenticate_admin(&headers).await?;
    let builtins = builtin_agents();
    let ids: Vec<String> = builtins.iter().map(|a| a.id.clone()).collect();
    let migrated = state.chat.agents().migrate_legacy(builtins).await?;
    Ok(Json(json!({
        "message": "Legacy agents migrated successfully",
        "migrated_agents": ids,
        "migrated_count": migrated,
    })))
}

// ── Tools ────────────────────────────────────────────────────────────

pub async fn get_available_mcp_tools(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    state.auth.authenticate(&headers).await?;
    let dispatcher = state.chat.executor().dispatcher();

    let mut tools = BTreeMap::new();
    for name in dispatcher.tool_names() {
        let Some(info) = dispatcher.tool_info(&name) else {
            continue;
        };
        let server_name = server_info(&info.server).map_or(info.server.as_str(), |s| s.name);
        tools.insert(
            name.clone(),
            json!({
                "name": name,
                "canonical": info.canonical,
                "description": info.description,
                "server": info.server,
                "server_name": server_name,
                "category": info.category,
                "icon": "🔧",
            }),
        );
    }

    let servers: Vec<&str> = dispatcher.handlers().iter().map(|h| h.server()).collect();
    let schemas = catalog::function_declarations(dispatcher, &dispatcher.canonical_names());
    Ok(Json(json!({
        "total_tools": tools.len(),
        "tools": tools,
        "categories": dispatcher.by_category(),
        "servers": servers,
        "schemas": schemas,
    })))
}

pub async fn mcp_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    state.auth.authenticate(&headers).await?;
    let executor = state.chat.executor();
    let health = executor.health();
    Ok(Json(json!({
        "status": health.status,
        "health": health,
        "servers": catalog::installation_status(executor.dispatcher(), &state.credentials),
        "credentials": state.credentials.status().await,
    })))
}

// ── Conversations ────────────────────────────────────────────────────

pub async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let identity = state.auth.authenticate(&headers).await?;
    let conversations = state.chat.list_conversations(&identity).await?;
    Ok(Json(json!({ "conversations": conversations })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversationBody {
    #[serde(default)]
    agent_id: String,
    title: Option<String>,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody<NewConversationBody>,
) -> AppResult<(StatusCode, Json<Conversation>)> {
    let identity = state.auth.authenticate(&headers).await?;
    let agent_id = require_agent_id(&body.agent_id)?;
    let conversation = state
        .chat
        .create_conversation(&identity, agent_id, body.title.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<ConversationDetail>> {
    let identity = state.auth.authenticate(&headers).await?;
    Ok(Json(state.chat.conversation(&identity, &id).await?))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let identity = state.auth.authenticate(&headers).await?;
    state.chat.delete_conversation(&identity, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
