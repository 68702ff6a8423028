use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_support::{AuthContext, SupportError};
use parley_types::api::{
    ConversationList, EscalateRequest, EscalateResponse, SendMessageRequest,
    StatusOverrideRequest,
};
use parley_types::models::ConversationStatus;

use crate::conversations::transition_response;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<ConversationStatus>()
                .map_err(|e| SupportError::invalid_input(e.to_string()))?,
        ),
        None => None,
    };

    let conversations = state.conversations.list(&auth, status, query.limit).await?;
    Ok(Json(ConversationList {
        conversations,
        status,
    }))
}

pub async fn takeover(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let transition = state.conversations.takeover(&auth, &id).await?;
    Ok(Json(transition_response(transition)))
}

pub async fn close(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let transition = state.conversations.close(&auth, &id).await?;
    Ok(Json(transition_response(transition)))
}

pub async fn override_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<StatusOverrideRequest>,
) -> ApiResult<impl IntoResponse> {
    let transition = state
        .conversations
        .override_status(&auth, &id, &req.status, req.message)
        .await?;
    Ok(Json(transition_response(transition)))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .conversations
        .post_admin_message(&auth, &id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn escalate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<EscalateRequest>,
) -> ApiResult<impl IntoResponse> {
    let escalation = state.escalations.escalate(&auth, &id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(EscalateResponse {
            ticket: escalation.ticket,
            copied_messages: escalation.copied_messages,
        }),
    ))
}
