use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_support::AuthContext;
use parley_support::conversation::Transition;
use parley_types::api::{
    ConversationResponse, CreateConversationRequest, SendMessageRequest, TransitionResponse,
};

use crate::error::ApiResult;
use crate::middleware::Peer;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Id of the last message the client already has.
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(Peer(peer)): Extension<Peer>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let (conversation, messages) = state.conversations.create(&auth, &peer, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse {
            conversation,
            messages,
        }),
    ))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let conversation = state.conversations.get(&auth, &id).await?;
    Ok(Json(ConversationResponse {
        conversation,
        messages: Vec::new(),
    }))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .conversations
        .list_messages(&auth, &id, query.cursor, query.limit)
        .await?;
    Ok(Json(page))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .conversations
        .post_user_message(&auth, &id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn request_human(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let transition = state.conversations.request_human(&auth, &id).await?;
    Ok(Json(transition_response(transition)))
}

pub(crate) fn transition_response(transition: Transition) -> TransitionResponse {
    TransitionResponse {
        conversation: transition.conversation,
        changed: transition.changed,
    }
}
