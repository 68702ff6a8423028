use axum::{
    Extension,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use parley_gateway::connection::sse_response;
use parley_gateway::{LiveStream, StreamError};
use parley_support::AuthContext;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub conversation_id: Option<String>,
}

pub async fn conversation_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    open_stream(&state, &auth, &id).await
}

/// Same stream with the id in the query string; a missing id is a 400.
pub async fn events_by_query(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let id = query
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(StreamError::MissingConversationId)?;
    open_stream(&state, &auth, &id).await
}

async fn open_stream(
    state: &AppState,
    auth: &AuthContext,
    id: &str,
) -> ApiResult<Response> {
    if id.trim().is_empty() {
        return Err(StreamError::MissingConversationId.into());
    }

    // Same access rules as reading the conversation
    state.conversations.get(auth, id).await?;

    let live = LiveStream::open(&state.ctx.bus, id)?;
    Ok(sse_response(live).into_response())
}
