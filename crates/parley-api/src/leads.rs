use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};

use parley_support::AuthContext;
use parley_types::api::{CreateLeadRequest, LeadResponse};

use crate::error::ApiResult;
use crate::middleware::Peer;
use crate::state::AppState;

pub async fn create_lead(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(Peer(peer)): Extension<Peer>,
    Json(req): Json<CreateLeadRequest>,
) -> ApiResult<impl IntoResponse> {
    let lead = state.leads.capture(&auth, &peer, req).await?;
    Ok((StatusCode::CREATED, Json(LeadResponse { lead })))
}

pub async fn export_leads(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let csv = state.leads.export_csv(&auth).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"leads.csv\""),
        ],
        csv,
    ))
}

pub async fn enrich_lead(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    let lead = state.leads.enrich(&auth, &id).await?;
    Ok(Json(LeadResponse { lead }))
}
