use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

use parley_support::{AuthContext, SupportError};
use parley_types::api::Claims;
use parley_types::models::UserRole;

use crate::error::ApiError;
use crate::state::AppState;

/// Best-known network identity of the caller, used as the rate-limit key
/// for anonymous requests.
#[derive(Debug, Clone)]
pub struct Peer(pub String);

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    /// `EventSource` cannot set headers, so streams may pass the JWT here.
    pub token: Option<String>,
}

/// Resolve the caller into an `AuthContext` extension. No credentials means
/// anonymous; bad credentials are rejected outright.
pub async fn resolve_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<TokenQuery>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = bearer
        .as_ref()
        .map(|TypedHeader(auth)| auth.token().to_string())
        .or(query.token);

    let auth = match token {
        None => AuthContext::Anonymous,
        Some(token) => match auth_from_token(&state.jwt_secret, &token) {
            Some(auth) => auth,
            None => return ApiError(SupportError::Unauthorized).into_response(),
        },
    };

    let peer = peer_of(&req);
    req.extensions_mut().insert(auth);
    req.extensions_mut().insert(peer);
    next.run(req).await
}

pub fn auth_from_token(secret: &str, token: &str) -> Option<AuthContext> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    let id = data.claims.sub.to_string();
    Some(match data.claims.role {
        UserRole::Admin => AuthContext::Admin { id },
        UserRole::User => AuthContext::User { id },
    })
}

fn peer_of(req: &Request) -> Peer {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    Peer(forwarded.or(addr).unwrap_or_else(|| "unknown".to_string()))
}
