use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use parley_support::SupportError;
use parley_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use parley_types::models::UserRole;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    if username.len() < 3 || username.len() > 32 {
        return Err(SupportError::invalid_input("username must be 3 to 32 characters").into());
    }
    if req.password.len() < 8 {
        return Err(SupportError::invalid_input("password must be at least 8 characters").into());
    }

    let role = match &state.bootstrap_admin {
        Some(admin) if admin.eq_ignore_ascii_case(&username) => UserRole::Admin,
        _ => UserRole::User,
    };

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| SupportError::Storage(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let db = state.ctx.db.clone();
    let name = username.clone();
    let email = req.email.clone();
    let created = tokio::task::spawn_blocking(move || {
        if db.get_user_by_username(&name)?.is_some() {
            return Ok(false);
        }
        db.create_user(&user_id.to_string(), &name, email.as_deref(), &password_hash, role)?;
        Ok::<_, anyhow::Error>(true)
    })
    .await
    .map_err(|e| SupportError::Storage(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
    .map_err(SupportError::Storage)?;

    if !created {
        return Err(SupportError::invalid_state("username is taken").into());
    }
    info!(user = %user_id, role = %role, "user registered");

    let token = create_token(&state.jwt_secret, user_id, &username, role)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            role,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let db = state.ctx.db.clone();
    let username = req.username.trim().to_string();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_username(&username))
        .await
        .map_err(|e| SupportError::Storage(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
        .map_err(SupportError::Storage)?
        .ok_or(SupportError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| SupportError::Storage(anyhow::anyhow!("stored hash unreadable: {}", e)))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| SupportError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| SupportError::Storage(anyhow::anyhow!("bad user id: {}", e)))?;
    let token = create_token(&state.jwt_secret, user_id, &user.username, user.role)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        role: user.role,
        token,
    }))
}

fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    role: UserRole,
) -> Result<String, SupportError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| SupportError::Storage(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth_from_token;
    use parley_support::AuthContext;

    #[test]
    fn token_round_trips_role() {
        let id = Uuid::new_v4();
        let token = create_token("secret", id, "ops", UserRole::Admin).unwrap();
        assert_eq!(
            auth_from_token("secret", &token),
            Some(AuthContext::Admin { id: id.to_string() })
        );
        assert_eq!(auth_from_token("other-secret", &token), None);
    }

    #[test]
    fn os_salted_hashes_verify() {
        let first = SaltString::generate(&mut OsRng);
        let second = SaltString::generate(&mut OsRng);
        assert_ne!(first.as_str(), second.as_str());

        let hash = Argon2::default()
            .hash_password(b"correct horse", &first)
            .unwrap()
            .to_string();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default().verify_password(b"correct horse", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong horse", &parsed).is_err());
    }
}
