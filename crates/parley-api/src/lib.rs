pub mod admin;
pub mod auth;
pub mod conversations;
pub mod error;
pub mod events;
pub mod leads;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

pub use state::{AppState, AppStateInner, Limiters};

/// Every HTTP route. Transport layers (CORS, tracing) are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let support_routes = Router::new()
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations/{id}", get(conversations::get_conversation))
        .route(
            "/conversations/{id}/messages",
            get(conversations::list_messages).post(conversations::send_message),
        )
        .route("/conversations/{id}/request-human", post(conversations::request_human))
        .route("/conversations/{id}/events", get(events::conversation_events))
        .route("/events", get(events::events_by_query))
        .route("/leads", post(leads::create_lead))
        .route("/admin/conversations", get(admin::list_conversations))
        .route("/admin/conversations/{id}/takeover", post(admin::takeover))
        .route("/admin/conversations/{id}/close", post(admin::close))
        .route("/admin/conversations/{id}/status", post(admin::override_status))
        .route("/admin/conversations/{id}/messages", post(admin::send_message))
        .route("/admin/conversations/{id}/escalate", post(admin::escalate))
        .route("/admin/leads/export", get(leads::export_leads))
        .route("/admin/leads/{id}/enrich", post(leads::enrich_lead))
        .layer(from_fn_with_state(state.clone(), middleware::resolve_auth));

    public_routes.merge(support_routes).with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
