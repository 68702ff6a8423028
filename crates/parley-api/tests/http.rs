use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use parley_api::{AppStateInner, Limiters, router};
use parley_db::Database;
use parley_gateway::EventBus;
use parley_support::SupportContext;
use parley_support::llm::DisabledModel;
use parley_support::notify::LogNotifier;

fn app() -> Router {
    app_with_bus(EventBus::new())
}

fn app_with_bus(bus: EventBus) -> Router {
    let ctx = SupportContext {
        db: Arc::new(Database::open_in_memory().unwrap()),
        bus,
        notifier: Arc::new(LogNotifier),
        model: Arc::new(DisabledModel),
        admin_emails: Arc::from(Vec::<String>::new()),
        public_url: "http://localhost:3000".into(),
    };
    let state = AppStateInner::new(
        ctx,
        Limiters::default(),
        "test-secret".into(),
        Some("ops".into()),
    );
    router(Arc::new(state))
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn register(app: &Router, username: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": username, "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let app = app();
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bootstrap_admin_and_login() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": "ops", "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["role"], "ADMIN");

    let (status, _) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": "ops", "password": "another pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "username": "ops", "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "ADMIN");

    let (status, _) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "username": "ops", "password": "wrong password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn guest_conversation_lifecycle_over_http() {
    let app = app();
    let admin = register(&app, "ops").await;
    let user = register(&app, "visitor").await;

    let (status, body) = call(
        &app,
        "POST",
        "/conversations",
        None,
        Some(json!({ "contactEmail": "guest@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["conversation"]["status"], "AI_ONLY");
    let id = body["conversation"]["id"].as_str().unwrap().to_string();

    let (status, _) = call(&app, "GET", &format!("/conversations/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/conversations/{id}/request-human"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);
    assert_eq!(body["conversation"]["status"], "REQUESTED_HUMAN");

    let takeover = format!("/admin/conversations/{id}/takeover");
    assert_eq!(call(&app, "POST", &takeover, None, None).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(call(&app, "POST", &takeover, Some(&user), None).await.0, StatusCode::FORBIDDEN);
    let (status, body) = call(&app, "POST", &takeover, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversation"]["status"], "HUMAN_ACTIVE");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/admin/conversations/{id}/status"),
        Some(&admin),
        Some(json!({ "status": "SNOOZED" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("SNOOZED"));

    let (status, body) = call(
        &app,
        "GET",
        &format!("/conversations/{id}/messages?limit=10"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 2);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/admin/conversations/{id}/escalate"),
        Some(&admin),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ticket"]["subject"], "Support request from guest@example.com");
    assert_eq!(body["copiedMessages"], 2);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/admin/conversations/{id}/close"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", &takeover, Some(&admin), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(&app, "GET", "/admin/conversations?status=CLOSED", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let app = app();
    let (status, _) = call(&app, "GET", "/admin/conversations", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn conversation_creation_hits_the_rate_limit() {
    let app = app();
    for _ in 0..10 {
        let (status, _) = call(&app, "POST", "/conversations", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let request = Request::post("/conversations")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn event_stream_requires_a_conversation_id() {
    let app = app();
    let (status, _) = call(&app, "GET", "/events", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "GET", "/events?conversationId=missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn event_stream_opens_for_a_guest_conversation() {
    let app = app();
    let (_, body) = call(&app, "POST", "/conversations", None, Some(json!({}))).await;
    let id = body["conversation"]["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/conversations/{id}/events"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    assert!(String::from_utf8_lossy(&first).contains(r#"{"type":"connected"}"#));
}

#[tokio::test]
async fn event_stream_after_bus_shutdown_is_unavailable() {
    let bus = EventBus::new();
    let app = app_with_bus(bus.clone());
    let (_, body) = call(&app, "POST", "/conversations", None, Some(json!({}))).await;
    let id = body["conversation"]["id"].as_str().unwrap().to_string();

    bus.shutdown();
    let (status, _) = call(&app, "GET", &format!("/conversations/{id}/events"), None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn leads_capture_and_admin_export() {
    let app = app();
    let admin = register(&app, "ops").await;

    let (status, body) = call(
        &app,
        "POST",
        "/leads",
        None,
        Some(json!({ "name": "Ada", "email": "ada@example.com", "company": "Engines, Ltd" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let lead_id = body["lead"]["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::get("/admin/leads/export")
                .header(header::AUTHORIZATION, format!("Bearer {}", admin))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );
    let csv = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&csv).contains("\"Engines, Ltd\""));

    // No model configured: enrichment is an upstream failure
    let (status, _) = call(
        &app,
        "POST",
        &format!("/admin/leads/{lead_id}/enrich"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
