use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::normalize::Normalizer;
use crate::store::EventStore;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: EventStore,
    normalizer: Normalizer,
}

impl AppState {
    pub fn new(store: EventStore, normalizer: Normalizer) -> Self {
        Self {
            inner: Arc::new(AppStateInner { store, normalizer }),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
        .route("/webhook", post(handle_webhook))
        .route("/api/events", get(get_events))
        .route("/api/events/clear", post(clear_events))
        .route("/test-webhook", post(test_webhook))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
}

fn internal_error(message: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": message})),
    )
}

async fn handle_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if body.is_empty() {
        return Err(bad_request("No payload received"));
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        error!("failed to parse webhook payload: {err}");
        bad_request("Invalid JSON payload")
    })?;

    ingest(&state, &payload)
}

/// Shared normalize+append path for /webhook and /test-webhook.
fn ingest(state: &AppState, payload: &Value) -> Result<Json<Value>, ApiError> {
    match state.inner.normalizer.normalize(payload) {
        Some(record) => {
            let event = state.inner.store.append(record).map_err(|err| {
                error!("failed to store event: {err}");
                internal_error("Failed to store event")
            })?;
            info!("stored {} event #{}", event_type(&event), event.id);
            Ok(Json(json!({
                "status": "success",
                "message": "Event processed successfully",
                "event": event,
            })))
        }
        None => Ok(Json(json!({
            "status": "ignored",
            "message": "Event type not handled",
        }))),
    }
}

fn event_type(event: &crate::store::StoredEvent) -> &'static str {
    use crate::normalize::EventKind;
    match event.record.kind {
        EventKind::Push { .. } => "push",
        EventKind::PullRequest { .. } => "pull_request",
        EventKind::Merge { .. } => "merge",
    }
}

async fn get_events(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let events = state.inner.store.list().map_err(|err| {
        error!("failed to list events: {err}");
        internal_error("Failed to list events")
    })?;

    Ok(Json(json!({
        "count": events.len(),
        "events": events,
    })))
}

async fn clear_events(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let removed = state.inner.store.clear().map_err(|err| {
        error!("failed to clear events: {err}");
        internal_error("Failed to clear events")
    })?;

    Ok(Json(json!({
        "status": "success",
        "message": format!(
            "Cleared {removed} events from {}",
            state.inner.store.backend_name()
        ),
    })))
}

#[derive(Deserialize)]
struct TestWebhookRequest {
    #[serde(rename = "type")]
    event_type: String,
}

async fn test_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    // an absent or shapeless body defaults to a push, matching /webhook's
    // most common caller
    let event_type = serde_json::from_slice::<TestWebhookRequest>(&body)
        .map(|req| req.event_type)
        .unwrap_or_else(|_| "push".to_string());

    let now = state.inner.normalizer.now_raw();
    let payload = match event_type.as_str() {
        "push" => json!({
            "ref": "refs/heads/main",
            "commits": [],
            "pusher": {"name": "TestUser"},
            "repository": {"name": "test-repo"},
            "head_commit": {"timestamp": now},
        }),
        "pull_request" => json!({
            "action": "opened",
            "pull_request": {
                "user": {"login": "TestUser"},
                "head": {"ref": "feature-branch"},
                "base": {"ref": "main"},
                "created_at": now,
            },
            "repository": {"name": "test-repo"},
        }),
        "merge" => json!({
            "action": "closed",
            "pull_request": {
                "merged": true,
                "merged_by": {"login": "TestUser"},
                "head": {"ref": "feature-branch"},
                "base": {"ref": "main"},
                "merged_at": now,
            },
            "repository": {"name": "test-repo"},
        }),
        other => {
            return Err(bad_request(&format!("Invalid event type: {other}")));
        }
    };

    ingest(&state, &payload)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "webhook-event-feed",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.inner.store.backend_name(),
    }))
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "Webhook Event Feed",
        "endpoints": {
            "webhook": "/webhook",
            "events": "/api/events",
            "clear": "/api/events/clear",
            "test": "/test-webhook",
            "health": "/health",
        },
        "supported_events": [
            "push",
            "pull_request",
            "merge",
        ],
    }))
}
