use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::db::DbHandle;
use super::hub::Relay;
use super::ingest::{self, EventRecorder};
use super::models::{AgentPatch, NewAgent, StatusKind};
use super::ws::{Keepalive, WsMessage};

/// Events returned when no `limit` is given.
pub const DEFAULT_EVENT_LIMIT: u32 = 50;
/// Upper bound on `limit` for event listings and snapshots.
pub const MAX_EVENT_LIMIT: u32 = 500;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub relay: Arc<Relay>,
    /// Ordered writer for events that arrive on producer sockets.
    pub recorder: EventRecorder,
    /// Outbound frames buffered per subscriber.
    pub connection_queue: usize,
    pub keepalive: Keepalive,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

impl LimitQuery {
    fn resolve(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_EVENT_LIMIT)
            .clamp(1, MAX_EVENT_LIMIT)
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

/// A UNIQUE violation on `agents.name` is the caller's fault.
fn agent_write_error(e: anyhow::Error) -> ApiError {
    let msg = format!("{:#}", e);
    if msg.contains("UNIQUE constraint failed") {
        ApiError::BadRequest("An agent with that name already exists".into())
    } else {
        ApiError::Internal(msg)
    }
}

fn parse_agent_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid agent ID".into()))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/snapshot", get(get_snapshot))
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/status/{kind}", post(post_status))
        .route("/api/agents", get(list_agents).post(create_agent))
        .route(
            "/api/agents/{id}",
            get(get_agent).patch(update_agent).delete(delete_agent),
        )
        .route("/api/projects", get(list_projects))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_snapshot(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.resolve();
    let snapshot = state
        .db
        .call(move |db| db.snapshot(limit))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(snapshot))
}

async fn list_events(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.resolve();
    let events = state
        .db
        .call(move |db| db.list_recent_events(limit))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(events))
}

async fn create_event(
    State(state): State<SharedState>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let event = ingest::submit_event(&state.db, state.relay.as_ref(), payload)
        .await
        .map_err(|_| ApiError::Internal("Failed to create event".into()))?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn post_status(
    State(state): State<SharedState>,
    Path(kind): Path<String>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = StatusKind::from_str(&kind).map_err(ApiError::BadRequest)?;
    let outcome = state.relay.on_status_update(kind, payload);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"delivered": outcome.delivered})),
    ))
}

async fn list_agents(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let agents = state
        .db
        .call(move |db| db.list_agents())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(agents))
}

async fn create_agent(
    State(state): State<SharedState>,
    Json(req): Json<NewAgent>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Name is required".into()));
    }
    let agent = state
        .db
        .call(move |db| db.create_agent(&req))
        .await
        .map_err(agent_write_error)?;
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn get_agent(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_agent_id(&id)?;
    let agent = state
        .db
        .call(move |db| db.get_agent(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match agent {
        Some(agent) => Ok(Json(agent)),
        None => Err(ApiError::NotFound("Agent not found".into())),
    }
}

async fn update_agent(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(patch): Json<AgentPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_agent_id(&id)?;
    let (was_active, agent) = state
        .db
        .call(move |db| {
            let Some(before) = db.get_agent(id)? else {
                return Ok(None);
            };
            Ok(db
                .update_agent(id, &patch)?
                .map(|after| (before.is_active, after)))
        })
        .await
        .map_err(agent_write_error)?
        .ok_or_else(|| ApiError::NotFound("Agent not found".into()))?;

    if agent.is_active != was_active {
        state.relay.publish(&WsMessage::AgentUpdate(
            json!({"name": agent.name, "is_active": agent.is_active}),
        ));
    }
    Ok(Json(agent))
}

async fn delete_agent(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_agent_id(&id)?;
    let deleted = state
        .db
        .call(move |db| db.delete_agent(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match deleted {
        true => Ok(Json(json!({"success": true}))),
        false => Err(ApiError::NotFound("Agent not found".into())),
    }
}

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let projects = state
        .db
        .call(move |db| db.list_projects())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(projects))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::db::DashboardDb;
    use crate::relay::hub::tests::connect;
    use crate::relay::models::NewProject;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let db = DbHandle::new(DashboardDb::new_in_memory().unwrap());
        Arc::new(AppState {
            recorder: EventRecorder::spawn(db.clone()),
            db,
            relay: Arc::new(Relay::new()),
            connection_queue: 16,
            keepalive: Keepalive::default(),
        })
    }

    fn test_app(state: &SharedState) -> Router {
        api_router().with_state(state.clone())
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn patch_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("PATCH")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let state = test_state();
        let response = test_app(&state).oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_create_event_persists_and_broadcasts() {
        let state = test_state();
        let (_, mut rx) = connect(&state.relay, 8);

        let response = test_app(&state)
            .oneshot(post_json(
                "/api/events",
                json!({"event_type": "task_started", "agent_name": "Dev", "message": "Building"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Value = body_json(response.into_body()).await;
        assert_eq!(created["event_type"], "task_started");
        assert!(created["id"].is_i64());

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "new_event");
        assert_eq!(frame["data"]["id"], created["id"]);
    }

    #[tokio::test]
    async fn test_create_event_failure_still_broadcasts() {
        let state = test_state();
        let (_, mut rx) = connect(&state.relay, 8);

        let payload = json!({"agent_name": "Dev"});
        let response = test_app(&state)
            .oneshot(post_json("/api/events", payload.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["error"], "Failed to create event");

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"], payload);
    }

    #[tokio::test]
    async fn test_list_events_limit() {
        let state = test_state();
        for i in 0..5 {
            test_app(&state)
                .oneshot(post_json("/api/events", json!({"event_type": format!("e{}", i)})))
                .await
                .unwrap();
        }

        let response = test_app(&state)
            .oneshot(get_request("/api/events?limit=2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let events: Vec<Value> = body_json(response.into_body()).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event_type"], "e4");
        assert_eq!(events[1]["event_type"], "e3");
    }

    #[tokio::test]
    async fn test_snapshot() {
        let state = test_state();
        state
            .db
            .call(|db| {
                db.create_agent(&NewAgent {
                    name: "Dev".into(),
                    ..Default::default()
                })?;
                db.create_project(&NewProject {
                    name: "relay".into(),
                    ..Default::default()
                })?;
                db.create_event(&crate::relay::models::NewEvent::new("boot"))
            })
            .await
            .unwrap();

        let response = test_app(&state).oneshot(get_request("/api/snapshot")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot: Value = body_json(response.into_body()).await;
        assert_eq!(snapshot["agents"][0]["name"], "Dev");
        assert_eq!(snapshot["projects"][0]["name"], "relay");
        assert_eq!(snapshot["events"][0]["event_type"], "boot");
    }

    #[tokio::test]
    async fn test_post_status_broadcasts_on_channel() {
        let state = test_state();
        let (_, mut rx) = connect(&state.relay, 8);

        let response = test_app(&state)
            .oneshot(post_json(
                "/api/status/projects",
                json!({"name": "relay", "status": "paused"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["delivered"], 1);

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "project_update");
        assert_eq!(frame["data"]["status"], "paused");
    }

    #[tokio::test]
    async fn test_post_status_unknown_kind() {
        let state = test_state();
        let response = test_app(&state)
            .oneshot(post_json("/api/status/teams", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_agent_requires_name() {
        let state = test_state();
        let response = test_app(&state)
            .oneshot(post_json("/api/agents", json!({"description": "nameless"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["error"], "Name is required");
    }

    #[tokio::test]
    async fn test_agent_lifecycle() {
        let state = test_state();
        let (_, mut rx) = connect(&state.relay, 8);

        let response = test_app(&state)
            .oneshot(post_json("/api/agents", json!({"name": "Dev", "model": "sonnet"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Value = body_json(response.into_body()).await;
        assert_eq!(created["is_active"], true);
        let id = created["id"].as_i64().unwrap();

        let response = test_app(&state)
            .oneshot(get_request(&format!("/api/agents/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let patch = Request::builder()
            .method("PATCH")
            .uri(format!("/api/agents/{}", id))
            .header("content-type", "application/json")
            .body(Body::from(json!({"is_active": false}).to_string()))
            .unwrap();
        let response = test_app(&state).oneshot(patch).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated: Value = body_json(response.into_body()).await;
        assert_eq!(updated["is_active"], false);
        assert_eq!(updated["model"], "sonnet");

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "agent_update");
        assert_eq!(frame["data"], json!({"name": "Dev", "is_active": false}));

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/api/agents/{}", id))
            .body(Body::empty())
            .unwrap();
        let response = test_app(&state).oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body, json!({"success": true}));

        let response = test_app(&state)
            .oneshot(get_request(&format!("/api/agents/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_patch_without_status_change_does_not_broadcast() {
        let state = test_state();
        let agent = state
            .db
            .call(|db| {
                db.create_agent(&NewAgent {
                    name: "QA".into(),
                    ..Default::default()
                })
            })
            .await
            .unwrap();
        let (_, mut rx) = connect(&state.relay, 8);

        let patch = Request::builder()
            .method("PATCH")
            .uri(format!("/api/agents/{}", agent.id))
            .header("content-type", "application/json")
            .body(Body::from(json!({"description": "Tests things"}).to_string()))
            .unwrap();
        let response = test_app(&state).oneshot(patch).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_patch_with_unchanged_status_does_not_broadcast() {
        let state = test_state();
        let agent = state
            .db
            .call(|db| {
                db.create_agent(&NewAgent {
                    name: "Ops".into(),
                    ..Default::default()
                })
            })
            .await
            .unwrap();
        let (_, mut rx) = connect(&state.relay, 8);

        let response = test_app(&state)
            .oneshot(patch_json(
                &format!("/api/agents/{}", agent.id),
                json!({"is_active": true, "model": "haiku"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated: Value = body_json(response.into_body()).await;
        assert_eq!(updated["model"], "haiku");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rename_to_existing_agent_name() {
        let state = test_state();
        let (first, second) = state
            .db
            .call(|db| {
                let first = db.create_agent(&NewAgent {
                    name: "Dev".into(),
                    ..Default::default()
                })?;
                let second = db.create_agent(&NewAgent {
                    name: "QA".into(),
                    ..Default::default()
                })?;
                Ok((first, second))
            })
            .await
            .unwrap();

        let response = test_app(&state)
            .oneshot(patch_json(
                &format!("/api/agents/{}", second.id),
                json!({"name": first.name}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["error"], "An agent with that name already exists");

        let unchanged = state.db.call(move |db| db.get_agent(second.id)).await.unwrap();
        assert_eq!(unchanged.unwrap().name, "QA");
    }

    #[tokio::test]
    async fn test_invalid_agent_id() {
        let state = test_state();
        let response = test_app(&state)
            .oneshot(get_request("/api/agents/abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["error"], "Invalid agent ID");
    }

    #[tokio::test]
    async fn test_delete_missing_agent() {
        let state = test_state();
        let delete = Request::builder()
            .method("DELETE")
            .uri("/api/agents/999")
            .body(Body::empty())
            .unwrap();
        let response = test_app(&state).oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_agent_name() {
        let state = test_state();
        let first = test_app(&state)
            .oneshot(post_json("/api/agents", json!({"name": "Dev"})))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let second = test_app(&state)
            .oneshot(post_json("/api/agents", json!({"name": "Dev"})))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_projects_empty() {
        let state = test_state();
        let response = test_app(&state).oneshot(get_request("/api/projects")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let projects: Vec<Value> = body_json(response.into_body()).await;
        assert!(projects.is_empty());
    }

    #[test]
    fn test_limit_query_clamped() {
        assert_eq!(LimitQuery { limit: None }.resolve(), DEFAULT_EVENT_LIMIT);
        assert_eq!(LimitQuery { limit: Some(0) }.resolve(), 1);
        assert_eq!(LimitQuery { limit: Some(10_000) }.resolve(), MAX_EVENT_LIMIT);
    }
}
