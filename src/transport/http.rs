//! HTTP API
//!
//! Topic administration, event ingestion and read access to the metrics
//! store. Shares the registries and broker with the WebSocket side through the
//! [`SessionManager`], so a topic deleted here is revoked from live sessions
//! and an event ingested here reaches current subscribers.
//!
//! Routes:
//! - `GET /ping`
//! - `GET /api/topics`, `POST /api/topics`, `DELETE /api/topics/{name}`
//! - `POST /api/events/sms`, `POST /api/events/call`
//! - `GET /api/metrics/{client_id}`, `GET /api/last/{client_id}`

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::broker::{TopicError, TopicSummary};
use crate::events::{CallEvent, SmsEvent, ValidationError};
use crate::persistence::{ClientMetrics, MetricsStore, RecentEvents, StoreError};
use crate::session::SessionManager;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(message) = &self {
            error!("request failed: {message}");
        }
        let body = json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<TopicError> for ApiError {
    fn from(err: TopicError) -> Self {
        match err {
            TopicError::Invalid => Self::BadRequest(err.to_string()),
            TopicError::AlreadyExists(_) => Self::Conflict(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        Self::BadRequest(err.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone)]
pub struct ApiState {
    pub manager: Arc<SessionManager>,
    /// Register `client:{id}:{kind}` on first ingested event.
    pub auto_create_topics: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TopicsResponse {
    pub topics: Vec<TopicSummary>,
    pub total_subscribers: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateTopic {
    pub name: String,
}

/// Outcome of one ingested event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub stored: bool,
    pub published: bool,
    pub delivered: usize,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/api/topics", get(list_topics).post(create_topic))
        .route("/api/topics/{name}", delete(delete_topic))
        .route("/api/events/sms", post(ingest_sms))
        .route("/api/events/call", post(ingest_call))
        .route("/api/metrics/{client_id}", get(client_metrics))
        .route("/api/last/{client_id}", get(last_events))
        .with_state(state)
}

/// Serve the API on an already bound listener.
pub async fn serve_http(listener: TcpListener, state: ApiState) -> std::io::Result<()> {
    info!("HTTP API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

async fn ping() -> &'static str {
    "pong"
}

async fn list_topics(State(state): State<ApiState>) -> Json<TopicsResponse> {
    let topics = state.manager.topic_summaries();
    let total_subscribers = topics.iter().map(|t| t.subscribers).sum();
    Json(TopicsResponse {
        topics,
        total_subscribers,
    })
}

async fn create_topic(
    State(state): State<ApiState>,
    body: Result<Json<CreateTopic>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = body?;
    let name = state.manager.topics().create(&request.name)?;
    info!(topic = %name, "topic created");
    Ok((StatusCode::CREATED, Json(json!({ "name": name }))))
}

async fn delete_topic(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    if state.manager.delete_topic(&name) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("topic '{name}' does not exist")))
    }
}

async fn ingest_sms(
    State(state): State<ApiState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let Json(value) = body?;
    let event = SmsEvent::parse(value)?;
    let topic = event.topic();
    let payload = serde_json::to_value(&event).map_err(|e| ApiError::Internal(e.to_string()))?;

    with_store(&state, move |store| store.record_sms(&event)).await?;
    let response = publish_event(&state, &topic, &payload)?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn ingest_call(
    State(state): State<ApiState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let Json(value) = body?;
    let event = CallEvent::parse(value)?;
    let topic = event.topic();
    let payload = serde_json::to_value(&event).map_err(|e| ApiError::Internal(e.to_string()))?;

    with_store(&state, move |store| store.record_call(&event)).await?;
    let response = publish_event(&state, &topic, &payload)?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn client_metrics(
    State(state): State<ApiState>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<ClientMetrics>> {
    let metrics = with_store(&state, move |store| store.metrics(&client_id)).await?;
    Ok(Json(metrics))
}

async fn last_events(
    State(state): State<ApiState>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<RecentEvents>> {
    let recent = with_store(&state, move |store| store.recent_events(&client_id)).await?;
    Ok(Json(recent))
}

/// Run a store call on the blocking pool.
async fn with_store<T, F>(state: &ApiState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn MetricsStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(state.manager.store());
    let result = tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?;
    Ok(result?)
}

/// Publish a stored event to its client topic, creating the topic first if
/// auto-creation is on. An unregistered topic is not an error: the event is
/// still stored, just not published.
fn publish_event(state: &ApiState, topic: &str, payload: &Value) -> ApiResult<IngestResponse> {
    let topics = state.manager.topics();
    if !topics.exists(topic) && state.auto_create_topics {
        match topics.create(topic) {
            Ok(_) => info!(%topic, "topic auto-created"),
            Err(TopicError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if !topics.exists(topic) {
        debug!(%topic, "topic not registered, event stored only");
        return Ok(IngestResponse {
            stored: true,
            published: false,
            delivered: 0,
        });
    }

    let delivered = state
        .manager
        .broker()
        .publish(topic, payload)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(IngestResponse {
        stored: true,
        published: true,
        delivered,
    })
}
