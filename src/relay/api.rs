use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::command::{self, Command, CommandMessage};
use crate::error::StoreError;
use crate::mqtt::Publish;
use crate::store::{ReadingFilter, ReadingStore};
use crate::telemetry::StoredReading;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ReadingStore>,
    pub publisher: Arc<dyn Publish>,
    pub command_topic: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidFilter(String),

    #[error("Failed to retrieve data")]
    Store(#[from] StoreError),

    #[error("No data received yet.")]
    NoData,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::InvalidFilter(_) => (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() })),
            ApiError::Store(e) => {
                error!("Store query failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": self.to_string() }))
            }
            ApiError::NoData => (StatusCode::NOT_FOUND, json!({ "message": self.to_string() })),
        };

        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/data", get(data_handler))
        .route("/api/latest", get(latest_handler))
        .route("/api/send-command", get(send_command_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn data_handler(
    State(state): State<ApiState>,
    query: Result<Query<ReadingFilter>, QueryRejection>,
) -> Result<Json<Vec<StoredReading>>, ApiError> {
    let Query(filter) = query.map_err(|e| ApiError::InvalidFilter(e.body_text()))?;
    filter.validate().map_err(ApiError::InvalidFilter)?;
    Ok(Json(state.store.fetch(&filter).await?))
}

async fn latest_handler(State(state): State<ApiState>) -> Result<Json<StoredReading>, ApiError> {
    state.store.latest().await?.map(Json).ok_or(ApiError::NoData)
}

#[derive(Deserialize, Default)]
pub struct CommandParams {
    command: Option<String>,
    target: Option<String>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct CommandResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CommandResponse {
    fn failed(status: StatusCode, error: &str) -> (StatusCode, Json<CommandResponse>) {
        (
            status,
            Json(CommandResponse {
                success: false,
                message: None,
                error: Some(error.to_string()),
            }),
        )
    }
}

/// Publishes a control token; `stop` unless `?command=` says otherwise.
async fn send_command_handler(
    State(state): State<ApiState>,
    Query(params): Query<CommandParams>,
) -> (StatusCode, Json<CommandResponse>) {
    let command = match params.command.as_deref() {
        None => Command::Stop,
        Some(raw) => match raw.parse() {
            Ok(command) => command,
            Err(()) => return CommandResponse::failed(StatusCode::BAD_REQUEST, "Unknown command"),
        },
    };
    let message = match params.target.filter(|t| !t.trim().is_empty()) {
        Some(target) => CommandMessage::to(command, target.trim()),
        None => CommandMessage::broadcast(command),
    };

    match command::send(state.publisher.as_ref(), &state.command_topic, &message).await {
        Ok(()) => (
            StatusCode::OK,
            Json(CommandResponse {
                success: true,
                message: Some("Command sent".to_string()),
                error: None,
            }),
        ),
        Err(e) => {
            error!("Publish error: {}", e);
            CommandResponse::failed(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send command")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::publisher::RecordingPublisher;
    use crate::store::MemoryStore;
    use crate::telemetry::SensorReading;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    struct BrokenStore;

    #[async_trait]
    impl ReadingStore for BrokenStore {
        async fn insert(&self, _row: &StoredReading) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn fetch(&self, _filter: &ReadingFilter) -> Result<Vec<StoredReading>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    fn row(hour: u32) -> StoredReading {
        let payload = format!(
            r#"{{"uid":"a1b2","timestamp":"2024-01-15T{:02}:00:00.000Z","loc":"Adyar","battery_voltage":"3.90","weight":"72.5","rep_count":15}}"#,
            hour
        );
        SensorReading::from_json(payload.as_bytes()).unwrap().into()
    }

    fn app(store: Arc<dyn ReadingStore>, publisher: Arc<RecordingPublisher>) -> Router {
        router(ApiState {
            store,
            publisher,
            command_topic: "iot/device/command".to_string(),
        })
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn data_returns_all_rows() {
        let store = Arc::new(MemoryStore::default());
        store.insert(&row(10)).await.unwrap();
        store.insert(&row(11)).await.unwrap();

        let (status, body) = get(app(store, Arc::default()), "/api/data").await;

        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["date"], "2024-01-15");
        assert_eq!(rows[0]["weight"], "72.5");
        assert_eq!(rows[0]["rep_count"], 15);
    }

    #[tokio::test]
    async fn data_filters_by_hour() {
        let store = Arc::new(MemoryStore::default());
        store.insert(&row(10)).await.unwrap();
        store.insert(&row(11)).await.unwrap();

        let (status, body) = get(app(store, Arc::default()), "/api/data?month=1&day=15&hour=11").await;

        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["timestamp"], "2024-01-15T11:00:00.000Z");
    }

    #[tokio::test]
    async fn data_rejects_out_of_range_filter() {
        let store = Arc::new(MemoryStore::default());
        let (status, body) = get(app(store, Arc::default()), "/api/data?hour=24").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "hour must be between 0 and 23");
    }

    #[tokio::test]
    async fn data_rejects_malformed_filter_as_json() {
        let store = Arc::new(MemoryStore::default());
        let (status, body) = get(app(store, Arc::default()), "/api/data?month=abc").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("Failed to deserialize query string"), "{}", error);
    }

    #[tokio::test]
    async fn data_reports_store_failure() {
        let (status, body) = get(app(Arc::new(BrokenStore), Arc::default()), "/api/data").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Failed to retrieve data" }));
    }

    #[tokio::test]
    async fn latest_row() {
        let store = Arc::new(MemoryStore::default());
        let (status, body) = get(app(store.clone(), Arc::default()), "/api/latest").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "No data received yet.");

        store.insert(&row(10)).await.unwrap();
        store.insert(&row(12)).await.unwrap();
        let (status, body) = get(app(store, Arc::default()), "/api/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timestamp"], "2024-01-15T12:00:00.000Z");
    }

    #[tokio::test]
    async fn send_command_defaults_to_stop() {
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(MemoryStore::default());

        let (status, body) = get(app(store, publisher.clone()), "/api/send-command").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "message": "Command sent" }));
        assert_eq!(
            publisher.sent().await,
            vec![("iot/device/command".to_string(), b"stop".to_vec())]
        );
    }

    #[tokio::test]
    async fn send_command_with_target() {
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(MemoryStore::default());

        let (status, _) = get(
            app(store, publisher.clone()),
            "/api/send-command?command=START&target=a1b2",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(publisher.sent().await[0].1, b"start@a1b2".to_vec());
    }

    #[tokio::test]
    async fn send_command_rejects_unknown() {
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(MemoryStore::default());

        let (status, body) = get(app(store, publisher.clone()), "/api/send-command?command=reboot").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "success": false, "error": "Unknown command" }));
        assert_eq!(publisher.count().await, 0);
    }

    #[tokio::test]
    async fn send_command_reports_publish_failure() {
        let publisher = Arc::new(RecordingPublisher::default());
        publisher.set_failing(true);
        let store = Arc::new(MemoryStore::default());

        let (status, body) = get(app(store, publisher), "/api/send-command").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "success": false, "error": "Failed to send command" }));
    }
}
