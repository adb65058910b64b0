//! Operator HTTP API for the replication engine.
//!
//! Six JSON endpoints under `/data-sync`: the engine status report,
//! per-region metrics, a manual re-sync trigger, and the health views. All
//! replication failure reporting happens here; nothing is surfaced
//! synchronously to writers.

use crate::config::MgmtConfig;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use geosync_repl::engine::SyncEngine;
use geosync_repl::error::SyncError;
use geosync_repl::health::{HealthSummary, RegionHealth};
use geosync_repl::log::{JsonMap, Operation, ReplicationEntry, SyncTable};
use geosync_repl::metrics::{RegionMetrics, StatusReport};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Request body for the manual-sync trigger.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSyncRequest {
    /// Table of the record to re-propagate.
    pub table_name: String,
    /// Identifier of the record to re-propagate.
    pub record_id: String,
}

/// JSON error envelope with the status code a [`SyncError`] maps to.
struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::EntryNotFound { .. }
            | SyncError::RegionNotFound { .. }
            | SyncError::ConflictNotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::UnknownTable { .. }
            | SyncError::UnsupportedOperation { .. }
            | SyncError::UnknownStrategy { .. } => StatusCode::BAD_REQUEST,
            SyncError::StorageUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// The operator API over one running engine.
pub struct SyncApi {
    engine: Arc<SyncEngine>,
    config: Arc<MgmtConfig>,
}

impl SyncApi {
    /// Create the API surface for an engine.
    pub fn new(engine: Arc<SyncEngine>, config: Arc<MgmtConfig>) -> Self {
        Self { engine, config }
    }

    /// Build the `/data-sync` router.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/data-sync/status", get(status_handler))
            .route("/data-sync/metrics/:region_id", get(region_metrics_handler))
            .route("/data-sync/manual-sync", post(manual_sync_handler))
            .route("/data-sync/health", get(health_summary_handler))
            .route("/data-sync/health/regions", get(regions_health_handler))
            .route(
                "/data-sync/health/regions/:region_id",
                get(region_health_handler),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Bind the configured address and serve until the process stops.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.config.bind_addr;
        let router = Arc::new(self).router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("operator API listening on {}", addr);

        axum::serve(listener, router.into_make_service()).await?;
        Ok(())
    }
}

async fn status_handler(
    State(api): State<Arc<SyncApi>>,
) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(api.engine.status_report().await?))
}

async fn region_metrics_handler(
    State(api): State<Arc<SyncApi>>,
    Path(region_id): Path<Uuid>,
) -> Result<Json<RegionMetrics>, ApiError> {
    Ok(Json(api.engine.region_metrics(region_id).await?))
}

async fn manual_sync_handler(
    State(api): State<Arc<SyncApi>>,
    Json(request): Json<ManualSyncRequest>,
) -> Result<Json<ReplicationEntry>, ApiError> {
    let table = SyncTable::parse(&request.table_name)?;

    let mut data = JsonMap::new();
    data.insert(
        "id".to_string(),
        serde_json::Value::String(request.record_id.clone()),
    );
    data.insert(
        "force_sync_timestamp".to_string(),
        serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
    );

    let entry = api
        .engine
        .log_operation(table, &request.record_id, Operation::Update, data, None)
        .await?;
    tracing::info!(
        table = %entry.table,
        record_id = %entry.record_id,
        log_id = %entry.id,
        "manual sync triggered"
    );
    Ok(Json(entry))
}

async fn health_summary_handler(
    State(api): State<Arc<SyncApi>>,
) -> Result<Json<HealthSummary>, ApiError> {
    Ok(Json(api.engine.health_summary().await?))
}

async fn regions_health_handler(State(api): State<Arc<SyncApi>>) -> Json<Vec<RegionHealth>> {
    Json(api.engine.all_region_health())
}

async fn region_health_handler(
    State(api): State<Arc<SyncApi>>,
    Path(region_id): Path<Uuid>,
) -> Response {
    match api.engine.region_health(region_id) {
        Some(health) => Json(health).into_response(),
        None => Json(serde_json::json!({
            "status": "inactive",
            "message": "Region not found or health data not available",
        }))
        .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use geosync_repl::config::SyncConfig;
    use geosync_repl::link::MemRouter;
    use geosync_repl::queue::MemQueue;
    use geosync_repl::region::Region;
    use geosync_repl::store::{MemStore, SyncStore};
    use tower::ServiceExt;

    struct Fixture {
        store: Arc<MemStore>,
        router_mem: Arc<MemRouter>,
        engine: Arc<SyncEngine>,
        router: Router,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemStore::new());
        let queue = Arc::new(MemQueue::default());
        let router_mem = Arc::new(MemRouter::new());
        let config = SyncConfig {
            region_name: "us-east-1".to_string(),
            sync_interval_ms: 100,
            health_check_interval_ms: 200,
            ..SyncConfig::default()
        };
        let engine = SyncEngine::start(config, store.clone(), queue, router_mem.clone())
            .await
            .unwrap();
        let api = Arc::new(SyncApi::new(
            engine.clone(),
            Arc::new(MgmtConfig::default()),
        ));
        Fixture {
            store,
            router_mem,
            engine,
            router: api.router(),
        }
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post_json(router: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let fx = fixture().await;
        let (status, json) = get_json(fx.router.clone(), "/data-sync/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["current_region"]["name"], "us-east-1");
        assert_eq!(json["stats"]["pending_count"], 0);
        assert!(json["recent_entries"].as_array().unwrap().is_empty());
        assert_eq!(json["regions"].as_array().unwrap().len(), 1);
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_region_metrics_endpoint() {
        let fx = fixture().await;
        let target = Region::new("eu-west-1", "db-b", 5432);
        fx.store.insert_region(target.clone()).await.unwrap();

        let uri = format!("/data-sync/metrics/{}", target.id);
        let (status, json) = get_json(fx.router.clone(), &uri).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["region_id"], target.id.to_string());
        assert_eq!(json["total_count"], 0);
        assert_eq!(json["avg_latency_seconds"], 0.0);
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_region_metrics_rejects_malformed_id() {
        let fx = fixture().await;
        let request = Request::builder()
            .uri("/data-sync/metrics/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let response = fx.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_sync_creates_pending_update_entry() {
        let fx = fixture().await;
        let (status, json) = post_json(
            fx.router.clone(),
            "/data-sync/manual-sync",
            r#"{"tableName": "messages", "recordId": "m1"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["operation"], "update");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["data"]["id"], "m1");
        assert!(json["data"]["force_sync_timestamp"].is_string());

        let report = fx.engine.status_report().await.unwrap();
        assert_eq!(report.recent_entries.len(), 1);
        assert_eq!(report.recent_entries[0].record_id, "m1");
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_sync_rejects_unknown_table() {
        let fx = fixture().await;
        let (status, json) = post_json(
            fx.router.clone(),
            "/data-sync/manual-sync",
            r#"{"tableName": "wallets", "recordId": "w1"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "unknown table: wallets");
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_summary_endpoint() {
        let fx = fixture().await;
        let (status, json) = get_json(fx.router.clone(), "/data-sync/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_regions"], 1);
        assert!(json["overall_health"].is_string());
        fx.engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_region_health_endpoint_after_check_cycle() {
        let fx = fixture().await;
        let target = Region::new("eu-west-1", "db-b", 5432);
        fx.store.insert_region(target.clone()).await.unwrap();
        fx.router_mem.add_region(&target).set_ping_latency_ms(42);

        // Let the health loop complete a cycle.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        let uri = format!("/data-sync/health/regions/{}", target.id);
        let (status, json) = get_json(fx.router.clone(), &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["region_name"], "eu-west-1");
        assert_eq!(json["status"], "active");
        assert_eq!(json["latency_ms"], 42.0);

        let (status, json) = get_json(fx.router.clone(), "/data-sync/health/regions").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!json.as_array().unwrap().is_empty());
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_region_health_falls_back_to_inactive() {
        let fx = fixture().await;
        let uri = format!("/data-sync/health/regions/{}", Uuid::new_v4());
        let (status, json) = get_json(fx.router.clone(), &uri).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "inactive");
        assert_eq!(
            json["message"],
            "Region not found or health data not available"
        );
        fx.engine.shutdown().await;
    }
}
