use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub redis: ComponentHealth,
    pub queue_depth: Option<u64>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// GET /health: Redis connectivity and queue depth.
///
/// State built without a queue (in-memory stores) reports Redis as
/// `"skipped"`.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let (redis_check, queue_depth) = match &state.queue {
        Some(queue) => {
            let start = std::time::Instant::now();
            let check = match queue.health_check().await {
                Ok(_) => ComponentHealth {
                    status: "ok".to_string(),
                    latency_ms: Some(start.elapsed().as_millis() as u64),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Redis health check failed");
                    ComponentHealth {
                        status: "error".to_string(),
                        latency_ms: None,
                    }
                }
            };
            let depth = queue.queue_depth().await.ok();
            if let Some(depth) = depth {
                metrics::gauge!("import_queue_depth").set(depth as f64);
            }
            (check, depth)
        }
        None => (
            ComponentHealth {
                status: "skipped".to_string(),
                latency_ms: None,
            },
            None,
        ),
    };

    let healthy = redis_check.status != "error";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            redis: redis_check,
            queue_depth,
        },
    };

    (status_code, Json(response))
}
