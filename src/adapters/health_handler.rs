use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::config::AgentRole;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub role: AgentRole,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub config: String,
    pub workers: usize,
}

pub struct HealthHandler {
    role: AgentRole,
    workers: usize,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(role: AgentRole, workers: usize) -> Self {
        Self {
            role,
            workers,
            start_time: std::time::Instant::now(),
        }
    }

    /// Basic health check - returns 200 if server is running
    pub async fn health(&self) -> impl IntoResponse {
        let status = HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            role: self.role,
            checks: HealthChecks {
                config: "ok".to_string(),
                workers: self.workers,
            },
        };

        (StatusCode::OK, Json(status))
    }

    /// Readiness check - a coordinator needs at least one worker
    pub async fn ready(&self) -> impl IntoResponse {
        if self.role != AgentRole::Coordinator || self.workers > 0 {
            (StatusCode::OK, Json(serde_json::json!({
                "status": "ready",
                "message": "Server is ready to accept tasks"
            })))
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({
                "status": "not_ready",
                "message": "No workers configured"
            })))
        }
    }

    /// Liveness check - returns 200 if server is alive
    pub async fn live(&self) -> impl IntoResponse {
        (StatusCode::OK, Json(serde_json::json!({
            "status": "alive",
            "message": "Server is alive"
        })))
    }
}
