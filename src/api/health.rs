//! Health check endpoints for liveness and readiness probes

use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    Healthy,
    Unhealthy,
    /// Optional dependency not configured
    Disabled,
}

#[derive(Serialize, ToSchema)]
pub struct ReadinessStatus {
    pub status: String,
    pub version: String,
    pub redis: Probe,
    pub database: Probe,
}

impl ReadinessStatus {
    fn is_ready(&self) -> bool {
        self.redis == Probe::Healthy && self.database != Probe::Unhealthy
    }
}

fn probe<E: std::fmt::Display>(name: &str, result: Result<(), E>) -> Probe {
    match result {
        Ok(()) => Probe::Healthy,
        Err(e) => {
            tracing::error!(dependency = name, error = %e, "Health check failed");
            Probe::Unhealthy
        }
    }
}

/// Process is up
#[utoipa::path(
    get,
    path = "/health/live",
    responses(
        (status = 200, description = "Service is alive", body = HealthStatus)
    ),
    tag = "health"
)]
#[get("/health/live")]
pub async fn liveness() -> impl Responder {
    HttpResponse::Ok().json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Redis is required. PostgreSQL is optional and reported as `disabled`
/// when the service runs without a threat store.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessStatus),
        (status = 503, description = "Service is not ready", body = ReadinessStatus)
    ),
    tag = "health"
)]
#[get("/health/ready")]
pub async fn readiness(state: web::Data<AppState>) -> impl Responder {
    let redis = probe("redis", state.store.ping().await);
    let database = match &state.threats {
        Some(threats) => probe("postgres", threats.ping().await),
        None => Probe::Disabled,
    };

    let mut status = ReadinessStatus {
        status: String::new(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        redis,
        database,
    };

    if status.is_ready() {
        status.status = "ready".to_string();
        HttpResponse::Ok().json(status)
    } else {
        status.status = "not_ready".to_string();
        HttpResponse::ServiceUnavailable().json(status)
    }
}

/// Configure health check routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(liveness).service(readiness);
}
