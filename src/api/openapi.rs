//! OpenAPI specification endpoints

use actix_web::{HttpResponse, Responder, get};
use utoipa::OpenApi;

use crate::api::{health, pipeline};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Safety Radar",
        description = "AI security research monitor: manual triggers, curated briefings and pipeline status"
    ),
    paths(
        health::liveness,
        health::readiness,
        pipeline::post_trigger,
        pipeline::get_latest_briefing,
        pipeline::get_status,
        pipeline::get_recent_threats,
    ),
    components(schemas(
        health::HealthStatus,
        health::ReadinessStatus,
        health::Probe,
        pipeline::TriggerAccepted,
        pipeline::PipelineStatus,
        crate::model::PublishedBriefing,
        crate::model::DailyBriefing,
        crate::model::Trigger,
        crate::model::ThreatSignature,
        crate::model::AttackType,
        crate::model::Modality,
    )),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "pipeline", description = "Agent control and outputs")
    )
)]
pub struct ApiDoc;

/// Serve OpenAPI JSON specification
#[get("/openapi.json")]
pub async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(ApiDoc::openapi())
}

/// Serve OpenAPI YAML specification
#[get("/openapi.yaml")]
pub async fn openapi_yaml() -> HttpResponse {
    match ApiDoc::openapi().to_yaml() {
        Ok(yaml) => HttpResponse::Ok().content_type("text/yaml").body(yaml),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render OpenAPI YAML");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Configure OpenAPI routes
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(openapi_json).service(openapi_yaml);
}
