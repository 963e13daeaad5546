//! Operational endpoints: manual triggers, latest briefing, worker status

use actix_web::{HttpResponse, get, post, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::ApiError;
use crate::app::AppState;
use crate::model::{PublishedBriefing, ThreatSignature, Trigger};
use crate::service::curator::latest_briefing;
use crate::service::status::StatusReporter;

#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerAccepted {
    pub trigger: Trigger,
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PipelineStatus {
    /// `polling` or `processing`; absent before the worker first reports
    pub status: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub papers_pending: usize,
    pub papers_analyzed: usize,
}

/// Ask the agent loop to run a step now
#[utoipa::path(
    post,
    path = "/v1/triggers/{name}",
    params(
        ("name" = String, Path, description = "ingest, process_batch or process_with_curator")
    ),
    responses(
        (status = 202, description = "Trigger queued", body = TriggerAccepted),
        (status = 400, description = "Unknown trigger name"),
        (status = 503, description = "Agent loop is not running")
    ),
    tag = "pipeline"
)]
#[post("/v1/triggers/{name}")]
pub async fn post_trigger(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let trigger: Trigger = path.into_inner().parse()?;

    state
        .triggers
        .try_send(trigger)
        .map_err(|e| ApiError::Unavailable(format!("cannot queue trigger {trigger}: {e}")))?;

    tracing::info!(trigger = %trigger, "Trigger queued via API");
    Ok(HttpResponse::Accepted().json(TriggerAccepted {
        trigger,
        status: "queued".to_string(),
    }))
}

/// Most recently published briefing
#[utoipa::path(
    get,
    path = "/v1/briefings/latest",
    responses(
        (status = 200, description = "Latest briefing", body = PublishedBriefing),
        (status = 404, description = "No briefing published yet")
    ),
    tag = "pipeline"
)]
#[get("/v1/briefings/latest")]
pub async fn get_latest_briefing(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    match latest_briefing(state.store.as_ref()).await? {
        Some(briefing) => Ok(HttpResponse::Ok().json(briefing)),
        None => Err(ApiError::NotFound("no briefing published yet".to_string())),
    }
}

/// Worker state and queue depths
#[utoipa::path(
    get,
    path = "/v1/status",
    responses(
        (status = 200, description = "Pipeline status", body = PipelineStatus)
    ),
    tag = "pipeline"
)]
#[get("/v1/status")]
pub async fn get_status(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let reporter = StatusReporter::new(state.store.clone());

    Ok(HttpResponse::Ok().json(PipelineStatus {
        status: reporter.state().await?,
        last_activity: reporter.last_activity().await?,
        papers_pending: state.queue.len(&state.queue_config.pending_stream).await?,
        papers_analyzed: state.queue.len(&state.queue_config.analyzed_stream).await?,
    }))
}

const DEFAULT_THREAT_DAYS: u32 = 7;
const MAX_THREAT_DAYS: u32 = 365;

#[derive(Debug, Deserialize, IntoParams)]
pub struct RecentThreatsParams {
    /// Look-back window in days (default 7, max 365)
    pub days: Option<u32>,
}

/// Threats persisted within the look-back window, newest first
#[utoipa::path(
    get,
    path = "/v1/threats",
    params(RecentThreatsParams),
    responses(
        (status = 200, description = "Recent threats", body = Vec<ThreatSignature>),
        (status = 503, description = "No threat store configured")
    ),
    tag = "pipeline"
)]
#[get("/v1/threats")]
pub async fn get_recent_threats(
    state: web::Data<AppState>,
    query: web::Query<RecentThreatsParams>,
) -> Result<HttpResponse, ApiError> {
    let Some(threats) = &state.threats else {
        return Err(ApiError::Unavailable("threat store is disabled".to_string()));
    };

    let days = query.days.unwrap_or(DEFAULT_THREAT_DAYS).clamp(1, MAX_THREAT_DAYS);
    let recent = threats
        .fetch_recent(days)
        .await
        .map_err(|e| ApiError::Backend(e.to_string()))?;

    Ok(HttpResponse::Ok().json(recent))
}

/// Configure pipeline routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(post_trigger)
        .service(get_latest_briefing)
        .service(get_status)
        .service(get_recent_threats);
}
