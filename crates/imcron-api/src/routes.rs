//! HTTP routes.
//!
//! - POST   /cron/clear-msg                     - AddClearMsgJob
//! - DELETE /cron/clear-msg/{conversation_id}   - RemoveClearMsgJob
//! - POST   /cron/close-voice-channel           - SetCloseVoiceChannelJob
//! - GET    /cron/jobs                          - Registered jobs on this node
//! - GET    /cron/cluster                       - Membership and convergence state
//! - GET    /health                             - Liveness

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use imcron_dcron::{ClusterStatus, JobInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::cycle::CronCycle;
use crate::error::Result;
use crate::jobs::VoiceChannel;
use crate::service::CronService;

/// Body of `POST /cron/clear-msg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddClearMsgJobRequest {
    pub conversation_id: String,
    /// Wire number of a [`CronCycle`].
    pub cycle: i32,
}

/// Response for listing jobs.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub count: usize,
    pub jobs: Vec<JobInfo>,
}

pub fn create_router(service: Arc<CronService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cron/clear-msg", post(add_clear_msg_job))
        .route(
            "/cron/clear-msg/{conversation_id}",
            delete(remove_clear_msg_job),
        )
        .route("/cron/close-voice-channel", post(set_close_voice_channel_job))
        .route("/cron/jobs", get(list_jobs))
        .route("/cron/cluster", get(cluster_status))
        .with_state(service)
}

fn ack() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// POST /cron/clear-msg
async fn add_clear_msg_job(
    State(service): State<Arc<CronService>>,
    Json(request): Json<AddClearMsgJobRequest>,
) -> Result<Json<Value>> {
    let cycle = CronCycle::try_from(request.cycle)?;
    info!(conversation_id = %request.conversation_id, ?cycle, "add clear message job");
    service
        .add_clear_msg_job(&request.conversation_id, cycle)
        .await?;
    Ok(ack())
}

/// DELETE /cron/clear-msg/{conversation_id}
async fn remove_clear_msg_job(
    State(service): State<Arc<CronService>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Value>> {
    info!(conversation_id = %conversation_id, "remove clear message job");
    service.remove_clear_msg_job(&conversation_id).await?;
    Ok(ack())
}

/// POST /cron/close-voice-channel
async fn set_close_voice_channel_job(
    State(service): State<Arc<CronService>>,
    Json(channel): Json<VoiceChannel>,
) -> Result<Json<Value>> {
    info!(channel_id = %channel.channel_id, session_type = channel.session_type, "set close voice channel job");
    service.set_close_voice_channel_job(channel).await?;
    Ok(ack())
}

/// GET /cron/jobs
async fn list_jobs(State(service): State<Arc<CronService>>) -> Json<JobListResponse> {
    let jobs = service.dcron().jobs();
    Json(JobListResponse {
        count: jobs.len(),
        jobs,
    })
}

/// GET /cron/cluster
async fn cluster_status(State(service): State<Arc<CronService>>) -> Json<ClusterStatus> {
    Json(service.dcron().status())
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
