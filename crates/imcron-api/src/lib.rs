//! # imcron api
//!
//! IM jobs on top of the distributed cron scheduler, and the HTTP surface
//! other backend services call to schedule them.
//!
//! ```text
//!  POST /cron/clear-msg ─────────┐
//!  DELETE /cron/clear-msg/{id} ──┼──▶ CronService ──▶ Dcron ──▶ JobStore
//!  POST /cron/close-voice-channel┘        │
//!                                         │ CronCycle → cron expression
//!                                         ▼
//!                     ClearMsgJob / CloseVoiceChannelJob ──▶ MessageGateway
//! ```
//!
//! Jobs are stable: their records are decoded by [`ImJobRecoverer`] when a
//! node starts or syncs, so any node of the fleet can run them.

pub mod cycle;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod recover;
pub mod routes;
pub mod server;
pub mod service;

#[cfg(test)]
mod testing;

pub use cycle::CronCycle;
pub use error::{ApiError, Result};
pub use gateway::{GatewayConfig, HttpMessageGateway, MessageGateway};
pub use jobs::{
    ClearMsgJob, CloseVoiceChannelJob, ImJobPayload, Retire, Retirement, VoiceChannel,
    clear_msg_job_name, close_voice_channel_job_name,
};
pub use recover::ImJobRecoverer;
pub use routes::{AddClearMsgJobRequest, JobListResponse, create_router};
pub use server::{ApiConfig, ApiServer};
pub use service::CronService;
