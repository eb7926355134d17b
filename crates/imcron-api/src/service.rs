//! The three scheduling operations other services call.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, TimeDelta, Timelike};
use imcron_dcron::Dcron;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cycle::CronCycle;
use crate::error::{ApiError, Result};
use crate::gateway::MessageGateway;
use crate::jobs::{
    ClearMsgJob, CloseVoiceChannelJob, Retire, Retirement, VoiceChannel, clear_msg_job_name,
};

/// Turns RPC requests into scheduler jobs.
pub struct CronService {
    dcron: Arc<Dcron>,
    gateway: Arc<dyn MessageGateway>,
    retire: Retire,
    voice_channel_idle: TimeDelta,
}

impl CronService {
    pub fn new(
        dcron: Arc<Dcron>,
        gateway: Arc<dyn MessageGateway>,
        retire: Retire,
        voice_channel_idle_minutes: u32,
    ) -> Self {
        Self {
            dcron,
            gateway,
            retire,
            voice_channel_idle: TimeDelta::minutes(i64::from(voice_channel_idle_minutes)),
        }
    }

    pub fn dcron(&self) -> &Arc<Dcron> {
        &self.dcron
    }

    /// Clear `conversation_id` on every `cycle`, at the current minute and
    /// hour.
    pub async fn add_clear_msg_job(&self, conversation_id: &str, cycle: CronCycle) -> Result<()> {
        self.add_clear_msg_job_at(conversation_id, cycle, Local::now()).await
    }

    pub async fn add_clear_msg_job_at(
        &self,
        conversation_id: &str,
        cycle: CronCycle,
        now: DateTime<Local>,
    ) -> Result<()> {
        if conversation_id.is_empty() {
            return Err(ApiError::InvalidArgument(
                "conversation_id cannot be empty".to_string(),
            ));
        }
        let cron = cycle.cron_expr(&now);
        let job = ClearMsgJob::new(conversation_id, cycle, cron, self.gateway.clone());
        self.dcron.add_stable_job(Arc::new(job)).await?;
        Ok(())
    }

    /// Stop clearing `conversation_id`. Unknown conversations are acknowledged.
    pub async fn remove_clear_msg_job(&self, conversation_id: &str) -> Result<()> {
        if conversation_id.is_empty() {
            return Err(ApiError::InvalidArgument(
                "conversation_id cannot be empty".to_string(),
            ));
        }
        self.dcron.remove(&clear_msg_job_name(conversation_id)).await?;
        Ok(())
    }

    /// Close `channel` once the idle time has passed, replacing any pending
    /// close of the same channel.
    pub async fn set_close_voice_channel_job(&self, channel: VoiceChannel) -> Result<()> {
        self.set_close_voice_channel_job_at(channel, Local::now()).await
    }

    pub async fn set_close_voice_channel_job_at(
        &self,
        channel: VoiceChannel,
        now: DateTime<Local>,
    ) -> Result<()> {
        if channel.channel_id.is_empty() {
            return Err(ApiError::InvalidArgument(
                "channel_id cannot be empty".to_string(),
            ));
        }
        let at = now + self.voice_channel_idle;
        let cron = format!("{} {} {} {} *", at.minute(), at.hour(), at.day(), at.month());
        let job = CloseVoiceChannelJob::new(channel, cron, self.gateway.clone(), self.retire.clone());

        self.dcron.replace_stable_job(Arc::new(job)).await?;
        Ok(())
    }

    /// Unregister one-shot jobs as they report in.
    pub fn spawn_retirements(&self, rx: mpsc::UnboundedReceiver<Retirement>) -> JoinHandle<()> {
        tokio::spawn(run_retirements(self.dcron.clone(), rx))
    }
}

async fn run_retirements(dcron: Arc<Dcron>, mut rx: mpsc::UnboundedReceiver<Retirement>) {
    while let Some(retirement) = rx.recv().await {
        match dcron.job(&retirement.name) {
            Some(info) if info.cron == retirement.cron => {
                match dcron.remove(&retirement.name).await {
                    Ok(()) => info!(job = %retirement.name, "one-shot job retired"),
                    Err(e) => warn!(job = %retirement.name, error = %e, "failed to retire job"),
                }
            }
            Some(_) => debug!(job = %retirement.name, "job was re-set, keeping it"),
            None => debug!(job = %retirement.name, "job already gone"),
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
