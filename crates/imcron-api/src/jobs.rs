//! Jobs the IM backend schedules: conversation clean-up and idle voice
//! channel teardown.

use std::sync::Arc;

use async_trait::async_trait;
use imcron_dcron::{Job, StableJob};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cycle::CronCycle;
use crate::gateway::MessageGateway;

pub fn clear_msg_job_name(conversation_id: &str) -> String {
    format!("clearMsgJob_{}", conversation_id)
}

pub fn close_voice_channel_job_name(channel_id: &str, session_type: i32) -> String {
    format!("closeVoiceChannelJob_{}_{}", channel_id, session_type)
}

/// A voice channel to tear down, as sent by callers and forwarded to the
/// voice gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceChannel {
    pub user_id: String,
    pub channel_id: String,
    pub group_id: String,
    pub session_type: i32,
}

/// Persisted payload of every IM job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImJobPayload {
    ClearMsg {
        conversation_id: String,
        cycle: CronCycle,
    },
    CloseVoiceChannel(VoiceChannel),
}

/// Clears a conversation's messages on every cycle.
pub struct ClearMsgJob {
    name: String,
    conversation_id: String,
    cycle: CronCycle,
    cron: String,
    gateway: Arc<dyn MessageGateway>,
}

impl ClearMsgJob {
    pub fn new(
        conversation_id: impl Into<String>,
        cycle: CronCycle,
        cron: impl Into<String>,
        gateway: Arc<dyn MessageGateway>,
    ) -> Self {
        let conversation_id = conversation_id.into();
        Self {
            name: clear_msg_job_name(&conversation_id),
            conversation_id,
            cycle,
            cron: cron.into(),
            gateway,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

#[async_trait]
impl Job for ClearMsgJob {
    async fn run(&self) {
        match self.gateway.clear_conversation_msg(&self.conversation_id).await {
            Ok(()) => info!(conversation_id = %self.conversation_id, "conversation messages cleared"),
            Err(e) => warn!(
                conversation_id = %self.conversation_id,
                error = %e,
                "failed to clear conversation messages"
            ),
        }
    }

    fn as_stable(&self) -> Option<&dyn StableJob> {
        Some(self)
    }
}

impl StableJob for ClearMsgJob {
    fn job_name(&self) -> &str {
        &self.name
    }

    fn cron_expr(&self) -> &str {
        &self.cron
    }

    fn payload(&self) -> imcron_dcron::Result<serde_json::Value> {
        Ok(serde_json::to_value(ImJobPayload::ClearMsg {
            conversation_id: self.conversation_id.clone(),
            cycle: self.cycle,
        })?)
    }
}

/// A one-shot job asking to be unregistered after it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retirement {
    pub name: String,
    /// Schedule the job ran under; a job re-set since then is kept.
    pub cron: String,
}

/// Sending half of the retirement queue handed to one-shot jobs.
#[derive(Debug, Clone)]
pub struct Retire {
    tx: mpsc::UnboundedSender<Retirement>,
}

impl Retire {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Retirement>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn retire(&self, name: &str, cron: &str) {
        let retirement = Retirement {
            name: name.to_string(),
            cron: cron.to_string(),
        };
        if self.tx.send(retirement).is_err() {
            debug!(job = %name, "retirement queue closed");
        }
    }
}

/// Closes a voice channel once it has been idle long enough, then retires.
pub struct CloseVoiceChannelJob {
    name: String,
    channel: VoiceChannel,
    cron: String,
    gateway: Arc<dyn MessageGateway>,
    retire: Retire,
}

impl CloseVoiceChannelJob {
    pub fn new(
        channel: VoiceChannel,
        cron: impl Into<String>,
        gateway: Arc<dyn MessageGateway>,
        retire: Retire,
    ) -> Self {
        Self {
            name: close_voice_channel_job_name(&channel.channel_id, channel.session_type),
            channel,
            cron: cron.into(),
            gateway,
            retire,
        }
    }

    pub fn channel(&self) -> &VoiceChannel {
        &self.channel
    }
}

#[async_trait]
impl Job for CloseVoiceChannelJob {
    async fn run(&self) {
        match self.gateway.close_voice_channel(&self.channel).await {
            Ok(()) => info!(
                channel_id = %self.channel.channel_id,
                group_id = %self.channel.group_id,
                "idle voice channel closed"
            ),
            Err(e) => warn!(
                channel_id = %self.channel.channel_id,
                error = %e,
                "failed to close idle voice channel"
            ),
        }
        self.retire.retire(&self.name, &self.cron);
    }

    fn as_stable(&self) -> Option<&dyn StableJob> {
        Some(self)
    }
}

impl StableJob for CloseVoiceChannelJob {
    fn job_name(&self) -> &str {
        &self.name
    }

    fn cron_expr(&self) -> &str {
        &self.cron
    }

    fn payload(&self) -> imcron_dcron::Result<serde_json::Value> {
        Ok(serde_json::to_value(ImJobPayload::CloseVoiceChannel(
            self.channel.clone(),
        ))?)
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
