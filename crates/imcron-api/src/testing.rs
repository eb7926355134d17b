//! Test doubles shared by the unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::{ApiError, Result};
use crate::gateway::MessageGateway;
use crate::jobs::VoiceChannel;

/// Records every call; fails them all once `set_failing(true)`.
#[derive(Default)]
pub(crate) struct RecordingGateway {
    cleared: Mutex<Vec<String>>,
    closed: Mutex<Vec<VoiceChannel>>,
    failing: AtomicBool,
}

impl RecordingGateway {
    pub(crate) fn cleared(&self) -> Vec<String> {
        self.cleared.lock().unwrap().clone()
    }

    pub(crate) fn closed(&self) -> Vec<VoiceChannel> {
        self.closed.lock().unwrap().clone()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Gateway("gateway down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageGateway for RecordingGateway {
    async fn clear_conversation_msg(&self, conversation_id: &str) -> Result<()> {
        self.cleared.lock().unwrap().push(conversation_id.to_string());
        self.check()
    }

    async fn close_voice_channel(&self, channel: &VoiceChannel) -> Result<()> {
        self.closed.lock().unwrap().push(channel.clone());
        self.check()
    }
}
