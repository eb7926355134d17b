//! Rebuilds persisted IM jobs.

use std::sync::Arc;

use imcron_dcron::{DcronError, Job, JobRecoverer, StableJob, StableJobRecord};

use crate::gateway::MessageGateway;
use crate::jobs::{ClearMsgJob, CloseVoiceChannelJob, ImJobPayload, Retire};

/// Decodes [`ImJobPayload`] records back into jobs.
pub struct ImJobRecoverer {
    gateway: Arc<dyn MessageGateway>,
    retire: Retire,
}

impl ImJobRecoverer {
    pub fn new(gateway: Arc<dyn MessageGateway>, retire: Retire) -> Self {
        Self { gateway, retire }
    }
}

impl JobRecoverer for ImJobRecoverer {
    fn recover(&self, record: &StableJobRecord) -> imcron_dcron::Result<Arc<dyn Job>> {
        let payload: ImJobPayload =
            serde_json::from_value(record.payload.clone()).map_err(|e| DcronError::Recover {
                name: record.name.clone(),
                reason: e.to_string(),
            })?;

        let (name, job): (String, Arc<dyn Job>) = match payload {
            ImJobPayload::ClearMsg {
                conversation_id,
                cycle,
            } => {
                let job = ClearMsgJob::new(conversation_id, cycle, &record.cron, self.gateway.clone());
                (job.job_name().to_string(), Arc::new(job))
            }
            ImJobPayload::CloseVoiceChannel(channel) => {
                let job = CloseVoiceChannelJob::new(
                    channel,
                    &record.cron,
                    self.gateway.clone(),
                    self.retire.clone(),
                );
                (job.job_name().to_string(), Arc::new(job))
            }
        };

        if name != record.name {
            return Err(DcronError::Recover {
                name: record.name.clone(),
                reason: format!("payload describes job '{}'", name),
            });
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::RecordingGateway;

    fn recoverer() -> (Arc<RecordingGateway>, ImJobRecoverer) {
        let gateway = Arc::new(RecordingGateway::default());
        let (retire, _rx) = Retire::channel();
        (gateway.clone(), ImJobRecoverer::new(gateway, retire))
    }

    #[tokio::test]
    async fn test_recover_clear_msg_job() {
        let (gateway, recoverer) = recoverer();
        let record = StableJobRecord {
            name: "clearMsgJob_si_1_2".to_string(),
            cron: "7 14 * * *".to_string(),
            payload: json!({"kind": "clear_msg", "conversation_id": "si_1_2", "cycle": 1}),
        };

        let job = recoverer.recover(&record).unwrap();
        let stable = job.as_stable().unwrap();
        assert_eq!(stable.job_name(), "clearMsgJob_si_1_2");
        assert_eq!(stable.cron_expr(), "7 14 * * *");
        assert_eq!(stable.payload().unwrap(), record.payload);

        job.run().await;
        assert_eq!(gateway.cleared(), vec!["si_1_2".to_string()]);
    }

    #[test]
    fn test_recover_close_voice_channel_job() {
        let (_gateway, recoverer) = recoverer();
        let record = StableJobRecord {
            name: "closeVoiceChannelJob_ch9_2".to_string(),
            cron: "12 15 5 3 *".to_string(),
            payload: json!({
                "kind": "close_voice_channel",
                "user_id": "u1",
                "channel_id": "ch9",
                "group_id": "g3",
                "session_type": 2
            }),
        };

        let job = recoverer.recover(&record).unwrap();
        assert_eq!(job.as_stable().unwrap().payload().unwrap(), record.payload);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let (_gateway, recoverer) = recoverer();
        let record = StableJobRecord {
            name: "x".to_string(),
            cron: "* * * * *".to_string(),
            payload: json!({"kind": "send_birthday_card"}),
        };
        let err = recoverer.recover(&record).err().unwrap();
        assert!(matches!(err, DcronError::Recover { .. }));
    }

    #[test]
    fn test_name_mismatch_is_rejected() {
        let (_gateway, recoverer) = recoverer();
        let record = StableJobRecord {
            name: "clearMsgJob_other".to_string(),
            cron: "7 14 * * *".to_string(),
            payload: json!({"kind": "clear_msg", "conversation_id": "si_1_2", "cycle": 1}),
        };
        let err = recoverer.recover(&record).err().unwrap();
        assert!(err.to_string().contains("clearMsgJob_si_1_2"));
    }
}
