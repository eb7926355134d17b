//! Coarse clear cycles and their cron expressions.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// How often a conversation's messages are cleared.
///
/// Serialized as its wire number (1 to 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum CronCycle {
    Day = 1,
    Week = 2,
    HalfMonth = 3,
    Month = 4,
}

impl CronCycle {
    /// Cron expression that fires on this cycle at the minute and hour of
    /// `at`, anchored to its weekday or day of month where the cycle needs one.
    ///
    /// Half-month fires on day `D` and `D + 15` with `D` in 1..=15, so the
    /// second fire is skipped in months too short for it. Month clamps the
    /// day to 28 so that every month fires.
    pub fn cron_expr<T: Datelike + Timelike>(self, at: &T) -> String {
        let (minute, hour) = (at.minute(), at.hour());
        match self {
            CronCycle::Day => format!("{} {} * * *", minute, hour),
            CronCycle::Week => format!(
                "{} {} * * {}",
                minute,
                hour,
                at.weekday().num_days_from_sunday()
            ),
            CronCycle::HalfMonth => {
                let day = (at.day() - 1) % 15 + 1;
                format!("{} {} {},{} * *", minute, hour, day, day + 15)
            }
            CronCycle::Month => format!("{} {} {} * *", minute, hour, at.day().min(28)),
        }
    }
}

impl TryFrom<i32> for CronCycle {
    type Error = ApiError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CronCycle::Day),
            2 => Ok(CronCycle::Week),
            3 => Ok(CronCycle::HalfMonth),
            4 => Ok(CronCycle::Month),
            other => Err(ApiError::InvalidArgument(format!(
                "unknown cron cycle {}, expected 1 (day), 2 (week), 3 (half month) or 4 (month)",
                other
            ))),
        }
    }
}

impl From<CronCycle> for i32 {
    fn from(cycle: CronCycle) -> Self {
        cycle as i32
    }
}
