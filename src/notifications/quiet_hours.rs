use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const MAX_OFFSET_MINUTES: i32 = 14 * 60;

/// A daily local-time window during which push delivery is deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Offset of the user's local time from UTC.
    pub utc_offset_minutes: i32,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime, utc_offset_minutes: i32) -> Result<Self, AppError> {
        let quiet = Self { start, end, utc_offset_minutes };
        quiet.validate()?;
        Ok(quiet)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(AppError::ValidationError(format!(
                "utc_offset_minutes must be within ±{}",
                MAX_OFFSET_MINUTES
            )));
        }
        Ok(())
    }

    fn offset(&self) -> Duration {
        Duration::minutes(self.utc_offset_minutes as i64)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.start == self.end {
            return false;
        }
        let local = (now + self.offset()).time();
        if self.start < self.end {
            local >= self.start && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }

    /// Earliest instant strictly after `now` at which local time is `end`.
    pub fn next_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now + self.offset();
        let candidate = local.date_naive().and_time(self.end).and_utc();
        let candidate = if candidate > local {
            candidate
        } else {
            candidate + Duration::days(1)
        };
        candidate - self.offset()
    }

    pub fn defer_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.is_active(now).then(|| self.next_end(now))
    }
}
