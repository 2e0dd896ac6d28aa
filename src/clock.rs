use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, Timelike};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ClockFault;

/// Source of local wall-clock time for the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<NaiveDateTime, ClockFault>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<NaiveDateTime, ClockFault> {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ClockFault::new(format!("system time is before the UNIX epoch: {e}")))?;
        let secs = i64::try_from(since_epoch.as_secs())
            .map_err(|_| ClockFault::new("system time out of range"))?;
        let utc = DateTime::from_timestamp(secs, since_epoch.subsec_nanos())
            .ok_or_else(|| ClockFault::new("system time out of range"))?;
        Ok(utc.with_timezone(&Local).naive_local())
    }
}

/// Truncate to minute resolution, dropping seconds.
pub fn minute_of(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

#[cfg(test)]
pub use manual::ManualClock;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_of_drops_seconds() {
        let t = NaiveTime::from_hms_milli_opt(8, 0, 59, 250).unwrap();
        assert_eq!(minute_of(t), NaiveTime::from_hms_opt(8, 0, 0).unwrap());
    }

    #[test]
    fn system_clock_reads_current_time() {
        let before = Local::now().naive_local();
        let now = SystemClock.now().unwrap();
        assert!(now >= before - chrono::Duration::seconds(1));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at("2024-01-01T08:00");
        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(clock.now().unwrap().format("%H:%M").to_string(), "08:01");
        clock.set("2024-01-02T07:59");
        assert_eq!(clock.now().unwrap().format("%Y-%m-%d").to_string(), "2024-01-02");
    }
}
