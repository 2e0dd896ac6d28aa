use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};

use crate::error::{PortError, SinkError};
use crate::models::{AlertEvent, ScheduleEntry};

/// Result of trying to claim a medication's alert for a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    /// Some other writer already recorded this date.
    AlreadyMarked,
    /// The record was deleted since it was read.
    NotFound,
}

/// Read side and narrow write side of the medication store, as seen by the scheduler.
#[async_trait]
pub trait MedicationQueryPort: Send + Sync {
    /// Entries scheduled exactly at `current_time` (minute resolution).
    async fn list_due(&self, current_time: NaiveTime) -> Result<Vec<ScheduleEntry>, PortError>;

    /// Entries scheduled at or before `current_time` on the current day.
    async fn list_due_through(&self, current_time: NaiveTime) -> Result<Vec<ScheduleEntry>, PortError>;

    /// Set `last_alert_date = date` unless it already holds `date`.
    /// The check and the write happen as one step.
    async fn mark_alerted(&self, medication_id: u64, date: NaiveDate) -> Result<MarkOutcome, PortError>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, event: &AlertEvent) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}
