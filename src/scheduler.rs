use chrono::{NaiveDate, NaiveTime};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::{
    sync::{mpsc, watch},
    time::Duration,
};

use crate::clock::{minute_of, Clock};
use crate::error::{ClockFault, PortError, SinkError};
use crate::models::{AlertEvent, ScheduleEntry};
use crate::ports::{AlertSink, MarkOutcome, MedicationQueryPort};

pub const DEFAULT_POLL_INTERVAL_S: u64 = 60;
pub const DEFAULT_SINK_TIMEOUT_S: u64 = 10;

/// Which scheduled entries count as due at a given minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchPolicy {
    /// Scheduled minute equals the current minute.
    Exact,
    /// Scheduled minute is at or before the current minute, same day.
    CatchUp,
}

impl MatchPolicy {
    fn matches(self, scheduled: NaiveTime, current: NaiveTime) -> bool {
        let scheduled = minute_of(scheduled);
        match self {
            MatchPolicy::Exact => scheduled == current,
            MatchPolicy::CatchUp => scheduled <= current,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub match_policy: MatchPolicy,
    pub sink_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_S),
            match_policy: MatchPolicy::Exact,
            sink_timeout: Duration::from_secs(DEFAULT_SINK_TIMEOUT_S),
        }
    }
}

/// What one tick saw and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub matched: usize,
    pub fired: usize,
    pub already_alerted: usize,
    pub gone: usize,
    pub failed: usize,
    pub read_failed: bool,
}

/// Why a polling loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    ClockFault(ClockFault),
}

/// Control over one running polling loop. Clones share the same loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    stop_flag: Arc<AtomicBool>,
    cancel: mpsc::Sender<bool>,
    exit: watch::Receiver<Option<LoopExit>>,
}

impl SchedulerHandle {
    /// Ask the loop to exit after its in-flight tick. Does not wait.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.cancel.try_send(true).ok();
    }

    pub fn is_finished(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Resolves once the loop has exited.
    pub async fn stopped(&self) -> LoopExit {
        let mut exit = self.exit.clone();
        loop {
            let current = exit.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if exit.changed().await.is_err() {
                return exit.borrow().clone().unwrap_or(LoopExit::Stopped);
            }
        }
    }
}

/// Polls for due medications and fires at most one alert per medication per day.
pub struct ReminderScheduler {
    clock: Arc<dyn Clock>,
    port: Arc<dyn MedicationQueryPort>,
    sink: Arc<dyn AlertSink>,
    config: SchedulerConfig,
    active: Mutex<Option<SchedulerHandle>>,
}

impl ReminderScheduler {
    pub fn new(clock: Arc<dyn Clock>,
        port: Arc<dyn MedicationQueryPort>,
        sink: Arc<dyn AlertSink>,
        config: SchedulerConfig) -> ReminderScheduler {

        ReminderScheduler {
            clock,
            port,
            sink,
            config,
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn the polling loop, or return the handle of the one already running.
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = active.as_ref() {
            if !handle.is_finished() {
                debug!("scheduler:: start requested but loop is already running");
                return handle.clone();
            }
        }

        let (tx, rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(None);
        let handle = SchedulerHandle {
            stop_flag: Arc::new(AtomicBool::new(false)),
            cancel: tx,
            exit: exit_rx,
        };

        tokio::spawn(Arc::clone(self).run_loop(Arc::clone(&handle.stop_flag), rx, exit_tx));
        *active = Some(handle.clone());
        info!("scheduler:: started, polling every {:?} ({:?} matching)",
            self.config.poll_interval, self.config.match_policy);
        handle
    }

    /// Signal the running loop to exit. A no-op when nothing is running.
    pub fn stop(&self) {
        let handle = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.stop();
            info!("scheduler:: stop requested");
        }
    }

    /// Handle of the most recently started loop, unless it was stopped.
    pub fn current_handle(&self) -> Option<SchedulerHandle> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    async fn run_loop(self: Arc<Self>,
        stop_flag: Arc<AtomicBool>,
        mut cancel_rx: mpsc::Receiver<bool>,
        exit_tx: watch::Sender<Option<LoopExit>>) {

        let exit = loop {
            if stop_flag.load(Ordering::SeqCst) {
                break LoopExit::Stopped;
            }

            match self.tick().await {
                Ok(report) if report.fired > 0 || report.failed > 0 || report.read_failed => {
                    info!("scheduler:: tick {:?}", report);
                }
                Ok(report) => debug!("scheduler:: tick {:?}", report),
                Err(fault) => {
                    error!("scheduler:: {}, polling loop exiting", fault);
                    break LoopExit::ClockFault(fault);
                }
            }

            if stop_flag.load(Ordering::SeqCst) {
                break LoopExit::Stopped;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancel_rx.recv() => {
                    debug!("scheduler:: loop canceled");
                    break LoopExit::Stopped;
                }
            }
        };

        info!("scheduler:: loop exited ({:?})", exit);
        exit_tx.send_replace(Some(exit));
    }

    /// Run one evaluation against the current time.
    ///
    /// Only a clock fault is returned as an error; store and sink failures are
    /// logged and counted in the report, and the next tick re-evaluates from
    /// scratch.
    pub async fn tick(&self) -> Result<TickReport, ClockFault> {
        let now = self.clock.now()?;
        let current_time = minute_of(now.time());
        let today = now.date();
        let mut report = TickReport::default();

        let entries = match self.candidates(current_time).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("scheduler:: could not read due medications at {}: {}", current_time.format("%H:%M"), e);
                report.read_failed = true;
                return Ok(report);
            }
        };

        for entry in entries {
            if !self.config.match_policy.matches(entry.scheduled_time, current_time) {
                continue;
            }
            report.matched += 1;
            if entry.last_alert_date == Some(today) {
                report.already_alerted += 1;
                continue;
            }

            match self.claim(&entry, today).await {
                Ok(MarkOutcome::Marked) => {
                    self.deliver(AlertEvent::for_entry(&entry, now)).await;
                    report.fired += 1;
                }
                Ok(MarkOutcome::AlreadyMarked) => report.already_alerted += 1,
                Ok(MarkOutcome::NotFound) => {
                    debug!("scheduler:: medication {} was removed before its alert", entry.id);
                    report.gone += 1;
                }
                Err(e) => {
                    warn!("scheduler:: could not record alert for medication {}: {}", entry.id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn candidates(&self, current_time: NaiveTime) -> Result<Vec<ScheduleEntry>, PortError> {
        match self.config.match_policy {
            MatchPolicy::Exact => self.port.list_due(current_time).await,
            MatchPolicy::CatchUp => self.port.list_due_through(current_time).await,
        }
    }

    async fn claim(&self, entry: &ScheduleEntry, today: NaiveDate) -> Result<MarkOutcome, PortError> {
        self.port.mark_alerted(entry.id, today).await
    }

    async fn deliver(&self, event: AlertEvent) {
        let result = match tokio::time::timeout(self.config.sink_timeout, self.sink.notify(&event)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(self.config.sink_timeout)),
        };
        if let Err(e) = result {
            warn!("scheduler:: sink {} failed for medication {}: {}", self.sink.name(), event.medication_id, e);
        }
    }
}
