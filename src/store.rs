use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::{PortError, StoreError};
use crate::models::{
    parse_time_of_day, DoseStatus, DoseTaken, Frequency, HistoryEntry, Medication, MedicationView,
    NewMedication, ScheduleEntry,
};
use crate::ports::{MarkOutcome, MedicationQueryPort};

pub const DEFAULT_LOW_STOCK_DAYS: u32 = 3;

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
struct StoreData {
    #[serde(default)]
    medications: Vec<Medication>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    /// Next id to hand out. Ids are never reused, even after a delete.
    #[serde(default)]
    next_id: u64,
}

impl StoreData {
    fn find_mut(&mut self, id: u64) -> Option<&mut Medication> {
        self.medications.iter_mut().find(|m| m.id == id)
    }

    fn allocate_id(&mut self) -> Result<u64, StoreError> {
        let exhausted = || StoreError::Invalid("no medication ids left".into());
        let floor = match self.medications.iter().map(|m| m.id).max() {
            Some(max) => max.checked_add(1).ok_or_else(exhausted)?,
            None => 1,
        };
        let id = self.next_id.max(floor);
        self.next_id = id.checked_add(1).ok_or_else(exhausted)?;
        Ok(id)
    }

    fn record(&mut self, id: u64, status: DoseStatus) -> Option<HistoryEntry> {
        let medication_name = self.medications.iter().find(|m| m.id == id)?.name.clone();
        let entry = HistoryEntry {
            medication_id: id,
            medication_name,
            status,
            taken_at: Local::now().naive_local(),
        };
        self.history.push(entry.clone());
        Some(entry)
    }
}

/// Medication table shared by the HTTP handlers and the reminder scheduler.
///
/// Every mutation is written through to the JSON snapshot when the store was
/// opened with a path. Writers hold the lock across the snapshot write, so a
/// failed write can be rolled back before anyone observes it.
pub struct MedicationStore {
    data: RwLock<StoreData>,
    path: Option<PathBuf>,
    low_stock_days: u32,
}

impl MedicationStore {
    pub fn in_memory() -> MedicationStore {
        MedicationStore {
            data: RwLock::new(StoreData::default()),
            path: None,
            low_stock_days: DEFAULT_LOW_STOCK_DAYS,
        }
    }

    /// Load the snapshot at `path`, creating an empty one if it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<MedicationStore, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreData>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let empty = StoreData::default();
                write_snapshot(&path, &empty).await?;
                info!("store:: created empty store at {}", path.display());
                empty
            }
            Err(e) => return Err(e.into()),
        };
        info!("store:: loaded {} medications and {} history entries from {}",
            data.medications.len(), data.history.len(), path.display());

        Ok(MedicationStore {
            data: RwLock::new(data),
            path: Some(path),
            low_stock_days: DEFAULT_LOW_STOCK_DAYS,
        })
    }

    pub fn with_low_stock_days(mut self, days: u32) -> MedicationStore {
        self.low_stock_days = days;
        self
    }

    async fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_snapshot(path, data).await,
            None => Ok(()),
        }
    }

    fn view(&self, medication: Medication) -> MedicationView {
        let days_remaining = medication.days_remaining();
        MedicationView {
            low_stock: self.is_low(days_remaining),
            days_remaining,
            medication,
        }
    }

    fn is_low(&self, days_remaining: Option<u32>) -> bool {
        matches!(days_remaining, Some(days) if days < self.low_stock_days)
    }

    pub async fn add_medication(&self, new: NewMedication) -> Result<Medication, StoreError> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::Invalid("name must not be empty".into()));
        }
        let pills_per_day = match (new.pills_per_day, new.frequency) {
            (Some(count), _) => count,
            (None, Some(frequency)) => frequency.daily_consumption(),
            (None, None) => 1,
        };
        // Only an every-other-day schedule may consume less than a pill a day.
        if pills_per_day == 0 && new.frequency != Some(Frequency::EveryOtherDay) {
            return Err(StoreError::Invalid("pills per day must be a positive whole number".into()));
        }
        let scheduled_time = match new.scheduled_time.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(parse_time_of_day(raw)
                .map_err(|_| StoreError::Invalid(format!("scheduled time {raw:?} is not HH:MM")))?),
            _ => None,
        };

        let mut data = self.data.write().await;
        let previous_next_id = data.next_id;
        let medication = Medication {
            id: data.allocate_id()?,
            name,
            dosage: new.dosage.trim().to_string(),
            total_pills: new.total_pills,
            pills_per_day,
            frequency: new.frequency,
            scheduled_time,
            last_alert_date: None,
        };
        data.medications.push(medication.clone());
        if let Err(e) = self.persist(&data).await {
            data.medications.pop();
            data.next_id = previous_next_id;
            return Err(e);
        }

        info!("store:: added medication {} ({})", medication.id, medication.name);
        Ok(medication)
    }

    pub async fn get_medication(&self, id: u64) -> Option<Medication> {
        self.data.read().await.medications.iter().find(|m| m.id == id).cloned()
    }

    pub async fn list_medications(&self) -> Vec<MedicationView> {
        let medications = self.data.read().await.medications.clone();
        medications.into_iter().map(|m| self.view(m)).collect()
    }

    pub async fn delete_medication(&self, id: u64) -> Result<Medication, StoreError> {
        let mut data = self.data.write().await;
        let index = data.medications.iter().position(|m| m.id == id)
            .ok_or(StoreError::NotFound(id))?;
        let removed = data.medications.remove(index);
        if let Err(e) = self.persist(&data).await {
            data.medications.insert(index, removed);
            return Err(e);
        }
        info!("store:: deleted medication {} ({})", removed.id, removed.name);
        Ok(removed)
    }

    /// Record a dose: decrement stock (never below zero) and log it.
    pub async fn take_dose(&self, id: u64, amount: u32) -> Result<DoseTaken, StoreError> {
        let mut data = self.data.write().await;
        let snapshot = data.clone();

        let medication = data.find_mut(id).ok_or(StoreError::NotFound(id))?;
        medication.total_pills = medication.total_pills.saturating_sub(amount);
        let taken = DoseTaken {
            medication_id: id,
            remaining: medication.total_pills,
            days_remaining: medication.days_remaining(),
            low_stock: false,
        };
        data.record(id, DoseStatus::Taken);

        if let Err(e) = self.persist(&data).await {
            *data = snapshot;
            return Err(e);
        }

        debug!("store:: medication {} taken, {} pills left", id, taken.remaining);
        Ok(DoseTaken { low_stock: self.is_low(taken.days_remaining), ..taken })
    }

    /// Log a skipped dose. Stock is left as it is.
    pub async fn record_missed(&self, id: u64) -> Result<HistoryEntry, StoreError> {
        let mut data = self.data.write().await;
        let entry = data.record(id, DoseStatus::Missed).ok_or(StoreError::NotFound(id))?;
        if let Err(e) = self.persist(&data).await {
            data.history.pop();
            return Err(e);
        }
        debug!("store:: medication {} missed", id);
        Ok(entry)
    }

    /// Dose history, newest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        let mut history = self.data.read().await.history.clone();
        history.sort_by(|a, b| b.taken_at.cmp(&a.taken_at));
        history
    }

    async fn scheduled_where<F>(&self, keep: F) -> Vec<ScheduleEntry>
    where
        F: Fn(NaiveTime) -> bool,
    {
        self.data.read().await.medications.iter()
            .filter_map(Medication::schedule_entry)
            .filter(|e| keep(e.scheduled_time))
            .collect()
    }
}

#[async_trait]
impl MedicationQueryPort for MedicationStore {
    async fn list_due(&self, current_time: NaiveTime) -> Result<Vec<ScheduleEntry>, PortError> {
        Ok(self.scheduled_where(|t| same_minute(t, current_time)).await)
    }

    async fn list_due_through(&self, current_time: NaiveTime) -> Result<Vec<ScheduleEntry>, PortError> {
        Ok(self.scheduled_where(|t| t <= current_time).await)
    }

    async fn mark_alerted(&self, medication_id: u64, date: NaiveDate) -> Result<MarkOutcome, PortError> {
        let mut data = self.data.write().await;
        let Some(medication) = data.find_mut(medication_id) else {
            return Ok(MarkOutcome::NotFound);
        };
        if medication.last_alert_date == Some(date) {
            return Ok(MarkOutcome::AlreadyMarked);
        }
        let previous = medication.last_alert_date.replace(date);

        if let Err(e) = self.persist(&data).await {
            if let Some(medication) = data.find_mut(medication_id) {
                medication.last_alert_date = previous;
            }
            return Err(e.into());
        }
        Ok(MarkOutcome::Marked)
    }
}

fn same_minute(a: NaiveTime, b: NaiveTime) -> bool {
    a.hour() == b.hour() && a.minute() == b.minute()
}

async fn write_snapshot(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(data)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
