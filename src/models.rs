use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const TIME_FORMAT: &str = "%H:%M";

/// How often a medication is taken, as offered to users.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frequency {
    #[serde(rename = "Once a day")]
    OnceADay,
    #[serde(rename = "Twice a day")]
    TwiceADay,
    #[serde(rename = "Thrice a day")]
    ThriceADay,
    #[serde(rename = "Once every two days")]
    EveryOtherDay,
}

impl Frequency {
    /// Pills consumed per day. Every-other-day doses round down to 0.
    pub fn daily_consumption(self) -> u32 {
        match self {
            Frequency::OnceADay => 1,
            Frequency::TwiceADay => 2,
            Frequency::ThriceADay => 3,
            Frequency::EveryOtherDay => 0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DoseStatus {
    #[default]
    Taken,
    Missed,
}

/// A medication record as held by the store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub id: u64,
    pub name: String,
    pub dosage: String,
    pub total_pills: u32,
    pub pills_per_day: u32,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default, with = "hhmm_opt")]
    pub scheduled_time: Option<NaiveTime>,
    #[serde(default)]
    pub last_alert_date: Option<NaiveDate>,
}

impl Medication {
    /// Whole days of supply left, `None` when no daily consumption is set.
    pub fn days_remaining(&self) -> Option<u32> {
        if self.pills_per_day == 0 {
            return None;
        }
        Some(self.total_pills / self.pills_per_day)
    }

    pub fn schedule_entry(&self) -> Option<ScheduleEntry> {
        self.scheduled_time.map(|scheduled_time| ScheduleEntry {
            id: self.id,
            name: self.name.clone(),
            dosage: self.dosage.clone(),
            scheduled_time,
            last_alert_date: self.last_alert_date,
        })
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewMedication {
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    pub total_pills: u32,
    /// Defaults to the frequency's daily consumption, or 1.
    pub pills_per_day: Option<u32>,
    pub frequency: Option<Frequency>,
    /// "HH:MM", 24 hour clock.
    pub scheduled_time: Option<String>,
}

/// Medication plus derived stock figures, as listed to clients.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MedicationView {
    #[serde(flatten)]
    pub medication: Medication,
    pub days_remaining: Option<u32>,
    pub low_stock: bool,
}

/// The alerting-relevant slice of a medication.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: u64,
    pub name: String,
    pub dosage: String,
    #[serde(with = "hhmm")]
    pub scheduled_time: NaiveTime,
    pub last_alert_date: Option<NaiveDate>,
}

/// One firing of a reminder for one medication on one day.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub medication_id: u64,
    pub name: String,
    pub dosage: String,
    pub fired_at: NaiveDateTime,
}

impl AlertEvent {
    pub fn for_entry(entry: &ScheduleEntry, fired_at: NaiveDateTime) -> AlertEvent {
        AlertEvent {
            medication_id: entry.id,
            name: entry.name.clone(),
            dosage: entry.dosage.clone(),
            fired_at,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub medication_id: u64,
    pub medication_name: String,
    #[serde(default)]
    pub status: DoseStatus,
    pub taken_at: NaiveDateTime,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoseTaken {
    pub medication_id: u64,
    pub remaining: u32,
    pub days_remaining: Option<u32>,
    pub low_stock: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TakeParams {
    pub amount: Option<u32>,
}

pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(super::TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time_of_day(&raw).map_err(D::Error::custom)
    }
}

mod hhmm_opt {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => s.serialize_some(&t.format(super::TIME_FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) if !raw.trim().is_empty() => {
                super::parse_time_of_day(&raw).map(Some).map_err(D::Error::custom)
            }
            _ => Ok(None),
        }
    }
}
