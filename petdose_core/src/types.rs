//! Core domain types for the pet medication reminder system.
//!
//! This module defines:
//! - The stored medication record and the schedule derived from it
//! - Dose instants produced by the schedule generator
//! - Device notification state and requests
//! - Advisories returned alongside generated doses

use crate::time::TimeOfDay;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enumerations
// ============================================================================

/// Recurrence period of a dosing frequency
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "day" => Some(Period::Day),
            "week" => Some(Period::Week),
            "month" => Some(Period::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }
}

/// Unit a dose amount is measured in
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DoseUnit {
    Mg,
    Mcg,
    G,
    Ml,
    Tablet,
    Capsule,
    Drop,
    Puff,
    Unit,
    Application,
}

impl DoseUnit {
    pub fn parse(s: &str) -> Option<Self> {
        let unit = match s.trim().to_lowercase().as_str() {
            "mg" => DoseUnit::Mg,
            "mcg" => DoseUnit::Mcg,
            "g" => DoseUnit::G,
            "ml" => DoseUnit::Ml,
            "tablet" | "tablets" => DoseUnit::Tablet,
            "capsule" | "capsules" => DoseUnit::Capsule,
            "drop" | "drops" => DoseUnit::Drop,
            "puff" | "puffs" => DoseUnit::Puff,
            "unit" | "units" => DoseUnit::Unit,
            "application" | "applications" => DoseUnit::Application,
            _ => return None,
        };
        Some(unit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DoseUnit::Mg => "mg",
            DoseUnit::Mcg => "mcg",
            DoseUnit::G => "g",
            DoseUnit::Ml => "ml",
            DoseUnit::Tablet => "tablet",
            DoseUnit::Capsule => "capsule",
            DoseUnit::Drop => "drop",
            DoseUnit::Puff => "puff",
            DoseUnit::Unit => "unit",
            DoseUnit::Application => "application",
        }
    }
}

impl fmt::Display for DoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Stored Medication Record
// ============================================================================

fn default_true() -> bool {
    true
}

/// A medication as kept by the store.
///
/// Fields are loosely typed so that a bad value in one record can be reported
/// against that record's id instead of failing the whole store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    pub id: String,
    pub pet_id: String,
    #[serde(default)]
    pub name: String,
    pub dosage_amount: f64,
    pub dosage_unit: String,
    pub times_per_period: i64,
    pub period: String,
    #[serde(default)]
    pub reminder_times: Vec<String>,
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub indefinite: bool,
    #[serde(default = "default_true")]
    pub reminders_enabled: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

// ============================================================================
// Derived Schedule
// ============================================================================

/// Amount and unit of a single dose
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Dosage {
    pub amount: f64,
    pub unit: DoseUnit,
}

/// How often a medication is given
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Frequency {
    pub times_per_period: u32,
    pub period: Period,
    /// Explicit reminder times; empty means doses are spread evenly
    pub explicit_times: Vec<TimeOfDay>,
}

/// Dates between which a medication is given (both ends inclusive)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActiveRange {
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub indefinite: bool,
}

impl ActiveRange {
    /// Last active date, or `None` when the range is open-ended
    pub fn effective_end(&self) -> Option<NaiveDate> {
        if self.indefinite {
            None
        } else {
            self.end_date
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && self.effective_end().map_or(true, |end| date <= end)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReminderSettings {
    pub enabled: bool,
}

/// Validated dosing schedule derived from a [`Medication`] record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MedicationSchedule {
    pub id: String,
    pub pet_id: String,
    pub name: String,
    pub dosage: Dosage,
    pub frequency: Frequency,
    pub active_range: ActiveRange,
    pub reminders: ReminderSettings,
}

impl MedicationSchedule {
    /// Check the invariants a schedule must hold before doses are generated
    pub fn validate(&self) -> Result<()> {
        if !(self.dosage.amount.is_finite() && self.dosage.amount > 0.0) {
            return Err(Error::validation(
                &self.id,
                format!("dosage amount must be positive, got {}", self.dosage.amount),
            ));
        }

        if self.frequency.times_per_period == 0 {
            return Err(Error::validation(
                &self.id,
                "times per period must be at least 1",
            ));
        }

        if !self.active_range.indefinite {
            match self.active_range.end_date {
                None => {
                    return Err(Error::validation(
                        &self.id,
                        "end date is required unless the medication is indefinite",
                    ));
                }
                Some(end) if end < self.active_range.start_date => {
                    return Err(Error::validation(
                        &self.id,
                        format!(
                            "end date {} is before start date {}",
                            end, self.active_range.start_date
                        ),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Replace the explicit reminder times, keeping them in clock order
    pub fn with_explicit_times(mut self, mut times: Vec<TimeOfDay>) -> Self {
        times.sort();
        times.dedup();
        self.frequency.explicit_times = times;
        self
    }
}

fn parse_date(id: &str, field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .or_else(|_| {
            // Timestamps are accepted too; only their date part is used
            DateTime::parse_from_rfc3339(value.trim()).map(|dt| dt.date_naive())
        })
        .map_err(|_| Error::validation(id, format!("{} '{}' is not an ISO-8601 date", field, value)))
}

impl TryFrom<Medication> for MedicationSchedule {
    type Error = Error;

    fn try_from(record: Medication) -> Result<Self> {
        let id = record.id.as_str();

        let unit = DoseUnit::parse(&record.dosage_unit).ok_or_else(|| {
            Error::validation(id, format!("unknown dosage unit '{}'", record.dosage_unit))
        })?;

        let period = Period::parse(&record.period)
            .ok_or_else(|| Error::validation(id, format!("unknown period '{}'", record.period)))?;

        let times_per_period = u32::try_from(record.times_per_period)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                Error::validation(
                    id,
                    format!(
                        "times per period must be a positive integer, got {}",
                        record.times_per_period
                    ),
                )
            })?;

        let explicit_times = record
            .reminder_times
            .iter()
            .map(|t| t.parse::<TimeOfDay>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::validation(id, e.to_string()))?;

        let start_date = parse_date(id, "start date", &record.start_date)?;
        let end_date = if record.indefinite {
            None
        } else {
            record
                .end_date
                .as_deref()
                .map(|d| parse_date(id, "end date", d))
                .transpose()?
        };

        let schedule = MedicationSchedule {
            id: record.id.clone(),
            pet_id: record.pet_id,
            name: record.name,
            dosage: Dosage {
                amount: record.dosage_amount,
                unit,
            },
            frequency: Frequency {
                times_per_period,
                period,
                explicit_times,
            },
            active_range: ActiveRange {
                start_date,
                end_date,
                indefinite: record.indefinite,
            },
            reminders: ReminderSettings {
                enabled: record.reminders_enabled,
            },
        };

        schedule.validate()?;
        Ok(schedule)
    }
}

// ============================================================================
// Generated Doses
// ============================================================================

/// A single concrete time a medication should be given.
///
/// Identity is `(medication_id, scheduled_time)`; amount and unit are copied
/// from the schedule when the instant is generated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseInstant {
    pub medication_id: String,
    pub pet_id: String,
    pub medication_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub dose_amount: f64,
    pub dose_unit: DoseUnit,
}

impl DoseInstant {
    pub fn new(schedule: &MedicationSchedule, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            medication_id: schedule.id.clone(),
            pet_id: schedule.pet_id.clone(),
            medication_name: schedule.name.clone(),
            scheduled_time,
            dose_amount: schedule.dosage.amount,
            dose_unit: schedule.dosage.unit,
        }
    }

    pub fn key(&self) -> (&str, DateTime<Utc>) {
        (&self.medication_id, self.scheduled_time)
    }
}

/// Non-fatal condition found while generating doses
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advisory {
    /// A daily schedule has fewer reminder times than doses per day
    MissingReminderTimes {
        medication_id: String,
        configured: usize,
        expected: u32,
    },
    /// A reminder time fell into a daylight-saving gap on this date
    SkippedNonexistentTime {
        medication_id: String,
        date: NaiveDate,
        time: TimeOfDay,
    },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::MissingReminderTimes {
                medication_id,
                configured,
                expected,
            } => write!(
                f,
                "Medication {} has {} reminder time(s) for {} daily doses; missing times need to be filled in",
                medication_id, configured, expected
            ),
            Advisory::SkippedNonexistentTime {
                medication_id,
                date,
                time,
            } => write!(
                f,
                "Medication {}: {} does not exist on {} (clock change), dose skipped",
                medication_id, time, date
            ),
        }
    }
}

// ============================================================================
// Device Notifications
// ============================================================================

/// A notification currently pending on the device
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduledNotification {
    pub id: String,
    pub medication_id: String,
    #[serde(default)]
    pub pet_id: String,
    pub fires_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl ScheduledNotification {
    pub fn key(&self) -> (&str, DateTime<Utc>) {
        (&self.medication_id, self.fires_at)
    }
}

/// A notification the reconciler wants the device to schedule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NotificationRequest {
    pub medication_id: String,
    pub pet_id: String,
    pub fires_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

impl From<&DoseInstant> for NotificationRequest {
    fn from(dose: &DoseInstant) -> Self {
        let name = if dose.medication_name.is_empty() {
            dose.medication_id.as_str()
        } else {
            dose.medication_name.as_str()
        };

        NotificationRequest {
            medication_id: dose.medication_id.clone(),
            pet_id: dose.pet_id.clone(),
            fires_at: dose.scheduled_time,
            title: "Medication reminder".into(),
            body: format!("{}: {} {}", name, dose.dose_amount, dose.dose_unit),
        }
    }
}
