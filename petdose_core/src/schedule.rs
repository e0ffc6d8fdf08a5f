//! Dose schedule generator.
//!
//! Turns a [`MedicationSchedule`] and a time window into the concrete dose
//! instants that fall inside that window. Two modes:
//! - **Explicit times**: one dose per configured `HH:MM` on every qualifying day
//! - **Even distribution**: the daily dose count is spread evenly over the
//!   configured daytime window (08:00-22:00 by default)
//!
//! Calendar arithmetic happens in the time zone of the window passed in, so
//! callers pick the zone the pet owner lives in. No clock is read here.

use crate::config::ScheduleConfig;
use crate::time::TimeOfDay;
use crate::{Advisory, DoseInstant, Frequency, MedicationSchedule, Period, Result};
use chrono::{DateTime, Datelike, LocalResult, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How monthly schedules behave in months that lack the start day-of-month
/// (e.g. a schedule started on the 31st, in April)
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MonthDayPolicy {
    /// Give the dose on the last day of the short month
    #[default]
    Clamp,
    /// No dose that month
    Skip,
}

/// Doses generated for one schedule, plus anything the caller should know
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Generation {
    pub doses: Vec<DoseInstant>,
    pub advisories: Vec<Advisory>,
}

/// Generate the doses of `schedule` in `[window_start, window_end)`.
///
/// Returns doses sorted by time and unique per `(medication_id, scheduled_time)`.
/// Fails with a validation error if the schedule breaks its invariants.
pub fn generate<Tz: TimeZone>(
    schedule: &MedicationSchedule,
    window_start: &DateTime<Tz>,
    window_end: &DateTime<Tz>,
    config: &ScheduleConfig,
) -> Result<Generation> {
    schedule.validate()?;

    if !schedule.reminders.enabled {
        tracing::debug!("Reminders disabled for {}, no doses", schedule.id);
        return Ok(Generation::default());
    }

    let mut generation = Generation::default();
    if let Some(advisory) = missing_times_advisory(schedule) {
        generation.advisories.push(advisory);
    }

    let start_utc = window_start.with_timezone(&Utc);
    let end_utc = window_end.with_timezone(&Utc);
    if end_utc <= start_utc {
        return Ok(generation);
    }

    // Clamp the calendar days to the active range
    let range = &schedule.active_range;
    let first_day = window_start.date_naive().max(range.start_date);
    let last_day = match range.effective_end() {
        Some(end) => window_end.date_naive().min(end),
        None => window_end.date_naive(),
    };
    if first_day > last_day {
        tracing::debug!(
            "Window {} - {} is outside the active range of {}",
            start_utc,
            end_utc,
            schedule.id
        );
        return Ok(generation);
    }

    let times = times_of_day(&schedule.frequency, config);
    let tz = window_start.timezone();

    for date in first_day.iter_days().take_while(|d| *d <= last_day) {
        if !occurs_on(schedule, date, config.month_day_policy) {
            continue;
        }

        for time in &times {
            let local = match tz.from_local_datetime(&date.and_time(time.to_naive_time())) {
                LocalResult::Single(t) => t,
                LocalResult::Ambiguous(earliest, _) => earliest,
                LocalResult::None => {
                    // Only report gaps the window actually covers
                    let wall = date.and_time(time.to_naive_time());
                    if wall >= window_start.naive_local() && wall < window_end.naive_local() {
                        generation.advisories.push(Advisory::SkippedNonexistentTime {
                            medication_id: schedule.id.clone(),
                            date,
                            time: *time,
                        });
                    }
                    continue;
                }
            };

            let instant = local.with_timezone(&Utc);
            if instant >= start_utc && instant < end_utc {
                generation.doses.push(DoseInstant::new(schedule, instant));
            }
        }
    }

    sort_and_dedup(&mut generation.doses);

    tracing::debug!(
        "Generated {} doses for {} between {} and {}",
        generation.doses.len(),
        schedule.id,
        start_utc,
        end_utc
    );

    Ok(generation)
}

/// Union several dose sequences (e.g. from overlapping windows) into one
/// ordered sequence without duplicate `(medication_id, scheduled_time)` pairs
pub fn merge_doses<I>(sequences: I) -> Vec<DoseInstant>
where
    I: IntoIterator<Item = Vec<DoseInstant>>,
{
    let mut doses: Vec<DoseInstant> = sequences.into_iter().flatten().collect();
    sort_and_dedup(&mut doses);
    doses
}

/// Sort by `(scheduled_time, pet_id, medication_id)` and drop repeated keys
pub(crate) fn sort_and_dedup(doses: &mut Vec<DoseInstant>) {
    doses.sort_by(|a, b| {
        a.scheduled_time
            .cmp(&b.scheduled_time)
            .then_with(|| a.pet_id.cmp(&b.pet_id))
            .then_with(|| a.medication_id.cmp(&b.medication_id))
    });

    let mut seen = HashSet::new();
    doses.retain(|d| seen.insert((d.medication_id.clone(), d.scheduled_time)));
}

/// Daily dose rate implied by a frequency.
///
/// Monthly rates divide by `config.month_length_days`, an approximation of the
/// real month length.
pub fn doses_per_day(frequency: &Frequency, config: &ScheduleConfig) -> f64 {
    let divisor = match frequency.period {
        Period::Day => 1.0,
        Period::Week => 7.0,
        Period::Month => f64::from(config.month_length_days.max(1)),
    };
    f64::from(frequency.times_per_period) / divisor
}

/// Number of doses placed on each qualifying day in even-distribution mode
pub fn daily_dose_count(frequency: &Frequency, config: &ScheduleConfig) -> u32 {
    let per_day = doses_per_day(frequency, config);
    if per_day <= 0.0 {
        0
    } else {
        (per_day.ceil() as u32).max(1)
    }
}

/// Spread `count` doses evenly over the daytime window, rounded to the minute.
///
/// The window has one slot per minute, so counts beyond its length are
/// capped to one dose a minute.
pub fn distributed_times(count: u32, config: &ScheduleConfig) -> Vec<TimeOfDay> {
    let span = config.day_span_minutes().max(1);
    if count == 0 {
        return Vec::new();
    }
    if count > span {
        tracing::warn!(
            "{} doses a day do not fit the {}-minute daytime window, using one a minute",
            count,
            span
        );
    }
    let count = count.min(span);

    let start = config.day_start.minutes_since_midnight();
    let interval = f64::from(span) / f64::from(count);

    (0..count)
        .filter_map(|i| {
            let offset = (f64::from(i) * interval).round() as u32;
            TimeOfDay::from_minutes(start + offset)
        })
        .collect()
}

/// Times of day a qualifying day gets doses at
fn times_of_day(frequency: &Frequency, config: &ScheduleConfig) -> Vec<TimeOfDay> {
    if frequency.explicit_times.is_empty() {
        distributed_times(daily_dose_count(frequency, config), config)
    } else {
        frequency.explicit_times.clone()
    }
}

/// Periodicity filter: does the schedule give doses on `date` at all
fn occurs_on(schedule: &MedicationSchedule, date: NaiveDate, policy: MonthDayPolicy) -> bool {
    let start = schedule.active_range.start_date;
    match schedule.frequency.period {
        Period::Day => true,
        Period::Week => date.weekday() == start.weekday(),
        Period::Month => match policy {
            MonthDayPolicy::Skip => date.day() == start.day(),
            MonthDayPolicy::Clamp => {
                date.day() == start.day().min(days_in_month(date.year(), date.month()))
            }
        },
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn missing_times_advisory(schedule: &MedicationSchedule) -> Option<Advisory> {
    let frequency = &schedule.frequency;
    let configured = frequency.explicit_times.len();
    let expected = frequency.times_per_period;

    if frequency.period == Period::Day && configured > 0 && configured < expected as usize {
        Some(Advisory::MissingReminderTimes {
            medication_id: schedule.id.clone(),
            configured,
            expected,
        })
    } else {
        None
    }
}

/// Reminder times that would satisfy the schedule's daily dose count.
///
/// For daily schedules with too few explicit times, the configured times are
/// kept and the evenly distributed slots fill the deficit. Other schedules get
/// their explicit times back unchanged, or the distributed times if none are
/// configured. The result is meant to be confirmed by the user before use.
pub fn suggest_reminder_times(
    schedule: &MedicationSchedule,
    config: &ScheduleConfig,
) -> Vec<TimeOfDay> {
    let frequency = &schedule.frequency;
    if frequency.explicit_times.is_empty() {
        return distributed_times(daily_dose_count(frequency, config), config);
    }

    let expected = frequency.times_per_period as usize;
    let mut times = frequency.explicit_times.clone();
    if frequency.period != Period::Day || times.len() >= expected {
        return times;
    }

    for slot in distributed_times(frequency.times_per_period, config) {
        if times.len() >= expected {
            break;
        }
        if !times.contains(&slot) {
            times.push(slot);
        }
    }

    times.sort();
    times
}
