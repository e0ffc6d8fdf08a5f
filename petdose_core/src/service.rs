//! Caller-facing reminder API.
//!
//! [`ReminderService::refresh_reminders`] is the single entry point a screen
//! or background job uses: load active medications, derive schedules,
//! reconcile them with the device and report what happened.

use crate::config::Config;
use crate::device::NotificationCenter;
use crate::reconcile::{
    apply, call_device, reconcile, ApplyOptions, CancelToken, Operation, OperationFailure,
};
use crate::schedule::{generate, merge_doses, suggest_reminder_times};
use crate::store::MedicationStore;
use crate::{DoseInstant, Error, MedicationSchedule, Period, Result};
use chrono::{DateTime, Duration, Local, TimeZone};
use std::sync::Arc;

/// Result of one reminder refresh
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub added: usize,
    pub cancelled: usize,
    /// Some reminders were left out because of the device limit
    pub truncated: bool,
    pub warnings: Vec<String>,
    pub failures: Vec<OperationFailure>,
    /// Stopped early on request; the device may be partially updated
    pub interrupted: bool,
}

/// Doses coming up in a window, without touching the device
#[derive(Clone, Debug, Default)]
pub struct UpcomingDoses {
    pub doses: Vec<DoseInstant>,
    pub warnings: Vec<String>,
    pub failures: Vec<OperationFailure>,
}

/// Schedules derived from the store, with the records that failed validation
struct LoadedSchedules {
    schedules: Vec<MedicationSchedule>,
    failures: Vec<OperationFailure>,
}

pub struct ReminderService<S> {
    store: S,
    center: Arc<dyn NotificationCenter>,
    config: Config,
    auto_fill: bool,
    cancel: CancelToken,
}

impl<S: MedicationStore> ReminderService<S> {
    pub fn new(store: S, center: Arc<dyn NotificationCenter>, config: Config) -> Self {
        Self {
            store,
            center,
            config,
            auto_fill: false,
            cancel: CancelToken::new(),
        }
    }

    /// Fill missing daily reminder times with evenly distributed ones.
    ///
    /// Turning this on is the user's confirmation of the suggested times.
    pub fn with_auto_fill(mut self, auto_fill: bool) -> Self {
        self.auto_fill = auto_fill;
        self
    }

    /// Token that stops an in-progress refresh from issuing more operations
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Refresh reminders as of the current local time
    pub fn refresh_reminders(&self, pet_id: Option<&str>) -> Result<RefreshReport> {
        self.refresh_reminders_at(pet_id, &Local::now())
    }

    /// Refresh reminders as of `now`, computing calendar days in `now`'s zone.
    ///
    /// Only fails when nothing can be reconciled: the store cannot be read or
    /// the device cannot list its pending notifications. Everything else is
    /// reported in the returned [`RefreshReport`].
    pub fn refresh_reminders_at<Tz: TimeZone>(
        &self,
        pet_id: Option<&str>,
        now: &DateTime<Tz>,
    ) -> Result<RefreshReport> {
        let loaded = self.load_schedules(pet_id)?;
        let mut report = RefreshReport {
            failures: loaded.failures,
            ..RefreshReport::default()
        };

        let timeout = Some(self.config.notifications.operation_timeout());
        let current = call_device(&self.center, timeout, |c| c.list_scheduled()).map_err(|e| {
            tracing::warn!("Cannot list scheduled notifications: {}", e);
            Error::Transport(e)
        })?;

        // Another pet's notifications are out of scope but still use up quota
        let (in_scope, out_of_scope): (Vec<_>, Vec<_>) = current
            .into_iter()
            .partition(|n| pet_id.map_or(true, |pet| n.pet_id == pet));
        let quota = self.center.quota().saturating_sub(out_of_scope.len());

        let plan = reconcile(
            &loaded.schedules,
            now,
            self.config.notifications.horizon(),
            &in_scope,
            quota,
            &self.config.schedule,
        );

        report
            .failures
            .extend(plan.rejected.iter().map(|r| OperationFailure {
                operation: Operation::Validate {
                    medication_id: r.medication_id.clone(),
                },
                error: r.error.to_string(),
            }));
        report
            .warnings
            .extend(plan.advisories.iter().map(|a| a.to_string()));
        if plan.truncated {
            report.truncated = true;
            report.warnings.push(format!(
                "Maximum notification limit reached: scheduled the next {} of {} reminders",
                quota, plan.desired_total
            ));
        }

        let options = ApplyOptions {
            timeout,
            cancel: self.cancel.clone(),
        };
        let outcome = apply(&plan, &self.center, &options);

        report.added = outcome.added;
        report.cancelled = outcome.cancelled;
        report.interrupted = outcome.interrupted;
        report.failures.extend(outcome.failures);

        tracing::info!(
            "Refreshed reminders{}: {} added, {} cancelled, {} failures",
            pet_id.map(|p| format!(" for {}", p)).unwrap_or_default(),
            report.added,
            report.cancelled,
            report.failures.len()
        );

        Ok(report)
    }

    /// Doses due in `[now, now + horizon)` across active medications
    pub fn upcoming_doses_at<Tz: TimeZone>(
        &self,
        pet_id: Option<&str>,
        now: &DateTime<Tz>,
        horizon: Duration,
    ) -> Result<UpcomingDoses> {
        let loaded = self.load_schedules(pet_id)?;
        let window_end = now.clone() + horizon;

        let mut upcoming = UpcomingDoses {
            failures: loaded.failures,
            ..UpcomingDoses::default()
        };
        let mut sequences = Vec::with_capacity(loaded.schedules.len());

        for schedule in &loaded.schedules {
            match generate(schedule, now, &window_end, &self.config.schedule) {
                Ok(generation) => {
                    upcoming
                        .warnings
                        .extend(generation.advisories.iter().map(|a| a.to_string()));
                    sequences.push(generation.doses);
                }
                Err(e) => upcoming.failures.push(OperationFailure {
                    operation: Operation::Validate {
                        medication_id: schedule.id.clone(),
                    },
                    error: e.to_string(),
                }),
            }
        }

        upcoming.doses = merge_doses(sequences);
        Ok(upcoming)
    }

    fn load_schedules(&self, pet_id: Option<&str>) -> Result<LoadedSchedules> {
        let records = self.store.active_medications(pet_id)?;
        let mut loaded = LoadedSchedules {
            schedules: Vec::with_capacity(records.len()),
            failures: Vec::new(),
        };

        for record in records {
            let id = record.id.clone();
            match MedicationSchedule::try_from(record) {
                Ok(schedule) => loaded.schedules.push(self.fill_times(schedule)),
                Err(e) => {
                    tracing::warn!("Medication {} is invalid: {}", id, e);
                    loaded.failures.push(OperationFailure {
                        operation: Operation::Validate { medication_id: id },
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(loaded)
    }

    fn fill_times(&self, schedule: MedicationSchedule) -> MedicationSchedule {
        let frequency = &schedule.frequency;
        let incomplete = frequency.period == Period::Day
            && !frequency.explicit_times.is_empty()
            && frequency.explicit_times.len() < frequency.times_per_period as usize;

        if !(self.auto_fill && incomplete) {
            return schedule;
        }

        let times = suggest_reminder_times(&schedule, &self.config.schedule);
        tracing::info!(
            "Auto-filled reminder times for {}: {}",
            schedule.id,
            times
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        schedule.with_explicit_times(times)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InMemoryNotificationCenter;
    use crate::{Medication, NotificationRequest, ScheduledNotification, TransportError};
    use chrono::Utc;

    fn medication(id: &str, pet_id: &str, times: &[&str]) -> Medication {
        Medication {
            id: id.into(),
            pet_id: pet_id.into(),
            name: format!("Med {}", id),
            dosage_amount: 5.0,
            dosage_unit: "ml".into(),
            times_per_period: times.len().max(1) as i64,
            period: "day".into(),
            reminder_times: times.iter().map(|t| t.to_string()).collect(),
            start_date: "2024-01-01".into(),
            end_date: None,
            indefinite: true,
            reminders_enabled: true,
            active: true,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn service(
        meds: Vec<Medication>,
        quota: usize,
    ) -> (ReminderService<Vec<Medication>>, Arc<InMemoryNotificationCenter>) {
        let device = Arc::new(InMemoryNotificationCenter::new(quota));
        let center: Arc<dyn NotificationCenter> = device.clone();
        (ReminderService::new(meds, center, Config::default()), device)
    }

    #[test]
    fn test_refresh_schedules_and_converges() {
        let (svc, device) = service(vec![medication("m1", "rex", &["08:00", "20:00"])], 64);

        let report = svc.refresh_reminders_at(None, &now()).unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.cancelled, 0);
        assert!(!report.truncated);
        assert!(report.failures.is_empty());
        assert_eq!(device.snapshot().len(), 2);

        let again = svc.refresh_reminders_at(None, &now()).unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.cancelled, 0);
    }

    #[test]
    fn test_invalid_medication_reported_others_scheduled() {
        let mut broken = medication("bad", "rex", &["8pm"]);
        broken.name = "Broken".into();
        let (svc, device) = service(vec![broken, medication("m1", "rex", &["09:00"])], 64);

        let report = svc.refresh_reminders_at(None, &now()).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].operation,
            Operation::Validate {
                medication_id: "bad".into()
            }
        );
        assert!(report.failures[0].error.contains("8pm"));
        assert_eq!(device.snapshot()[0].medication_id, "m1");
    }

    #[test]
    fn test_truncation_reported() {
        let times = [
            "08:00", "09:00", "10:00", "11:00", "12:00", "13:00", "14:00", "15:00", "16:00",
            "17:00",
        ];
        let (svc, device) = service(vec![medication("m1", "rex", &times)], 5);

        let report = svc.refresh_reminders_at(None, &now()).unwrap();
        assert!(report.truncated);
        assert_eq!(report.added, 5);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("Maximum notification limit reached")));
        assert_eq!(device.snapshot().len(), 5);
    }

    #[test]
    fn test_pet_scope_leaves_other_pets_alone() {
        let meds = vec![
            medication("m1", "rex", &["08:00"]),
            medication("m2", "luna", &["09:00", "10:00"]),
        ];
        let (svc, device) = service(meds, 2);

        // Fill luna's reminders first
        let luna = svc.refresh_reminders_at(Some("luna"), &now()).unwrap();
        assert_eq!(luna.added, 2);

        // Rex has no quota left, and luna's reminders must survive
        let rex = svc.refresh_reminders_at(Some("rex"), &now()).unwrap();
        assert_eq!(rex.added, 0);
        assert_eq!(rex.cancelled, 0);
        assert!(rex.truncated);

        let pets: Vec<String> = device.snapshot().into_iter().map(|n| n.pet_id).collect();
        assert_eq!(pets, vec!["luna".to_string(), "luna".to_string()]);
    }

    #[test]
    fn test_missing_times_warning_and_auto_fill() {
        let mut med = medication("m1", "rex", &["09:00"]);
        med.times_per_period = 3;

        let (svc, _) = service(vec![med.clone()], 64);
        let report = svc.refresh_reminders_at(None, &now()).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("1 reminder time(s) for 3 daily doses"));

        let (svc, device) = service(vec![med], 64);
        let svc = svc.with_auto_fill(true);
        let report = svc.refresh_reminders_at(None, &now()).unwrap();
        assert_eq!(report.added, 3);
        assert!(report.warnings.is_empty());
        assert_eq!(device.snapshot().len(), 3);
    }

    #[test]
    fn test_cancelled_refresh_is_interrupted() {
        let (svc, device) = service(vec![medication("m1", "rex", &["08:00", "20:00"])], 64);
        assert_eq!(svc.config().notifications.quota, 64);

        svc.cancel_token().cancel();
        let report = svc.refresh_reminders_at(None, &now()).unwrap();
        assert!(report.interrupted);
        assert_eq!(report.added, 0);
        assert!(device.snapshot().is_empty());
    }

    #[test]
    fn test_upcoming_doses_merged_in_order() {
        let meds = vec![
            medication("m1", "rex", &["20:00"]),
            medication("m2", "luna", &["08:00"]),
        ];
        let (svc, device) = service(meds, 64);

        let upcoming = svc
            .upcoming_doses_at(None, &now(), Duration::hours(24))
            .unwrap();
        let ids: Vec<&str> = upcoming.doses.iter().map(|d| d.medication_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
        assert!(device.snapshot().is_empty());
    }

    struct OfflineCenter;

    impl NotificationCenter for OfflineCenter {
        fn quota(&self) -> usize {
            64
        }

        fn list_scheduled(
            &self,
        ) -> std::result::Result<Vec<ScheduledNotification>, TransportError> {
            Err(TransportError::Unavailable("offline".into()))
        }

        fn schedule(&self, _: &NotificationRequest) -> std::result::Result<String, TransportError> {
            Err(TransportError::Unavailable("offline".into()))
        }

        fn cancel(&self, _: &str) -> std::result::Result<(), TransportError> {
            Err(TransportError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn test_unlistable_device_is_error() {
        let svc = ReminderService::new(
            vec![medication("m1", "rex", &["08:00"])],
            Arc::new(OfflineCenter) as Arc<dyn NotificationCenter>,
            Config::default(),
        );
        assert!(matches!(
            svc.refresh_reminders_at(None, &now()),
            Err(Error::Transport(TransportError::Unavailable(_)))
        ));
    }
}
