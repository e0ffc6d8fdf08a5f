//! Notification reconciler.
//!
//! Planning ([`reconcile`]) is pure: it generates the desired reminders for a
//! horizon, trims them to the device quota and diffs them against what the
//! device reports as pending. Applying ([`apply`]) issues the resulting
//! cancel/add operations one at a time, each bounded by a timeout; a failed
//! operation is recorded and the rest still run.

use crate::config::ScheduleConfig;
use crate::device::NotificationCenter;
use crate::schedule::{generate, sort_and_dedup};
use crate::{
    Advisory, DoseInstant, Error, MedicationSchedule, NotificationRequest, ScheduledNotification,
    TransportError,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

/// A schedule left out of reconciliation because it failed validation
#[derive(Debug)]
pub struct RejectedSchedule {
    pub medication_id: String,
    pub error: Error,
}

/// Operations needed to bring the device in line with the schedules
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub to_add: Vec<NotificationRequest>,
    /// Device ids of notifications to cancel
    pub to_cancel: Vec<String>,
    /// More reminders were wanted than the quota allows
    pub truncated: bool,
    /// Number of reminders wanted before quota truncation
    pub desired_total: usize,
    pub advisories: Vec<Advisory>,
    pub rejected: Vec<RejectedSchedule>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_cancel.is_empty()
    }
}

/// Plan the notifications for `schedules` over `[now, now + horizon)`.
///
/// At most `quota` reminders are kept, soonest first; ties break on
/// `(pet_id, medication_id)`. Every pending notification outside the kept set
/// is cancelled, and only kept reminders not already pending are added.
pub fn reconcile<Tz: TimeZone>(
    schedules: &[MedicationSchedule],
    now: &DateTime<Tz>,
    horizon: Duration,
    current: &[ScheduledNotification],
    quota: usize,
    config: &ScheduleConfig,
) -> ReconcilePlan {
    let window_end = now.clone() + horizon;
    let mut plan = ReconcilePlan::default();
    let mut desired: Vec<DoseInstant> = Vec::new();

    for schedule in schedules.iter().filter(|s| s.reminders.enabled) {
        match generate(schedule, now, &window_end, config) {
            Ok(generation) => {
                desired.extend(generation.doses);
                plan.advisories.extend(generation.advisories);
            }
            Err(error) => {
                tracing::warn!("Skipping medication {}: {}", schedule.id, error);
                plan.rejected.push(RejectedSchedule {
                    medication_id: schedule.id.clone(),
                    error,
                });
            }
        }
    }

    sort_and_dedup(&mut desired);
    plan.desired_total = desired.len();
    if desired.len() > quota {
        tracing::warn!(
            "{} reminders wanted but the device allows {}; keeping the soonest",
            desired.len(),
            quota
        );
        desired.truncate(quota);
        plan.truncated = true;
    }

    let kept: HashSet<(&str, DateTime<Utc>)> = desired.iter().map(DoseInstant::key).collect();

    let mut pending: HashSet<(&str, DateTime<Utc>)> = HashSet::new();
    for notification in current {
        let key = notification.key();
        // A second notification for the same dose is always surplus
        if !pending.insert(key) || !kept.contains(&key) {
            plan.to_cancel.push(notification.id.clone());
        }
    }

    plan.to_add = desired
        .iter()
        .filter(|dose| !pending.contains(&dose.key()))
        .map(NotificationRequest::from)
        .collect();

    tracing::info!(
        "Reconcile plan: {} to add, {} to cancel, {} wanted{}",
        plan.to_add.len(),
        plan.to_cancel.len(),
        plan.desired_total,
        if plan.truncated { " (truncated)" } else { "" }
    );

    plan
}

// ============================================================================
// Applying a plan
// ============================================================================

/// Cooperative cancellation for [`apply`].
///
/// Once cancelled, no further operations are issued; those already issued stand.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ApplyOptions {
    /// Upper bound for each device call; `None` waits indefinitely
    pub timeout: Option<std::time::Duration>,
    pub cancel: CancelToken,
}

/// What a failed operation was trying to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Validate { medication_id: String },
    ListScheduled,
    Schedule {
        medication_id: String,
        fires_at: DateTime<Utc>,
    },
    Cancel { notification_id: String },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Validate { medication_id } => write!(f, "validate medication {}", medication_id),
            Operation::ListScheduled => write!(f, "list scheduled notifications"),
            Operation::Schedule {
                medication_id,
                fires_at,
            } => write!(f, "schedule {} at {}", medication_id, fires_at.to_rfc3339()),
            Operation::Cancel { notification_id } => {
                write!(f, "cancel notification {}", notification_id)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationFailure {
    pub operation: Operation,
    pub error: String,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.error)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub added: usize,
    pub cancelled: usize,
    pub failures: Vec<OperationFailure>,
    /// Stopped early because the cancel token fired
    pub interrupted: bool,
}

/// Run one device call, giving up after `timeout`.
///
/// With a timeout the call runs on a worker thread; a call that overruns is
/// reported as [`TransportError::Timeout`] and left to finish on its own.
pub fn call_device<T, F>(
    center: &Arc<dyn NotificationCenter>,
    timeout: Option<std::time::Duration>,
    call: F,
) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: FnOnce(&dyn NotificationCenter) -> Result<T, TransportError> + Send + 'static,
{
    let Some(limit) = timeout else {
        return call(center.as_ref());
    };

    let (tx, rx) = mpsc::channel();
    let worker_center = Arc::clone(center);
    thread::spawn(move || {
        let _ = tx.send(call(worker_center.as_ref()));
    });

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout(limit)),
        Err(RecvTimeoutError::Disconnected) => Err(TransportError::Unavailable(
            "notification call ended without a result".into(),
        )),
    }
}

/// Issue the plan's cancellations, then its additions.
///
/// Cancels go first so that capacity they free is available to adds.
pub fn apply(
    plan: &ReconcilePlan,
    center: &Arc<dyn NotificationCenter>,
    options: &ApplyOptions,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();

    for id in &plan.to_cancel {
        if options.cancel.is_cancelled() {
            outcome.interrupted = true;
            break;
        }

        let target = id.clone();
        match call_device(center, options.timeout, move |c| c.cancel(&target)) {
            Ok(()) => outcome.cancelled += 1,
            Err(error) => {
                tracing::warn!("Failed to cancel notification {}: {}", id, error);
                outcome.failures.push(OperationFailure {
                    operation: Operation::Cancel {
                        notification_id: id.clone(),
                    },
                    error: error.to_string(),
                });
            }
        }
    }

    if !outcome.interrupted {
        for request in &plan.to_add {
            if options.cancel.is_cancelled() {
                outcome.interrupted = true;
                break;
            }

            let owned = request.clone();
            match call_device(center, options.timeout, move |c| c.schedule(&owned)) {
                Ok(_) => outcome.added += 1,
                Err(error) => {
                    tracing::warn!(
                        "Failed to schedule {} at {}: {}",
                        request.medication_id,
                        request.fires_at,
                        error
                    );
                    outcome.failures.push(OperationFailure {
                        operation: Operation::Schedule {
                            medication_id: request.medication_id.clone(),
                            fires_at: request.fires_at,
                        },
                        error: error.to_string(),
                    });
                }
            }
        }
    }

    if outcome.interrupted {
        tracing::info!(
            "Reconciliation interrupted after {} cancels and {} adds",
            outcome.cancelled,
            outcome.added
        );
    }

    outcome
}
