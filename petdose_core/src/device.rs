//! Device notification subsystem.
//!
//! The reconciler only talks to the device through [`NotificationCenter`].
//! Two implementations ship here:
//! - [`FileNotificationCenter`]: pending notifications kept in a JSON file,
//!   used by the command line tool
//! - [`InMemoryNotificationCenter`]: mutex-guarded, for embedding and tests

use crate::persist::{read_json, with_exclusive_lock, write_json_atomic};
use crate::{Error, NotificationRequest, Result, ScheduledNotification, TransportError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Narrow interface to the platform's local notification scheduler
pub trait NotificationCenter: Send + Sync {
    /// Maximum number of pending notifications the device keeps
    fn quota(&self) -> usize;

    /// Notifications currently pending on the device
    fn list_scheduled(&self) -> std::result::Result<Vec<ScheduledNotification>, TransportError>;

    /// Schedule a notification, returning the device's id for it
    fn schedule(&self, request: &NotificationRequest) -> std::result::Result<String, TransportError>;

    /// Cancel a pending notification. Unknown ids are not an error.
    fn cancel(&self, id: &str) -> std::result::Result<(), TransportError>;
}

fn materialize(request: &NotificationRequest) -> ScheduledNotification {
    ScheduledNotification {
        id: Uuid::new_v4().to_string(),
        medication_id: request.medication_id.clone(),
        pet_id: request.pet_id.clone(),
        fires_at: request.fires_at,
        title: request.title.clone(),
        body: request.body.clone(),
    }
}

fn quota_reached(quota: usize) -> TransportError {
    TransportError::Rejected(format!("device limit of {} pending notifications reached", quota))
}

// ============================================================================
// File-backed device
// ============================================================================

/// Pending notifications persisted to a JSON file
pub struct FileNotificationCenter {
    path: PathBuf,
    quota: usize,
}

impl FileNotificationCenter {
    pub fn new(path: impl Into<PathBuf>, quota: usize) -> Self {
        Self {
            path: path.into(),
            quota,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load pending notifications, ordered by firing time
    pub fn load(&self) -> Result<Vec<ScheduledNotification>> {
        let mut pending: Vec<ScheduledNotification> = read_json(&self.path)?.unwrap_or_default();
        pending.sort_by(|a, b| a.fires_at.cmp(&b.fires_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }

    fn modify<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<ScheduledNotification>) -> Result<T>,
    {
        with_exclusive_lock(&self.path, || {
            let mut pending = self.load()?;
            let value = f(&mut pending)?;
            write_json_atomic(&self.path, &pending)?;
            Ok(value)
        })
    }

    /// Remove and return every notification due at or before `now`.
    ///
    /// This is the device "firing" its notifications.
    pub fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledNotification>> {
        let due = self.modify(|pending| {
            let (due, later): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|n| n.fires_at <= now);
            *pending = later;
            Ok(due)
        })?;

        if !due.is_empty() {
            tracing::info!("{} notifications due at {}", due.len(), now);
        }
        Ok(due)
    }
}

fn unavailable(e: Error) -> TransportError {
    TransportError::Unavailable(e.to_string())
}

impl NotificationCenter for FileNotificationCenter {
    fn quota(&self) -> usize {
        self.quota
    }

    fn list_scheduled(&self) -> std::result::Result<Vec<ScheduledNotification>, TransportError> {
        self.load().map_err(unavailable)
    }

    fn schedule(&self, request: &NotificationRequest) -> std::result::Result<String, TransportError> {
        let quota = self.quota;
        let outcome = self
            .modify(|pending| {
                if pending.len() >= quota {
                    return Ok(Err(quota_reached(quota)));
                }
                let notification = materialize(request);
                let id = notification.id.clone();
                pending.push(notification);
                Ok(Ok(id))
            })
            .map_err(unavailable)?;

        if let Ok(ref id) = outcome {
            tracing::debug!(
                "Scheduled notification {} for {} at {}",
                id,
                request.medication_id,
                request.fires_at
            );
        }
        outcome
    }

    fn cancel(&self, id: &str) -> std::result::Result<(), TransportError> {
        let removed = self
            .modify(|pending| {
                let before = pending.len();
                pending.retain(|n| n.id != id);
                Ok(before != pending.len())
            })
            .map_err(unavailable)?;

        if removed {
            tracing::debug!("Cancelled notification {}", id);
        } else {
            tracing::debug!("Notification {} was not pending", id);
        }
        Ok(())
    }
}

// ============================================================================
// In-memory device
// ============================================================================

/// Device state held in memory
pub struct InMemoryNotificationCenter {
    quota: usize,
    pending: Mutex<Vec<ScheduledNotification>>,
}

impl InMemoryNotificationCenter {
    pub fn new(quota: usize) -> Self {
        Self::with_pending(quota, Vec::new())
    }

    pub fn with_pending(quota: usize, pending: Vec<ScheduledNotification>) -> Self {
        Self {
            quota,
            pending: Mutex::new(pending),
        }
    }

    /// Copy of the pending notifications, ordered by firing time
    pub fn snapshot(&self) -> Vec<ScheduledNotification> {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        pending.sort_by(|a, b| a.fires_at.cmp(&b.fires_at));
        pending
    }

    fn lock(
        &self,
    ) -> std::result::Result<std::sync::MutexGuard<'_, Vec<ScheduledNotification>>, TransportError>
    {
        self.pending
            .lock()
            .map_err(|e| TransportError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

impl NotificationCenter for InMemoryNotificationCenter {
    fn quota(&self) -> usize {
        self.quota
    }

    fn list_scheduled(&self) -> std::result::Result<Vec<ScheduledNotification>, TransportError> {
        Ok(self.lock()?.clone())
    }

    fn schedule(&self, request: &NotificationRequest) -> std::result::Result<String, TransportError> {
        let mut pending = self.lock()?;
        if pending.len() >= self.quota {
            return Err(quota_reached(self.quota));
        }
        let notification = materialize(request);
        let id = notification.id.clone();
        pending.push(notification);
        Ok(id)
    }

    fn cancel(&self, id: &str) -> std::result::Result<(), TransportError> {
        self.lock()?.retain(|n| n.id != id);
        Ok(())
    }
}
