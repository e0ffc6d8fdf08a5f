#![forbid(unsafe_code)]

//! Core scheduling logic for the petdose medication reminder system.
//!
//! This crate provides:
//! - Domain types (medication records, schedules, dose instants, notifications)
//! - The dose schedule generator
//! - The notification reconciler and its device interface
//! - Medication store and device backends
//! - The `refresh_reminders` entry point

pub mod types;
pub mod error;
pub mod time;
pub mod config;
pub mod logging;
pub mod persist;
pub mod schedule;
pub mod reconcile;
pub mod device;
pub mod store;
pub mod export;
pub mod service;

// Re-export commonly used types
pub use error::{Error, Result, TransportError};
pub use types::*;
pub use time::TimeOfDay;
pub use config::Config;
pub use schedule::{generate, merge_doses, suggest_reminder_times, Generation, MonthDayPolicy};
pub use reconcile::{apply, reconcile, ApplyOptions, CancelToken, Operation, OperationFailure, ReconcilePlan};
pub use device::{FileNotificationCenter, InMemoryNotificationCenter, NotificationCenter};
pub use store::{JsonMedicationStore, MedicationStore};
pub use service::{RefreshReport, ReminderService, UpcomingDoses};
