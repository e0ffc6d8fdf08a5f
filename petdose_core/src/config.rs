//! Configuration file support for petdose.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/petdose/config.toml`.

use crate::schedule::MonthDayPolicy;
use crate::time::TimeOfDay;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Constants used by the dose schedule generator
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Start of the daytime window evenly distributed doses are spread over
    #[serde(default = "default_day_start")]
    pub day_start: TimeOfDay,

    /// End of the daytime window (exclusive)
    #[serde(default = "default_day_end")]
    pub day_end: TimeOfDay,

    /// Approximate month length used to turn monthly counts into a daily rate.
    /// Months are not all this long; the rate is an approximation.
    #[serde(default = "default_month_length_days")]
    pub month_length_days: u32,

    /// What monthly schedules do in months without their start day-of-month
    #[serde(default)]
    pub month_day_policy: MonthDayPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            day_start: default_day_start(),
            day_end: default_day_end(),
            month_length_days: default_month_length_days(),
            month_day_policy: MonthDayPolicy::default(),
        }
    }
}

impl ScheduleConfig {
    /// Length of the daytime window in minutes
    pub fn day_span_minutes(&self) -> u32 {
        self.day_end
            .minutes_since_midnight()
            .saturating_sub(self.day_start.minutes_since_midnight())
    }
}

/// Device notification configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfig {
    /// Maximum number of pending notifications the device accepts
    #[serde(default = "default_quota")]
    pub quota: usize,

    /// How far ahead reminders are scheduled
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u32,

    /// Per-operation timeout for device calls
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            quota: default_quota(),
            horizon_hours: default_horizon_hours(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl NotificationConfig {
    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.horizon_hours))
    }

    pub fn operation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.operation_timeout_ms)
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("petdose")
}

fn default_day_start() -> TimeOfDay {
    TimeOfDay::hm(8, 0)
}

fn default_day_end() -> TimeOfDay {
    TimeOfDay::hm(22, 0)
}

fn default_month_length_days() -> u32 {
    30
}

fn default_quota() -> usize {
    64
}

fn default_horizon_hours() -> u32 {
    24
}

fn default_operation_timeout_ms() -> u64 {
    5_000
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("petdose").join("config.toml")
    }

    /// Reject settings the generator and reconciler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.schedule.day_end <= self.schedule.day_start {
            return Err(Error::Config(format!(
                "schedule.day_end ({}) must be after schedule.day_start ({})",
                self.schedule.day_end, self.schedule.day_start
            )));
        }
        if self.schedule.month_length_days == 0 {
            return Err(Error::Config(
                "schedule.month_length_days must be at least 1".into(),
            ));
        }
        if self.notifications.horizon_hours == 0 {
            return Err(Error::Config(
                "notifications.horizon_hours must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.schedule.day_start.to_string(), "08:00");
        assert_eq!(config.schedule.day_end.to_string(), "22:00");
        assert_eq!(config.schedule.day_span_minutes(), 14 * 60);
        assert_eq!(config.schedule.month_length_days, 30);
        assert_eq!(config.schedule.month_day_policy, MonthDayPolicy::Clamp);
        assert_eq!(config.notifications.quota, 64);
        assert_eq!(config.notifications.horizon(), chrono::Duration::hours(24));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.schedule, parsed.schedule);
        assert_eq!(config.notifications, parsed.notifications);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[schedule]
day_start = "07:30"
month_day_policy = "skip"

[notifications]
quota = 5
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.schedule.day_start.to_string(), "07:30");
        assert_eq!(config.schedule.day_end.to_string(), "22:00"); // default
        assert_eq!(config.schedule.month_day_policy, MonthDayPolicy::Skip);
        assert_eq!(config.notifications.quota, 5);
        assert_eq!(config.notifications.horizon_hours, 24); // default
    }

    #[test]
    fn test_invalid_day_window_rejected() {
        let toml_str = r#"
[schedule]
day_start = "22:00"
day_end = "08:00"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_time_fails_parse() {
        let toml_str = r#"
[schedule]
day_start = "8 o'clock"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[notifications]\nhorizon_hours = 48\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.notifications.horizon_hours, 48);
    }
}
