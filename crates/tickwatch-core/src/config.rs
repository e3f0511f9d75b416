use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calendar::{CalendarConfig, TradingCalendar};
use crate::refresh::RefreshSettings;
use crate::CoreError;

/// Engine tuning, loadable from a JSON file. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Snapshots younger than this are not refetched.
    pub freshness_minutes: u64,
    /// Minimum gap between two alerts of the same tracker.
    pub debounce_secs: u64,
    pub refresh_interval_secs: u64,
    /// How often each subscriber job evaluates its trackers.
    pub check_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    /// Maximum fetches in flight.
    pub fetch_concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub fetch_quota_per_minute: Option<u32>,
    /// Field-map endpoint, queried as `{fetch_base_url}/{locator}`.
    pub fetch_base_url: String,
    pub calendar: CalendarConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            freshness_minutes: 30,
            debounce_secs: 300,
            refresh_interval_secs: 180,
            check_interval_secs: 60,
            reconcile_interval_secs: 60,
            fetch_concurrency: 8,
            fetch_timeout_secs: 30,
            fetch_quota_per_minute: None,
            fetch_base_url: String::from("http://127.0.0.1:8700/fields"),
            calendar: CalendarConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        let raw = fs::read_to_string(path).map_err(|error| {
            CoreError::Config(format!("cannot read {}: {error}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            CoreError::Config(format!("invalid config {}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject zero intervals and worker counts, and an unusable calendar.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [
            ("debounce_secs", self.debounce_secs),
            ("refresh_interval_secs", self.refresh_interval_secs),
            ("check_interval_secs", self.check_interval_secs),
            ("reconcile_interval_secs", self.reconcile_interval_secs),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
        ] {
            if value == 0 {
                return Err(CoreError::Config(format!("{field} must be greater than zero")));
            }
        }
        if self.fetch_concurrency == 0 {
            return Err(CoreError::Config(String::from(
                "fetch_concurrency must be greater than zero",
            )));
        }
        if self.fetch_quota_per_minute == Some(0) {
            return Err(CoreError::Config(String::from(
                "fetch_quota_per_minute must be greater than zero when set",
            )));
        }
        self.trading_calendar()?;
        Ok(())
    }

    pub fn trading_calendar(&self) -> Result<TradingCalendar, CoreError> {
        Ok(self.calendar.build()?)
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            concurrency: self.fetch_concurrency,
            freshness: Duration::from_secs(self.freshness_minutes * 60),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    /// Per-request HTTP budget for the fetch adapter, a tenth shorter than
    /// the pipeline's fetch timeout.
    pub fn http_timeout_ms(&self) -> u64 {
        let pipeline_ms = self.fetch_timeout_secs.saturating_mul(1_000);
        pipeline_ms - pipeline_ms / 10
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}
