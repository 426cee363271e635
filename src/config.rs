use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::flight_phase::{AIRBORNE_MARGIN_KTS, SuppressionPolicy};

/// Tunable thresholds for the monitoring engine
///
/// Speeds are knots, distances nautical miles, accuracies meters and
/// intervals seconds. Missing keys in a TOML file fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub takeoff_speed_threshold: f64,
    pub landing_speed_threshold: f64,
    pub max_realistic_speed_kts: f64,
    pub position_jump_threshold_nm: f64,
    pub min_accuracy_threshold_meters: f64,
    pub time_discrepancy_threshold_seconds: f64,
    pub alert_on_known_zones: bool,
    pub minimum_alert_interval_seconds: f64,
    pub minimum_time_between_triggers: f64,
    pub smoothing_window: usize,
    pub suppression_policy: SuppressionPolicy,
    pub history_capacity: usize,
    pub reject_duplicate_fixes: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            takeoff_speed_threshold: 80.0,
            landing_speed_threshold: 60.0,
            max_realistic_speed_kts: 600.0,
            position_jump_threshold_nm: 5.0,
            min_accuracy_threshold_meters: 100.0,
            time_discrepancy_threshold_seconds: 5.0,
            alert_on_known_zones: true,
            minimum_alert_interval_seconds: 30.0,
            minimum_time_between_triggers: 10.0,
            smoothing_window: 5,
            suppression_policy: SuppressionPolicy::Freeze,
            history_capacity: 100,
            reject_duplicate_fixes: true,
        }
    }
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{} must be a positive number, got {}", name, value);
    }
    Ok(())
}

impl MonitorConfig {
    /// Reject settings that would break the phase machine's assumptions
    pub fn validate(&self) -> Result<()> {
        require_positive("takeoff_speed_threshold", self.takeoff_speed_threshold)?;
        require_positive("landing_speed_threshold", self.landing_speed_threshold)?;
        require_positive("max_realistic_speed_kts", self.max_realistic_speed_kts)?;
        require_positive("position_jump_threshold_nm", self.position_jump_threshold_nm)?;
        require_positive(
            "min_accuracy_threshold_meters",
            self.min_accuracy_threshold_meters,
        )?;
        require_positive(
            "time_discrepancy_threshold_seconds",
            self.time_discrepancy_threshold_seconds,
        )?;

        if !self.minimum_alert_interval_seconds.is_finite()
            || self.minimum_alert_interval_seconds < 0.0
        {
            bail!("minimum_alert_interval_seconds must not be negative");
        }
        if !self.minimum_time_between_triggers.is_finite()
            || self.minimum_time_between_triggers < 0.0
        {
            bail!("minimum_time_between_triggers must not be negative");
        }

        if self.landing_speed_threshold >= self.takeoff_speed_threshold {
            bail!(
                "landing_speed_threshold ({}) must be below takeoff_speed_threshold ({})",
                self.landing_speed_threshold,
                self.takeoff_speed_threshold
            );
        }
        if self.max_realistic_speed_kts <= self.takeoff_speed_threshold + AIRBORNE_MARGIN_KTS {
            bail!(
                "max_realistic_speed_kts ({}) must exceed the airborne speed ({})",
                self.max_realistic_speed_kts,
                self.takeoff_speed_threshold + AIRBORNE_MARGIN_KTS
            );
        }
        if self.smoothing_window == 0 {
            bail!("smoothing_window must be at least 1");
        }
        if self.history_capacity == 0 {
            bail!("history_capacity must be at least 1");
        }
        Ok(())
    }

    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: MonitorConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path))?;
        Ok(config)
    }

    /// Save config to a TOML file (atomic: write to .tmp then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, path))?;
        Ok(())
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `SKYGUARD_CONFIG` env var
/// 2. `./skyguard.toml`
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SKYGUARD_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("./skyguard.toml")
}
