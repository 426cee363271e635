//! Alert levels and anomaly records
//!
//! An `AnomalyEvent` is created once by the detector and never changed again,
//! apart from the externally-set `reported` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fixes::PositionFix;

/// Severity, ordered so the aggregate of several anomalies is their max
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    #[default]
    Normal,
    Caution,
    Warning,
    Alert,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Caution => "caution",
            AlertLevel::Warning => "warning",
            AlertLevel::Alert => "alert",
        }
    }

    /// Numeric value for gauges
    pub fn as_gauge(&self) -> f64 {
        match self {
            AlertLevel::Normal => 0.0,
            AlertLevel::Caution => 1.0,
            AlertLevel::Warning => 2.0,
            AlertLevel::Alert => 3.0,
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AlertLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(AlertLevel::Normal),
            "caution" => Ok(AlertLevel::Caution),
            "warning" => Ok(AlertLevel::Warning),
            "alert" => Ok(AlertLevel::Alert),
            other => Err(anyhow::anyhow!("unknown alert level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnomalyType {
    SuddenPositionJump,
    UnrealisticSpeed,
    PoorAccuracy,
    TimeDiscrepancy,
    /// Reserved, never produced by the detector
    AltitudeAnomaly,
    /// Reserved, never produced by the detector
    SignalLoss,
    KnownSpoofingZone,
    SoftwareSimulation,
}

impl AnomalyType {
    pub const ALL: [AnomalyType; 8] = [
        AnomalyType::SuddenPositionJump,
        AnomalyType::UnrealisticSpeed,
        AnomalyType::PoorAccuracy,
        AnomalyType::TimeDiscrepancy,
        AnomalyType::AltitudeAnomaly,
        AnomalyType::SignalLoss,
        AnomalyType::KnownSpoofingZone,
        AnomalyType::SoftwareSimulation,
    ];

    /// Stable identifier used in logs, metrics and the text export
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::SuddenPositionJump => "suddenPositionJump",
            AnomalyType::UnrealisticSpeed => "unrealisticSpeed",
            AnomalyType::PoorAccuracy => "poorAccuracy",
            AnomalyType::TimeDiscrepancy => "timeDiscrepancy",
            AnomalyType::AltitudeAnomaly => "altitudeAnomaly",
            AnomalyType::SignalLoss => "signalLoss",
            AnomalyType::KnownSpoofingZone => "knownSpoofingZone",
            AnomalyType::SoftwareSimulation => "softwareSimulation",
        }
    }

    /// Human-readable name for status messages
    pub fn display_name(&self) -> &'static str {
        match self {
            AnomalyType::SuddenPositionJump => "Sudden Position Jump",
            AnomalyType::UnrealisticSpeed => "Unrealistic Speed",
            AnomalyType::PoorAccuracy => "Poor GPS Accuracy",
            AnomalyType::TimeDiscrepancy => "Time Discrepancy",
            AnomalyType::AltitudeAnomaly => "Altitude Anomaly",
            AnomalyType::SignalLoss => "Signal Loss",
            AnomalyType::KnownSpoofingZone => "Known Spoofing Zone",
            AnomalyType::SoftwareSimulation => "Software Simulation",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnomalyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnomalyType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown anomaly type '{}'", s))
    }
}

/// Position data captured when the anomaly was detected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
    /// Provider speed in meters per second
    pub speed: f64,
    pub course: f64,
}

impl From<&PositionFix> for LocationSnapshot {
    fn from(fix: &PositionFix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            accuracy: fix.horizontal_accuracy,
            speed: fix.speed,
            course: fix.course,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub location: LocationSnapshot,
    pub anomaly_type: AnomalyType,
    pub alert_level: AlertLevel,
    pub details: String,
    pub flight_id: Option<String>,
    #[serde(default)]
    pub reported: bool,
}

impl AnomalyEvent {
    pub fn new(
        fix: &PositionFix,
        anomaly_type: AnomalyType,
        alert_level: AlertLevel,
        details: String,
        flight_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: fix.timestamp,
            location: LocationSnapshot::from(fix),
            anomaly_type,
            alert_level,
            details,
            flight_id,
            reported: false,
        }
    }
}
