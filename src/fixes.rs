use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::Coordinate;

/// Meters per second to knots conversion factor
pub const MPS_TO_KNOTS: f64 = 1.943_844;

/// A position fix as delivered by the location provider
///
/// Speed is in the provider's native unit (meters per second); a negative
/// speed means the provider does not know it. Accuracies are meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// Ground speed in meters per second, negative when unknown
    pub speed: f64,
    /// Course over ground in degrees, negative when unknown
    pub course: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub timestamp: DateTime<Utc>,
    /// Set by the provider when the location was produced by a simulator
    #[serde(default)]
    pub simulated: Option<bool>,
}

/// Why a fix was discarded at ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The engine is stopped
    NotRunning,
    /// Latitude/longitude missing, non-finite or out of range
    InvalidCoordinate,
    /// Negative horizontal accuracy means the provider has no position
    InvalidAccuracy,
    /// Speed is NaN or infinite
    InvalidSpeed,
    /// Same timestamp and position as the previous accepted fix
    Duplicate,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::NotRunning => write!(f, "not_running"),
            RejectReason::InvalidCoordinate => write!(f, "invalid_coordinate"),
            RejectReason::InvalidAccuracy => write!(f, "invalid_accuracy"),
            RejectReason::InvalidSpeed => write!(f, "invalid_speed"),
            RejectReason::Duplicate => write!(f, "duplicate"),
        }
    }
}

impl PositionFix {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Whether the provider reported a usable speed
    pub fn has_speed(&self) -> bool {
        self.speed >= 0.0
    }

    /// Reported speed in knots, clamped to zero when unknown
    pub fn speed_knots(&self) -> f64 {
        (self.speed * MPS_TO_KNOTS).max(0.0)
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated.unwrap_or(false)
    }

    /// Check the sample is usable before it reaches detection
    pub fn validate(&self) -> Result<(), RejectReason> {
        if !self.latitude.is_finite()
            || !self.longitude.is_finite()
            || !(-90.0..=90.0).contains(&self.latitude)
            || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(RejectReason::InvalidCoordinate);
        }
        if !self.horizontal_accuracy.is_finite() || self.horizontal_accuracy < 0.0 {
            return Err(RejectReason::InvalidAccuracy);
        }
        if !self.speed.is_finite() {
            return Err(RejectReason::InvalidSpeed);
        }
        Ok(())
    }

    /// Check if this fix repeats the previous accepted fix
    pub fn is_duplicate_of(&self, previous: &PositionFix) -> bool {
        self.timestamp == previous.timestamp
            && self.latitude == previous.latitude
            && self.longitude == previous.longitude
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::fix_at;
    use super::*;

    #[test]
    fn test_speed_conversion() {
        let fix = fix_at(0.0, 0.0, 120.0, Utc::now());
        assert!((fix.speed_knots() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_speed_clamped() {
        let mut fix = fix_at(0.0, 0.0, 0.0, Utc::now());
        fix.speed = -1.0;
        assert!(!fix.has_speed());
        assert_eq!(fix.speed_knots(), 0.0);
        assert!(fix.validate().is_ok());
    }

    #[test]
    fn test_invalid_samples() {
        let now = Utc::now();
        let mut fix = fix_at(0.0, 0.0, 10.0, now);
        fix.horizontal_accuracy = -1.0;
        assert_eq!(fix.validate(), Err(RejectReason::InvalidAccuracy));

        let fix = fix_at(95.0, 0.0, 10.0, now);
        assert_eq!(fix.validate(), Err(RejectReason::InvalidCoordinate));

        let fix = fix_at(f64::NAN, 0.0, 10.0, now);
        assert_eq!(fix.validate(), Err(RejectReason::InvalidCoordinate));

        let mut fix = fix_at(0.0, 0.0, 10.0, now);
        fix.speed = f64::INFINITY;
        assert_eq!(fix.validate(), Err(RejectReason::InvalidSpeed));
    }

    #[test]
    fn test_duplicate_detection() {
        let now = Utc::now();
        let a = fix_at(10.0, 10.0, 10.0, now);
        let b = fix_at(10.0, 10.0, 50.0, now);
        let c = fix_at(10.0, 10.001, 10.0, now);
        assert!(b.is_duplicate_of(&a));
        assert!(!c.is_duplicate_of(&a));
    }
}
