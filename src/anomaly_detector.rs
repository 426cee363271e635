//! Per-fix GPS integrity checks
//!
//! Six independent checks run against every accepted fix; each may add an
//! anomaly. A single fix can trip several at once.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::alert::{AlertLevel, AnomalyEvent, AnomalyType};
use crate::config::MonitorConfig;
use crate::fixes::PositionFix;
use crate::risk_zones::{RiskZone, ZoneRegistry};

/// A jump only counts when it happens faster than this
const MAX_JUMP_WINDOW_SECONDS: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorThresholds {
    pub max_realistic_speed_kts: f64,
    pub position_jump_threshold_nm: f64,
    pub min_accuracy_threshold_meters: f64,
    pub time_discrepancy_threshold_seconds: f64,
    pub alert_on_known_zones: bool,
}

impl From<&MonitorConfig> for DetectorThresholds {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            max_realistic_speed_kts: config.max_realistic_speed_kts,
            position_jump_threshold_nm: config.position_jump_threshold_nm,
            min_accuracy_threshold_meters: config.min_accuracy_threshold_meters,
            time_discrepancy_threshold_seconds: config.time_discrepancy_threshold_seconds,
            alert_on_known_zones: config.alert_on_known_zones,
        }
    }
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

/// Anomalies found on one fix, plus the zones newly entered on it
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub events: Vec<AnomalyEvent>,
    pub entered_zones: Vec<RiskZone>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn max_level(&self) -> Option<AlertLevel> {
        self.events.iter().map(|e| e.alert_level).max()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    thresholds: DetectorThresholds,
    previous_fix: Option<PositionFix>,
    /// Zones containing the last fix, in order of entry
    occupied: Vec<RiskZone>,
}

impl AnomalyDetector {
    pub fn new(thresholds: DetectorThresholds) -> Self {
        Self {
            thresholds,
            previous_fix: None,
            occupied: Vec::new(),
        }
    }

    pub fn set_thresholds(&mut self, thresholds: DetectorThresholds) {
        if !thresholds.alert_on_known_zones {
            self.occupied.clear();
        }
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> &DetectorThresholds {
        &self.thresholds
    }

    /// The earliest entered zone still containing the last fix
    pub fn current_zone(&self) -> Option<&str> {
        self.occupied.first().map(|z| z.name.as_str())
    }

    pub fn occupied_zones(&self) -> &[RiskZone] {
        &self.occupied
    }

    /// Highest risk level among the occupied zones
    pub fn occupied_level(&self) -> Option<AlertLevel> {
        self.occupied.iter().map(|z| z.risk_level).max()
    }

    pub fn previous_fix(&self) -> Option<&PositionFix> {
        self.previous_fix.as_ref()
    }

    /// Forget the previous fix and the occupied zone
    pub fn reset(&mut self) {
        self.previous_fix = None;
        self.occupied.clear();
    }

    /// Run every check against `fix`, measuring clock skew against `now`
    pub fn detect(
        &mut self,
        fix: &PositionFix,
        now: DateTime<Utc>,
        zones: &ZoneRegistry,
        flight_id: Option<&str>,
    ) -> Detection {
        let mut events = Vec::new();
        let mut entered_zones = Vec::new();
        let flight_id = flight_id.map(str::to_string);

        let mut push = |anomaly_type: AnomalyType, level: AlertLevel, details: String| {
            warn!("GPS anomaly {} ({}): {}", anomaly_type, level, details);
            metrics::counter!("skyguard.anomalies_detected_total", "type" => anomaly_type.as_str())
                .increment(1);
            events.push(AnomalyEvent::new(fix, anomaly_type, level, details, flight_id.clone()));
        };

        if fix.is_simulated() {
            push(
                AnomalyType::SoftwareSimulation,
                AlertLevel::Alert,
                "Location reported as simulated by software".to_string(),
            );
        }

        for zone in self.check_zones(fix, zones) {
            push(
                AnomalyType::KnownSpoofingZone,
                zone.risk_level,
                format!(
                    "Entered known GPS interference zone: {} ({}). {}",
                    zone.name, zone.region, zone.notes
                ),
            );
            entered_zones.push(zone);
        }

        if let Some(previous) = &self.previous_fix
            && let Some(details) = self.check_position_jump(previous, fix)
        {
            push(AnomalyType::SuddenPositionJump, AlertLevel::Alert, details);
        }

        if fix.horizontal_accuracy > self.thresholds.min_accuracy_threshold_meters {
            push(
                AnomalyType::PoorAccuracy,
                AlertLevel::Warning,
                format!(
                    "Horizontal accuracy {:.0} m exceeds {:.0} m",
                    fix.horizontal_accuracy, self.thresholds.min_accuracy_threshold_meters
                ),
            );
        }

        let skew_seconds =
            now.signed_duration_since(fix.timestamp).num_milliseconds().abs() as f64 / 1000.0;
        if skew_seconds > self.thresholds.time_discrepancy_threshold_seconds {
            push(
                AnomalyType::TimeDiscrepancy,
                AlertLevel::Warning,
                format!(
                    "Device clock differs from fix time by {:.1}s (limit {:.1}s)",
                    skew_seconds, self.thresholds.time_discrepancy_threshold_seconds
                ),
            );
        }

        if fix.has_speed() && fix.speed_knots() > self.thresholds.max_realistic_speed_kts {
            push(
                AnomalyType::UnrealisticSpeed,
                AlertLevel::Alert,
                format!(
                    "Reported speed {:.0} kt exceeds {:.0} kt",
                    fix.speed_knots(),
                    self.thresholds.max_realistic_speed_kts
                ),
            );
        }

        self.previous_fix = Some(fix.clone());
        Detection {
            events,
            entered_zones,
        }
    }

    /// Track zone occupancy, returning the zones entered on this fix
    ///
    /// A zone stays occupied until a fix falls outside it, so wandering
    /// between overlapping zones never re-enters one that was not left.
    fn check_zones(&mut self, fix: &PositionFix, zones: &ZoneRegistry) -> Vec<RiskZone> {
        if !self.thresholds.alert_on_known_zones {
            return Vec::new();
        }

        let containing = zones.containing_zones(&fix.coordinate());

        self.occupied.retain(|zone| {
            let still_inside = containing.iter().any(|c| c.name == zone.name);
            if !still_inside {
                debug!("Left risk zone '{}'", zone.name);
            }
            still_inside
        });

        let mut entered = Vec::new();
        for zone in containing {
            if self.occupied.iter().any(|z| z.name == zone.name) {
                continue;
            }
            info!("Entered risk zone '{}' ({})", zone.name, zone.risk_level);
            self.occupied.push(zone.clone());
            entered.push(zone.clone());
        }
        entered
    }

    fn check_position_jump(&self, previous: &PositionFix, fix: &PositionFix) -> Option<String> {
        let elapsed_seconds = fix
            .timestamp
            .signed_duration_since(previous.timestamp)
            .num_milliseconds() as f64
            / 1000.0;
        if elapsed_seconds <= 0.0 {
            return None;
        }

        let distance_nm = previous.coordinate().distance_nm(&fix.coordinate());
        let implied_speed_kts = distance_nm / (elapsed_seconds / 3600.0);

        if distance_nm > self.thresholds.position_jump_threshold_nm
            && elapsed_seconds < MAX_JUMP_WINDOW_SECONDS
            && implied_speed_kts > self.thresholds.max_realistic_speed_kts
        {
            Some(format!(
                "Position jumped {:.1} NM in {:.1}s (implied {:.0} kt)",
                distance_nm, elapsed_seconds, implied_speed_kts
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixes::test_support::fix_at;
    use chrono::Duration;

    fn zones() -> ZoneRegistry {
        ZoneRegistry::new(vec![RiskZone::new(
            "Test Zone",
            "Test",
            10.0,
            10.0,
            20.0,
            AlertLevel::Warning,
            "test notes",
        )])
        .unwrap()
    }

    fn types(detection: &Detection) -> Vec<AnomalyType> {
        detection.events.iter().map(|e| e.anomaly_type).collect()
    }

    #[test]
    fn test_nominal_fix_has_no_anomalies() {
        let mut detector = AnomalyDetector::default();
        let now = Utc::now();
        let detection = detector.detect(&fix_at(0.0, 0.0, 50.0, now), now, &zones(), None);
        assert!(detection.is_empty());
        assert_eq!(detection.max_level(), None);
    }

    #[test]
    fn test_simulated_fix_is_alert() {
        let mut detector = AnomalyDetector::default();
        let now = Utc::now();
        let mut fix = fix_at(0.0, 0.0, 50.0, now);
        fix.simulated = Some(true);
        let detection = detector.detect(&fix, now, &zones(), None);
        assert_eq!(types(&detection), vec![AnomalyType::SoftwareSimulation]);
        assert_eq!(detection.max_level(), Some(AlertLevel::Alert));
    }

    #[test]
    fn test_zone_entry_emitted_once_per_occupancy() {
        let mut detector = AnomalyDetector::default();
        let registry = zones();
        let t0 = Utc::now();

        let d = detector.detect(&fix_at(10.0, 10.0, 50.0, t0), t0, &registry, None);
        assert_eq!(types(&d), vec![AnomalyType::KnownSpoofingZone]);
        assert_eq!(d.events[0].alert_level, AlertLevel::Warning);
        assert_eq!(d.entered_zones[0].name, "Test Zone");
        assert_eq!(detector.current_zone(), Some("Test Zone"));

        let t1 = t0 + Duration::seconds(1);
        let d = detector.detect(&fix_at(10.001, 10.0, 50.0, t1), t1, &registry, None);
        assert!(d.is_empty());

        let t2 = t0 + Duration::seconds(600);
        let d = detector.detect(&fix_at(12.0, 10.0, 50.0, t2), t2, &registry, None);
        assert!(d.is_empty());
        assert_eq!(detector.current_zone(), None);

        let t3 = t0 + Duration::seconds(1200);
        let d = detector.detect(&fix_at(10.0, 10.0, 50.0, t3), t3, &registry, None);
        assert_eq!(types(&d), vec![AnomalyType::KnownSpoofingZone]);
    }

    #[test]
    fn test_overlapping_zones_not_reentered_while_inside() {
        // Centers 60 NM apart with 60 NM radii; lon 0.45 and 0.55 are inside both
        let registry = ZoneRegistry::new(vec![
            RiskZone::new("West", "Test", 0.0, 0.0, 60.0, AlertLevel::Caution, ""),
            RiskZone::new("East", "Test", 0.0, 1.0, 60.0, AlertLevel::Warning, ""),
        ])
        .unwrap();
        let mut detector = AnomalyDetector::default();
        let t0 = Utc::now() - Duration::seconds(3600);

        let mut entries = Vec::new();
        for (i, lon) in [0.45, 0.55, 0.45, 0.55, 0.45].iter().enumerate() {
            let t = t0 + Duration::seconds(600 * i as i64);
            let d = detector.detect(&fix_at(0.0, *lon, 50.0, t), t, &registry, None);
            entries.extend(d.entered_zones.into_iter().map(|z| z.name));
        }

        entries.sort();
        assert_eq!(entries, vec!["East".to_string(), "West".to_string()]);
        assert_eq!(detector.current_zone(), Some("West"));
        assert_eq!(detector.occupied_zones().len(), 2);
        assert_eq!(detector.occupied_level(), Some(AlertLevel::Warning));

        // Leaving West only, then coming back, re-enters West alone
        let t = t0 + Duration::seconds(3000);
        let d = detector.detect(&fix_at(0.0, 1.5, 50.0, t), t, &registry, None);
        assert!(d.entered_zones.is_empty());
        assert_eq!(detector.current_zone(), Some("East"));

        let t = t0 + Duration::seconds(3300);
        let d = detector.detect(&fix_at(0.0, 0.55, 50.0, t), t, &registry, None);
        let names: Vec<_> = d.entered_zones.iter().map(|z| z.name.as_str()).collect();
        assert_eq!(names, vec!["West"]);
    }

    #[test]
    fn test_zone_check_disabled() {
        let mut detector = AnomalyDetector::new(DetectorThresholds {
            alert_on_known_zones: false,
            ..Default::default()
        });
        let now = Utc::now();
        let d = detector.detect(&fix_at(10.0, 10.0, 50.0, now), now, &zones(), None);
        assert!(d.is_empty());
        assert_eq!(detector.current_zone(), None);
    }

    #[test]
    fn test_position_jump_fast_is_flagged() {
        let mut detector = AnomalyDetector::default();
        let t0 = Utc::now();
        detector.detect(&fix_at(0.0, 0.0, 50.0, t0), t0, &zones(), None);

        // 20 NM north in 30 seconds
        let t1 = t0 + Duration::seconds(30);
        let d = detector.detect(&fix_at(20.0 / 60.04, 0.0, 50.0, t1), t1, &zones(), None);
        assert_eq!(types(&d), vec![AnomalyType::SuddenPositionJump]);
        assert_eq!(d.events[0].alert_level, AlertLevel::Alert);
    }

    #[test]
    fn test_position_jump_slow_is_not_flagged() {
        let mut detector = AnomalyDetector::default();
        let t0 = Utc::now() - Duration::seconds(3600);
        detector.detect(&fix_at(0.0, 0.0, 50.0, t0), t0, &zones(), None);

        let t1 = t0 + Duration::seconds(3600);
        let d = detector.detect(&fix_at(20.0 / 60.04, 0.0, 50.0, t1), t1, &zones(), None);
        assert!(d.is_empty());
    }

    #[test]
    fn test_out_of_order_fix_skips_jump_check() {
        let mut detector = AnomalyDetector::default();
        let t0 = Utc::now();
        detector.detect(&fix_at(0.0, 0.0, 50.0, t0), t0, &zones(), None);
        let earlier = t0 - Duration::seconds(1);
        let d = detector.detect(&fix_at(1.0, 0.0, 50.0, earlier), t0, &zones(), None);
        assert!(d.is_empty());
    }

    #[test]
    fn test_accuracy_and_speed_together() {
        let mut detector = AnomalyDetector::default();
        let now = Utc::now();
        let mut fix = fix_at(0.0, 0.0, 700.0, now);
        fix.horizontal_accuracy = 250.0;
        let d = detector.detect(&fix, now, &zones(), None);
        assert_eq!(
            types(&d),
            vec![AnomalyType::PoorAccuracy, AnomalyType::UnrealisticSpeed]
        );
        assert_eq!(d.max_level(), Some(AlertLevel::Alert));
    }

    #[test]
    fn test_unknown_speed_not_flagged() {
        let mut detector = AnomalyDetector::default();
        let now = Utc::now();
        let mut fix = fix_at(0.0, 0.0, 0.0, now);
        fix.speed = -1.0;
        assert!(detector.detect(&fix, now, &zones(), None).is_empty());
    }

    #[test]
    fn test_clock_discrepancy() {
        let mut detector = AnomalyDetector::default();
        let now = Utc::now();
        let fix = fix_at(0.0, 0.0, 50.0, now - Duration::seconds(8));
        let d = detector.detect(&fix, now, &zones(), Some("N123AB"));
        assert_eq!(types(&d), vec![AnomalyType::TimeDiscrepancy]);
        assert_eq!(d.events[0].alert_level, AlertLevel::Warning);
        assert_eq!(d.events[0].flight_id.as_deref(), Some("N123AB"));

        let fix = fix_at(0.0, 0.0, 50.0, now + Duration::seconds(4));
        assert!(detector.detect(&fix, now, &zones(), None).is_empty());
    }
}
