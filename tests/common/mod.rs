//! Shared helpers for engine integration tests
//!
//! Fixes are built with speeds in knots and converted to the provider's
//! meters per second, the same way a real location provider would deliver
//! them.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use skyguard::fixes::MPS_TO_KNOTS;
use skyguard::{
    AlertLevel, EngineEvent, MonitorConfig, MonitoringEngine, PositionFix, RiskZone,
    Subscription, TriggerEvent, ZoneRegistry,
};
use std::sync::Arc;

/// Fixed start time so test output is reproducible
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap()
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(seconds)
}

/// A nominal fix with good accuracy
pub fn fix(lat: f64, lon: f64, speed_kts: f64, timestamp: DateTime<Utc>) -> PositionFix {
    PositionFix {
        latitude: lat,
        longitude: lon,
        altitude: 120.0,
        speed: speed_kts / MPS_TO_KNOTS,
        course: 270.0,
        horizontal_accuracy: 4.0,
        vertical_accuracy: 6.0,
        timestamp,
        simulated: None,
    }
}

/// Config with smoothing disabled so each fix drives the phase machine directly
pub fn unsmoothed_config() -> MonitorConfig {
    MonitorConfig {
        smoothing_window: 1,
        ..Default::default()
    }
}

/// A single test zone well away from the default test track at 0,0
pub fn test_zones() -> ZoneRegistry {
    ZoneRegistry::new(vec![RiskZone::new(
        "Range R-1",
        "Test Region",
        30.0,
        30.0,
        25.0,
        AlertLevel::Warning,
        "Scheduled GPS testing",
    )])
    .unwrap()
}

/// A started engine over `test_zones`
pub fn started_engine(config: MonitorConfig) -> MonitoringEngine {
    let mut engine = MonitoringEngine::new(config, Arc::new(test_zones())).unwrap();
    engine.start();
    engine
}

/// Feed fixes along a track near 0,0, one second apart, judged at their own time
pub fn drive_speeds(engine: &mut MonitoringEngine, start_second: i64, speeds: &[f64]) {
    for (i, speed) in speeds.iter().enumerate() {
        let t = at(start_second + i as i64);
        let lon = 0.0005 * (start_second + i as i64) as f64;
        engine.process_fix_at(fix(0.0, lon, *speed, t), t);
    }
}

pub fn triggers(subscription: &Subscription) -> Vec<TriggerEvent> {
    subscription
        .receiver
        .try_iter()
        .filter_map(|event| match event {
            EngineEvent::Trigger(trigger) => Some(trigger),
            _ => None,
        })
        .collect()
}
