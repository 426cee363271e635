//! Flight phase state machine driving the block off / block on triggers
//!
//! ```text
//! onGround --(10 < v < takeoff)--> taxiing --(v >= takeoff, OFF)--> takeoffRoll
//!    ^                               |                                  |
//!    |                            (v < 5)                        (v >= takeoff + 20)
//!    |                               v                                  v
//!    +----(v < 10, reset)---- landingRoll <--(v <= landing, ON)---- airborne
//! ```
//!
//! Any other speed/phase combination holds the current phase.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::alert::AlertLevel;

/// Added to the takeoff threshold before the roll counts as airborne
pub const AIRBORNE_MARGIN_KTS: f64 = 20.0;
/// Speed above which a stationary aircraft is considered taxiing
const TAXI_START_KTS: f64 = 10.0;
/// Speed below which a taxiing aircraft is considered stopped
const TAXI_STOP_KTS: f64 = 5.0;
/// Speed below which the landing roll is complete
const ROLLOUT_COMPLETE_KTS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlightPhase {
    #[default]
    OnGround,
    Taxiing,
    TakeoffRoll,
    Airborne,
    LandingRoll,
}

impl std::fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlightPhase::OnGround => write!(f, "onGround"),
            FlightPhase::Taxiing => write!(f, "taxiing"),
            FlightPhase::TakeoffRoll => write!(f, "takeoffRoll"),
            FlightPhase::Airborne => write!(f, "airborne"),
            FlightPhase::LandingRoll => write!(f, "landingRoll"),
        }
    }
}

/// Logbook time recorded by a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    /// Block off
    #[serde(rename = "OFF")]
    Off,
    /// Block on
    #[serde(rename = "ON")]
    On,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Off => "OFF",
            TriggerType::On => "ON",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the phase machine does with a fix while the alert level is `alert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionPolicy {
    /// Skip evaluation, holding the phase and flags as they are. Transitions
    /// missed during the alert are not replayed.
    #[default]
    Freeze,
    /// Drop back to `onGround` and clear the fired flags. The trigger cooldown
    /// still applies, so a reset cannot produce a duplicate inside the window.
    ResetToGround,
}

/// A trigger that passed both the fired flag and the cooldown
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFiring {
    pub trigger: TriggerType,
    pub timestamp: DateTime<Utc>,
    pub speed_kts: f64,
    pub alert_level: AlertLevel,
}

/// Result of feeding one speed sample to the machine
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseUpdate {
    pub previous: FlightPhase,
    pub phase: FlightPhase,
    pub fired: Option<TriggerFiring>,
    /// Trigger whose transition happened but whose emission hit the cooldown
    pub cooldown_suppressed: Option<TriggerType>,
    /// Evaluation skipped because of an active spoofing alert
    pub suppressed_by_alert: bool,
}

impl PhaseUpdate {
    pub fn changed(&self) -> bool {
        self.previous != self.phase
    }
}

/// Per-trigger cooldown based on wall-clock comparisons
#[derive(Debug, Clone)]
pub struct TriggerCooldown {
    window: Duration,
    last_fired: HashMap<TriggerType, DateTime<Utc>>,
}

impl TriggerCooldown {
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window: seconds_to_duration(window_seconds),
            last_fired: HashMap::new(),
        }
    }

    pub fn set_window(&mut self, window_seconds: f64) {
        self.window = seconds_to_duration(window_seconds);
    }

    /// Record a firing at `now` unless one happened inside the window
    pub fn try_fire(&mut self, trigger: TriggerType, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_fired.get(&trigger)
            && now.signed_duration_since(*last) < self.window
        {
            return false;
        }
        self.last_fired.insert(trigger, now);
        true
    }

    pub fn last_fired(&self, trigger: TriggerType) -> Option<DateTime<Utc>> {
        self.last_fired.get(&trigger).copied()
    }
}

pub(crate) fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::milliseconds((seconds * 1000.0).round() as i64)
}

#[derive(Debug, Clone)]
pub struct FlightPhaseMachine {
    phase: FlightPhase,
    off_fired: bool,
    on_fired: bool,
    takeoff_threshold: f64,
    landing_threshold: f64,
    policy: SuppressionPolicy,
    cooldown: TriggerCooldown,
}

impl FlightPhaseMachine {
    pub fn new(
        takeoff_threshold: f64,
        landing_threshold: f64,
        cooldown_seconds: f64,
        policy: SuppressionPolicy,
    ) -> Self {
        Self {
            phase: FlightPhase::OnGround,
            off_fired: false,
            on_fired: false,
            takeoff_threshold,
            landing_threshold,
            policy,
            cooldown: TriggerCooldown::new(cooldown_seconds),
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn off_fired(&self) -> bool {
        self.off_fired
    }

    pub fn on_fired(&self) -> bool {
        self.on_fired
    }

    pub fn cooldown(&self) -> &TriggerCooldown {
        &self.cooldown
    }

    pub fn set_thresholds(&mut self, takeoff: f64, landing: f64) {
        self.takeoff_threshold = takeoff;
        self.landing_threshold = landing;
    }

    pub fn set_policy(&mut self, policy: SuppressionPolicy) {
        self.policy = policy;
    }

    pub fn set_cooldown(&mut self, seconds: f64) {
        self.cooldown.set_window(seconds);
    }

    /// Back to `onGround` with both flags cleared. Cooldown history is kept.
    pub fn reset(&mut self) {
        self.phase = FlightPhase::OnGround;
        self.off_fired = false;
        self.on_fired = false;
    }

    /// Advance the machine with a smoothed speed sample
    ///
    /// `timestamp` is the fix time recorded in the trigger; `now` is the
    /// clock the cooldown is measured against.
    pub fn update(
        &mut self,
        speed_kts: f64,
        alert_level: AlertLevel,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PhaseUpdate {
        let previous = self.phase;
        let mut update = PhaseUpdate {
            previous,
            phase: previous,
            fired: None,
            cooldown_suppressed: None,
            suppressed_by_alert: false,
        };

        if alert_level == AlertLevel::Alert {
            update.suppressed_by_alert = true;
            match self.policy {
                SuppressionPolicy::Freeze => {
                    debug!("Phase evaluation frozen in {} during active alert", previous);
                }
                SuppressionPolicy::ResetToGround => {
                    if previous != FlightPhase::OnGround {
                        warn!("Active alert - resetting phase from {} to onGround", previous);
                    }
                    self.reset();
                    update.phase = self.phase;
                }
            }
            return update;
        }

        let mut pending_trigger = None;
        let next = match self.phase {
            FlightPhase::OnGround if speed_kts > TAXI_START_KTS && speed_kts < self.takeoff_threshold => {
                Some(FlightPhase::Taxiing)
            }
            FlightPhase::Taxiing if speed_kts >= self.takeoff_threshold && !self.off_fired => {
                self.off_fired = true;
                pending_trigger = Some(TriggerType::Off);
                Some(FlightPhase::TakeoffRoll)
            }
            FlightPhase::Taxiing if speed_kts < TAXI_STOP_KTS => Some(FlightPhase::OnGround),
            FlightPhase::TakeoffRoll
                if speed_kts >= self.takeoff_threshold + AIRBORNE_MARGIN_KTS =>
            {
                Some(FlightPhase::Airborne)
            }
            FlightPhase::Airborne if speed_kts <= self.landing_threshold => {
                if !self.on_fired {
                    self.on_fired = true;
                    pending_trigger = Some(TriggerType::On);
                }
                Some(FlightPhase::LandingRoll)
            }
            FlightPhase::LandingRoll if speed_kts < ROLLOUT_COMPLETE_KTS => {
                self.off_fired = false;
                self.on_fired = false;
                Some(FlightPhase::OnGround)
            }
            _ => None,
        };

        if let Some(next) = next {
            info!(
                "Flight phase {} -> {} at {:.1} kt",
                previous, next, speed_kts
            );
            self.phase = next;
            update.phase = next;
        }

        if let Some(trigger) = pending_trigger {
            if self.cooldown.try_fire(trigger, now) {
                info!("Trigger {} fired at {:.1} kt", trigger, speed_kts);
                update.fired = Some(TriggerFiring {
                    trigger,
                    timestamp,
                    speed_kts,
                    alert_level,
                });
            } else {
                debug!("Trigger {} suppressed by cooldown", trigger);
                update.cooldown_suppressed = Some(trigger);
            }
        }

        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> FlightPhaseMachine {
        FlightPhaseMachine::new(80.0, 60.0, 10.0, SuppressionPolicy::Freeze)
    }

    /// Feed speeds one second apart, returning (phases, fired triggers)
    fn drive(
        m: &mut FlightPhaseMachine,
        speeds: &[f64],
        start: DateTime<Utc>,
    ) -> (Vec<FlightPhase>, Vec<TriggerFiring>) {
        let mut phases = Vec::new();
        let mut fired = Vec::new();
        for (i, speed) in speeds.iter().enumerate() {
            let t = start + Duration::seconds(i as i64);
            let update = m.update(*speed, AlertLevel::Normal, t, t);
            phases.push(update.phase);
            if let Some(f) = update.fired {
                fired.push(f);
            }
        }
        (phases, fired)
    }

    #[test]
    fn test_full_flight_sequence() {
        let mut m = machine();
        let start = Utc::now();
        let (phases, fired) = drive(&mut m, &[0.0, 15.0, 85.0, 110.0, 55.0, 5.0], start);

        assert_eq!(
            phases,
            vec![
                FlightPhase::OnGround,
                FlightPhase::Taxiing,
                FlightPhase::TakeoffRoll,
                FlightPhase::Airborne,
                FlightPhase::LandingRoll,
                FlightPhase::OnGround,
            ]
        );
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].trigger, TriggerType::Off);
        assert_eq!(fired[0].speed_kts, 85.0);
        assert_eq!(fired[1].trigger, TriggerType::On);
        assert_eq!(fired[1].speed_kts, 55.0);
        assert!(!m.off_fired() && !m.on_fired());
    }

    #[test]
    fn test_no_skip_from_ground_to_takeoff() {
        let mut m = machine();
        let now = Utc::now();
        let update = m.update(120.0, AlertLevel::Normal, now, now);
        assert_eq!(update.phase, FlightPhase::OnGround);
        assert!(update.fired.is_none());
    }

    #[test]
    fn test_taxi_back_to_ground() {
        let mut m = machine();
        let (phases, fired) = drive(&mut m, &[20.0, 7.0, 4.0], Utc::now());
        assert_eq!(
            phases,
            vec![FlightPhase::Taxiing, FlightPhase::Taxiing, FlightPhase::OnGround]
        );
        assert!(fired.is_empty());
    }

    #[test]
    fn test_hysteresis_margin_holds_takeoff_roll() {
        let mut m = machine();
        let (phases, _) = drive(&mut m, &[20.0, 85.0, 95.0, 79.0, 99.9, 100.0], Utc::now());
        assert_eq!(phases[4], FlightPhase::TakeoffRoll);
        assert_eq!(phases[5], FlightPhase::Airborne);
    }

    #[test]
    fn test_cooldown_blocks_second_off_within_window() {
        let mut m = machine();
        let start = Utc::now();
        // A complete short hop inside ten seconds, then a second takeoff
        let (_, fired) = drive(
            &mut m,
            &[15.0, 85.0, 110.0, 55.0, 5.0, 15.0, 85.0],
            start,
        );
        let offs = fired.iter().filter(|f| f.trigger == TriggerType::Off).count();
        assert_eq!(offs, 1);
        assert_eq!(m.phase(), FlightPhase::TakeoffRoll);
    }

    #[test]
    fn test_cooldown_reports_suppressed_trigger() {
        let mut m = machine();
        let t0 = Utc::now();
        for (i, s) in [15.0, 85.0, 110.0, 55.0, 5.0, 15.0].iter().enumerate() {
            let t = t0 + Duration::seconds(i as i64);
            m.update(*s, AlertLevel::Normal, t, t);
        }
        let t = t0 + Duration::seconds(6);
        let update = m.update(85.0, AlertLevel::Normal, t, t);
        assert_eq!(update.cooldown_suppressed, Some(TriggerType::Off));
        assert!(update.fired.is_none());
    }

    #[test]
    fn test_second_leg_after_cooldown_fires() {
        let mut m = machine();
        let t0 = Utc::now();
        let (_, first) = drive(&mut m, &[15.0, 85.0, 110.0, 55.0, 5.0], t0);
        let (_, second) = drive(&mut m, &[15.0, 85.0], t0 + Duration::seconds(60));
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].trigger, TriggerType::Off);
    }

    #[test]
    fn test_off_not_refired_while_flag_set() {
        let mut m = machine();
        let t0 = Utc::now();
        drive(&mut m, &[15.0, 85.0], t0);
        assert!(m.off_fired());
        // Decelerate on the runway: takeoffRoll has no edge back, phase holds
        let (phases, fired) = drive(&mut m, &[40.0, 85.0], t0 + Duration::seconds(60));
        assert!(phases.iter().all(|p| *p == FlightPhase::TakeoffRoll));
        assert!(fired.is_empty());
    }

    #[test]
    fn test_freeze_policy_holds_phase() {
        let mut m = machine();
        let t0 = Utc::now();
        drive(&mut m, &[15.0], t0);
        let update = m.update(85.0, AlertLevel::Alert, t0, t0);
        assert!(update.suppressed_by_alert);
        assert_eq!(update.phase, FlightPhase::Taxiing);
        assert!(update.fired.is_none());
        assert!(!m.off_fired());

        // Warning does not suppress
        let update = m.update(85.0, AlertLevel::Warning, t0, t0);
        assert_eq!(update.phase, FlightPhase::TakeoffRoll);
        assert!(update.fired.is_some());
    }

    #[test]
    fn test_reset_policy_returns_to_ground() {
        let mut m = FlightPhaseMachine::new(80.0, 60.0, 10.0, SuppressionPolicy::ResetToGround);
        let t0 = Utc::now();
        drive(&mut m, &[15.0, 85.0, 110.0], t0);
        assert_eq!(m.phase(), FlightPhase::Airborne);

        let update = m.update(110.0, AlertLevel::Alert, t0, t0);
        assert_eq!(update.phase, FlightPhase::OnGround);
        assert!(!m.off_fired());

        // Re-taxi and cross the threshold inside the cooldown: transition, no emission
        let t1 = t0 + Duration::seconds(3);
        m.update(15.0, AlertLevel::Normal, t1, t1);
        let update = m.update(85.0, AlertLevel::Normal, t1, t1);
        assert_eq!(update.phase, FlightPhase::TakeoffRoll);
        assert_eq!(update.cooldown_suppressed, Some(TriggerType::Off));
    }

    #[test]
    fn test_cooldown_window() {
        let mut cooldown = TriggerCooldown::new(10.0);
        let t0 = Utc::now();
        assert!(cooldown.try_fire(TriggerType::Off, t0));
        assert!(!cooldown.try_fire(TriggerType::Off, t0 + Duration::seconds(9)));
        assert!(cooldown.try_fire(TriggerType::On, t0 + Duration::seconds(9)));
        assert!(cooldown.try_fire(TriggerType::Off, t0 + Duration::seconds(10)));
        assert_eq!(
            cooldown.last_fired(TriggerType::Off),
            Some(t0 + Duration::seconds(10))
        );
    }
}
