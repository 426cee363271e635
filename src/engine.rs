//! The monitoring engine: one explicit pipeline per fix
//!
//! raw fix -> speed smoother -> anomaly detector -> alert aggregator ->
//! flight phase machine -> event bus
//!
//! The engine is a plain `&mut self` state machine. Hosts that receive fixes
//! on several threads go through `MonitorService`, which owns the engine on a
//! single task.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::{AlertLevel, AnomalyEvent};
use crate::alert_aggregator::{AlertAggregator, AlertNotification, AnomalySummary};
use crate::anomaly_detector::{AnomalyDetector, DetectorThresholds};
use crate::anomaly_log::{AnomalyStore, HistoryPersister};
use crate::config::MonitorConfig;
use crate::events::{EngineEvent, EventBus, Subscription, TriggerEvent, ZoneEntryNotification};
use crate::fixes::{PositionFix, RejectReason};
use crate::flight_phase::{FlightPhase, FlightPhaseMachine, PhaseUpdate, TriggerType};
use crate::risk_zones::ZoneRegistry;
use crate::speed_smoother::SpeedSmoother;

/// Consistent read-only view of the engine between fixes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub running: bool,
    pub phase: FlightPhase,
    pub alert_level: AlertLevel,
    pub status_message: String,
    pub smoothed_speed_kts: Option<f64>,
    pub current_zone: Option<String>,
    pub flight_id: Option<String>,
    pub history_len: usize,
    pub last_block_off: Option<DateTime<Utc>>,
    pub last_block_on: Option<DateTime<Utc>>,
    pub fixes_processed: u64,
    pub fixes_rejected: u64,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            running: false,
            phase: FlightPhase::OnGround,
            alert_level: AlertLevel::Normal,
            status_message: String::new(),
            smoothed_speed_kts: None,
            current_zone: None,
            flight_id: None,
            history_len: 0,
            last_block_off: None,
            last_block_on: None,
            fixes_processed: 0,
            fixes_rejected: 0,
        }
    }
}

/// Everything that happened while processing one accepted fix
#[derive(Debug, Clone)]
pub struct FixReport {
    pub smoothed_speed_kts: f64,
    pub anomalies: Vec<AnomalyEvent>,
    pub alert_level: AlertLevel,
    pub phase: PhaseUpdate,
    pub trigger: Option<TriggerEvent>,
    pub notification: Option<AlertNotification>,
    pub entered_zones: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum FixOutcome {
    Rejected(RejectReason),
    Processed(Box<FixReport>),
}

impl FixOutcome {
    pub fn report(&self) -> Option<&FixReport> {
        match self {
            FixOutcome::Processed(report) => Some(report.as_ref()),
            FixOutcome::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, FixOutcome::Rejected(_))
    }
}

#[derive(Debug)]
pub struct MonitoringEngine {
    config: MonitorConfig,
    zones: Arc<ZoneRegistry>,
    smoother: SpeedSmoother,
    detector: AnomalyDetector,
    aggregator: AlertAggregator,
    phase_machine: FlightPhaseMachine,
    bus: EventBus,
    running: bool,
    flight_id: Option<String>,
    fixes_processed: u64,
    fixes_rejected: u64,
}

impl MonitoringEngine {
    /// Build a stopped engine; call `start` before feeding fixes
    pub fn new(config: MonitorConfig, zones: Arc<ZoneRegistry>) -> Result<Self> {
        config.validate().context("Invalid monitor configuration")?;

        Ok(Self {
            smoother: SpeedSmoother::new(config.smoothing_window),
            detector: AnomalyDetector::new(DetectorThresholds::from(&config)),
            aggregator: AlertAggregator::new(
                config.history_capacity,
                config.minimum_alert_interval_seconds,
            ),
            phase_machine: FlightPhaseMachine::new(
                config.takeoff_speed_threshold,
                config.landing_speed_threshold,
                config.minimum_time_between_triggers,
                config.suppression_policy,
            ),
            bus: EventBus::new(),
            running: false,
            flight_id: None,
            fixes_processed: 0,
            fixes_rejected: 0,
            config,
            zones,
        })
    }

    /// Load the durable history from `store` and mirror future changes to it
    ///
    /// The writer runs on the current tokio runtime; outside one this fails,
    /// use `with_store_on` to pass a runtime explicitly. A store that fails to
    /// load is logged and the engine starts with an empty history.
    pub fn with_store(self, store: Arc<dyn AnomalyStore>) -> Result<Self> {
        let runtime = Handle::try_current()
            .context("The anomaly log writer needs a tokio runtime, use with_store_on")?;
        Ok(self.with_store_on(store, &runtime))
    }

    pub fn with_store_on(mut self, store: Arc<dyn AnomalyStore>, runtime: &Handle) -> Self {
        match store.load() {
            Ok(events) => self.aggregator.restore_history(events),
            Err(e) => warn!("Could not load anomaly log, starting empty: {:#}", e),
        }
        self.aggregator
            .set_persister(HistoryPersister::spawn_on(store, runtime));
        self
    }

    /// Detach the background writer so the caller can flush it
    pub fn take_persister(&mut self) -> Option<HistoryPersister> {
        self.aggregator.take_persister()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase_machine.phase()
    }

    pub fn alert_level(&self) -> AlertLevel {
        self.aggregator.current_level()
    }

    pub fn history(&self) -> Vec<AnomalyEvent> {
        self.aggregator.history().iter().cloned().collect()
    }

    pub fn summary(&self) -> AnomalySummary {
        self.aggregator.summary()
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        info!("Monitoring started in {}", self.phase_machine.phase());
    }

    /// Halt processing and clear transient state; the anomaly history is kept
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.smoother.reset();
        self.detector.reset();
        self.phase_machine.reset();
        self.aggregator.reset_level();
        info!("Monitoring stopped");
    }

    /// Validate and apply new settings between fixes
    pub fn update_config(&mut self, config: MonitorConfig) -> Result<()> {
        config
            .validate()
            .context("Rejected configuration change")?;

        self.smoother.resize(config.smoothing_window);
        self.detector.set_thresholds(DetectorThresholds::from(&config));
        self.aggregator.set_capacity(config.history_capacity);
        self.aggregator
            .set_notification_interval(config.minimum_alert_interval_seconds);
        self.phase_machine
            .set_thresholds(config.takeoff_speed_threshold, config.landing_speed_threshold);
        self.phase_machine.set_policy(config.suppression_policy);
        self.phase_machine
            .set_cooldown(config.minimum_time_between_triggers);
        self.config = config;
        info!("Monitor configuration updated");
        Ok(())
    }

    /// Flight identifier stamped on anomalies from now on
    pub fn set_flight_id(&mut self, flight_id: Option<String>) {
        self.flight_id = flight_id.filter(|f| !f.is_empty());
    }

    pub fn mark_reported(&mut self, id: Uuid) -> bool {
        self.aggregator.mark_reported(id)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            running: self.running,
            phase: self.phase_machine.phase(),
            alert_level: self.aggregator.current_level(),
            status_message: self.aggregator.status_message().to_string(),
            smoothed_speed_kts: self.smoother.current(),
            current_zone: self.detector.current_zone().map(str::to_string),
            flight_id: self.flight_id.clone(),
            history_len: self.aggregator.history().len(),
            last_block_off: self.phase_machine.cooldown().last_fired(TriggerType::Off),
            last_block_on: self.phase_machine.cooldown().last_fired(TriggerType::On),
            fixes_processed: self.fixes_processed,
            fixes_rejected: self.fixes_rejected,
        }
    }

    /// Process a fix against the system clock
    pub fn process_fix(&mut self, fix: PositionFix) -> FixOutcome {
        self.process_fix_at(fix, Utc::now())
    }

    /// Process a fix with `now` as the clock for skew checks, cooldowns and throttling
    pub fn process_fix_at(&mut self, fix: PositionFix, now: DateTime<Utc>) -> FixOutcome {
        if let Err(reason) = self.accept(&fix) {
            self.fixes_rejected += 1;
            debug!("Discarding fix at {}: {}", fix.timestamp, reason);
            metrics::counter!("skyguard.fixes_rejected_total", "reason" => reason.to_string())
                .increment(1);
            return FixOutcome::Rejected(reason);
        }

        let span = tracing::debug_span!("fix", timestamp = %fix.timestamp);
        let _entered = span.enter();

        let smoothed_speed_kts = self.smoother.update(fix.speed_knots());

        let detection = self
            .detector
            .detect(&fix, now, &self.zones, self.flight_id.as_deref());
        let zone_level = self.detector.occupied_level();

        let aggregate = self
            .aggregator
            .process(&detection.events, zone_level, now);

        let phase = self
            .phase_machine
            .update(smoothed_speed_kts, aggregate.level, fix.timestamp, now);

        for zone in &detection.entered_zones {
            self.bus
                .publish(EngineEvent::ZoneEntry(ZoneEntryNotification::from(zone)));
        }
        if let Some(notification) = &aggregate.notification {
            self.bus.publish(EngineEvent::Alert(notification.clone()));
        }
        if phase.changed() {
            self.bus.publish(EngineEvent::PhaseChanged {
                from: phase.previous,
                to: phase.phase,
                timestamp: fix.timestamp,
            });
        }

        let trigger = phase
            .fired
            .as_ref()
            .map(|firing| TriggerEvent::from_firing(firing, &aggregate.status_message));
        if let Some(trigger) = &trigger {
            metrics::counter!("skyguard.triggers_fired_total", "type" => trigger.time_type.as_str())
                .increment(1);
            self.bus.publish(EngineEvent::Trigger(trigger.clone()));
        }
        if let Some(suppressed) = phase.cooldown_suppressed {
            metrics::counter!("skyguard.triggers_suppressed_total", "type" => suppressed.as_str())
                .increment(1);
        }

        self.fixes_processed += 1;
        metrics::counter!("skyguard.fixes_processed_total").increment(1);

        FixOutcome::Processed(Box::new(FixReport {
            smoothed_speed_kts,
            anomalies: detection.events,
            alert_level: aggregate.level,
            phase,
            trigger,
            notification: aggregate.notification,
            entered_zones: detection.entered_zones.into_iter().map(|z| z.name).collect(),
        }))
    }

    fn accept(&self, fix: &PositionFix) -> Result<(), RejectReason> {
        if !self.running {
            return Err(RejectReason::NotRunning);
        }
        fix.validate()?;
        if self.config.reject_duplicate_fixes
            && let Some(previous) = self.detector.previous_fix()
            && fix.is_duplicate_of(previous)
        {
            return Err(RejectReason::Duplicate);
        }
        Ok(())
    }
}
