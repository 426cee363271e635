//! SkyGuard - GPS spoofing detection and automatic block-time logging
//!
//! Position fixes from a device location provider flow through one pipeline:
//! speed smoothing, anomaly detection against thresholds and known
//! interference zones, alert aggregation, and a flight phase machine that
//! emits block off / block on triggers for the logbook.

pub mod alert;
pub mod alert_aggregator;
pub mod anomaly_detector;
pub mod anomaly_log;
pub mod config;
pub mod engine;
pub mod events;
pub mod fixes;
pub mod flight_phase;
pub mod geometry;
pub mod log_format;
pub mod metrics;
pub mod risk_zones;
pub mod service;
pub mod speed_smoother;

pub use alert::{AlertLevel, AnomalyEvent, AnomalyType, LocationSnapshot};
pub use alert_aggregator::{AlertAggregator, AlertNotification, AnomalySummary};
pub use anomaly_detector::AnomalyDetector;
pub use anomaly_log::{AnomalyStore, HistoryPersister, JsonFileStore, MemoryStore};
pub use config::MonitorConfig;
pub use engine::{EngineSnapshot, FixOutcome, FixReport, MonitoringEngine};
pub use events::{EngineEvent, EventBus, Subscription, TriggerEvent, ZoneEntryNotification};
pub use fixes::{PositionFix, RejectReason};
pub use flight_phase::{FlightPhase, FlightPhaseMachine, SuppressionPolicy, TriggerType};
pub use geometry::Coordinate;
pub use risk_zones::{RiskZone, ZoneRegistry};
pub use service::{MonitorHandle, MonitorService};
pub use speed_smoother::SpeedSmoother;
