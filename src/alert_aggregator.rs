//! Collapses each fix's anomalies into one current alert level
//!
//! Published state (level, status message, history) updates on every fix.
//! Only the outward `warning`/`alert` notifications are rate limited.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};
use uuid::Uuid;

use crate::alert::{AlertLevel, AnomalyEvent, AnomalyType};
use crate::anomaly_log::HistoryPersister;
use crate::flight_phase::seconds_to_duration;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

const NORMAL_STATUS: &str = "GPS signal normal";

/// User-facing alert pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertNotification {
    pub alert_level: AlertLevel,
    pub anomaly_count: usize,
    pub primary_anomaly_type: AnomalyType,
    pub details: String,
}

/// Outcome of aggregating one fix
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub level: AlertLevel,
    pub status_message: String,
    pub notification: Option<AlertNotification>,
    /// Notification that was due but held back by the rate limit
    pub throttled: bool,
}

/// Counts over the current history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnomalySummary {
    pub total: usize,
    pub unreported: usize,
    pub by_type: HashMap<AnomalyType, usize>,
    pub by_level: HashMap<AlertLevel, usize>,
}

#[derive(Debug)]
pub struct AlertAggregator {
    current_level: AlertLevel,
    status_message: String,
    history: VecDeque<AnomalyEvent>,
    seen: HashSet<Uuid>,
    capacity: usize,
    min_notification_interval: Duration,
    last_notification: Option<DateTime<Utc>>,
    persister: Option<HistoryPersister>,
}

impl AlertAggregator {
    pub fn new(capacity: usize, min_notification_interval_seconds: f64) -> Self {
        Self {
            current_level: AlertLevel::Normal,
            status_message: NORMAL_STATUS.to_string(),
            history: VecDeque::with_capacity(capacity),
            seen: HashSet::new(),
            capacity: capacity.max(1),
            min_notification_interval: seconds_to_duration(min_notification_interval_seconds),
            last_notification: None,
            persister: None,
        }
    }

    /// Mirror the history to durable storage after every change
    pub fn set_persister(&mut self, persister: HistoryPersister) {
        self.persister = Some(persister);
    }

    pub fn take_persister(&mut self) -> Option<HistoryPersister> {
        self.persister.take()
    }

    pub fn current_level(&self) -> AlertLevel {
        self.current_level
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// Events oldest first
    pub fn history(&self) -> &VecDeque<AnomalyEvent> {
        &self.history
    }

    pub fn last_notification(&self) -> Option<DateTime<Utc>> {
        self.last_notification
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict_overflow();
    }

    pub fn set_notification_interval(&mut self, seconds: f64) {
        self.min_notification_interval = seconds_to_duration(seconds);
    }

    /// Seed the history from durable storage, keeping the newest `capacity` events
    pub fn restore_history(&mut self, mut events: Vec<AnomalyEvent>) {
        events.sort_by_key(|e| e.timestamp);
        for event in events {
            if self.seen.insert(event.id) {
                self.history.push_back(event);
            }
        }
        self.evict_overflow();
        info!("Restored {} anomaly events", self.history.len());
    }

    /// Back to `normal` without touching the history
    pub fn reset_level(&mut self) {
        self.current_level = AlertLevel::Normal;
        self.status_message = NORMAL_STATUS.to_string();
    }

    /// Aggregate the anomalies detected on one fix
    ///
    /// `zone_level` is the risk level of the occupied zone, if any; a fix with
    /// no anomalies settles on it instead of `normal`.
    pub fn process(
        &mut self,
        events: &[AnomalyEvent],
        zone_level: Option<AlertLevel>,
        now: DateTime<Utc>,
    ) -> Aggregate {
        let mut aggregate = Aggregate {
            level: self.current_level,
            status_message: self.status_message.clone(),
            notification: None,
            throttled: false,
        };

        // First event at the highest level
        let Some(primary) = events
            .iter()
            .reduce(|best, e| if e.alert_level > best.alert_level { e } else { best })
        else {
            match zone_level {
                Some(level) if self.current_level != level => {
                    debug!("No anomalies on this fix, alert level back to zone level {}", level);
                    self.current_level = level;
                    self.status_message = AnomalyType::KnownSpoofingZone.display_name().to_string();
                }
                Some(_) => {}
                None if self.current_level != AlertLevel::Normal => {
                    debug!("No anomalies on this fix, alert level back to normal");
                    self.reset_level();
                }
                None => {}
            }
            aggregate.level = self.current_level;
            aggregate.status_message = self.status_message.clone();
            metrics::gauge!("skyguard.alert_level").set(self.current_level.as_gauge());
            return aggregate;
        };

        let level = primary.alert_level;

        self.current_level = level;
        self.status_message = events
            .iter()
            .map(|e| e.anomaly_type.display_name())
            .collect::<Vec<_>>()
            .join(", ");
        aggregate.level = level;
        aggregate.status_message = self.status_message.clone();
        metrics::gauge!("skyguard.alert_level").set(level.as_gauge());

        let mut appended = false;
        for event in events {
            if self.seen.insert(event.id) {
                self.history.push_back(event.clone());
                appended = true;
            }
        }
        self.evict_overflow();
        if appended {
            self.persist();
        }

        if level >= AlertLevel::Warning {
            let due = match self.last_notification {
                Some(last) => now.signed_duration_since(last) >= self.min_notification_interval,
                None => true,
            };
            if due {
                self.last_notification = Some(now);
                aggregate.notification = Some(AlertNotification {
                    alert_level: level,
                    anomaly_count: events.len(),
                    primary_anomaly_type: primary.anomaly_type,
                    details: primary.details.clone(),
                });
                metrics::counter!("skyguard.notifications_sent_total").increment(1);
            } else {
                debug!("Alert notification throttled ({})", level);
                aggregate.throttled = true;
                metrics::counter!("skyguard.notifications_throttled_total").increment(1);
            }
        }

        aggregate
    }

    /// Flag an event as reported; the only change allowed after creation
    pub fn mark_reported(&mut self, id: Uuid) -> bool {
        let Some(event) = self.history.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        if event.reported {
            return true;
        }
        event.reported = true;
        self.persist();
        true
    }

    pub fn summary(&self) -> AnomalySummary {
        let mut summary = AnomalySummary {
            total: self.history.len(),
            ..Default::default()
        };
        for event in &self.history {
            *summary.by_type.entry(event.anomaly_type).or_default() += 1;
            *summary.by_level.entry(event.alert_level).or_default() += 1;
            if !event.reported {
                summary.unreported += 1;
            }
        }
        summary
    }

    fn evict_overflow(&mut self) {
        while self.history.len() > self.capacity {
            if let Some(evicted) = self.history.pop_front() {
                self.seen.remove(&evicted.id);
            }
        }
    }

    fn persist(&self) {
        if let Some(persister) = &self.persister {
            persister.persist(self.history.iter().cloned().collect());
        }
    }
}
