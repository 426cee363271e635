//! Typed engine output and its subscriber registry
//!
//! Each subscriber owns an unbounded flume receiver. Dropping the receiver or
//! calling `unsubscribe` removes the subscriber; dead senders are pruned on
//! the next publish.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::alert::AlertLevel;
use crate::alert_aggregator::AlertNotification;
use crate::flight_phase::{FlightPhase, TriggerFiring, TriggerType};
use crate::risk_zones::RiskZone;

/// Alert state attached to a logbook trigger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpoofingStatus {
    pub alert_level: AlertLevel,
    pub message: String,
}

/// Block off / block on time for the logbook
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    pub time_type: TriggerType,
    /// UTC time as `HH:MMZ`
    pub formatted_time: String,
    pub speed_kts: f64,
    pub timestamp: DateTime<Utc>,
    pub spoofing_status: SpoofingStatus,
}

impl TriggerEvent {
    pub fn from_firing(firing: &TriggerFiring, status_message: &str) -> Self {
        Self {
            time_type: firing.trigger,
            formatted_time: firing.timestamp.format("%H:%MZ").to_string(),
            speed_kts: firing.speed_kts,
            timestamp: firing.timestamp,
            spoofing_status: SpoofingStatus {
                alert_level: firing.alert_level,
                message: status_message.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneEntryNotification {
    pub zone_name: String,
    pub risk_level: AlertLevel,
    pub notes: String,
}

impl From<&RiskZone> for ZoneEntryNotification {
    fn from(zone: &RiskZone) -> Self {
        Self {
            zone_name: zone.name.clone(),
            risk_level: zone.risk_level,
            notes: zone.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    Trigger(TriggerEvent),
    Alert(AlertNotification),
    ZoneEntry(ZoneEntryNotification),
    PhaseChanged {
        from: FlightPhase,
        to: FlightPhase,
        timestamp: DateTime<Utc>,
    },
}

pub type SubscriberId = u64;

/// A live subscription; events arrive on `receiver`
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: flume::Receiver<EngineEvent>,
}

/// Cloneable handle to the subscriber registry
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<DashMap<SubscriberId, flume::Sender<EngineEvent>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::unbounded();
        self.subscribers.insert(id, tx);
        debug!("Subscriber {} registered", id);
        Subscription { id, receiver: rx }
    }

    /// Returns false if the id was not subscribed
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!("Subscriber {} removed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver an event to every live subscriber
    pub fn publish(&self, event: EngineEvent) {
        trace!("Publishing {:?}", event);
        self.subscribers
            .retain(|id, tx| match tx.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    debug!("Subscriber {} disconnected, pruning", id);
                    false
                }
            });
    }
}
