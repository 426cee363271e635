//! Single-writer host for the monitoring engine
//!
//! Producers on any thread send commands through a bounded flume queue; one
//! tokio task owns the `MonitoringEngine` and applies them in arrival order.
//! Readers get a `watch` snapshot published after every command and can
//! subscribe to engine events without going through the queue.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::alert::AnomalyEvent;
use crate::alert_aggregator::AnomalySummary;
use crate::config::MonitorConfig;
use crate::engine::{EngineSnapshot, FixOutcome, MonitoringEngine};
use crate::events::{EventBus, SubscriberId, Subscription};
use crate::fixes::PositionFix;

pub const DEFAULT_QUEUE_SIZE: usize = 1_000;

enum Command {
    Fix {
        fix: Box<PositionFix>,
        now: Option<DateTime<Utc>>,
        reply: Option<oneshot::Sender<FixOutcome>>,
    },
    Start,
    Stop,
    UpdateConfig {
        config: Box<MonitorConfig>,
        reply: oneshot::Sender<Result<()>>,
    },
    SetFlight(Option<String>),
    MarkReported {
        id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    History {
        reply: oneshot::Sender<Vec<AnomalyEvent>>,
    },
    Summary {
        reply: oneshot::Sender<AnomalySummary>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle for feeding fixes and controlling a running service
#[derive(Clone)]
pub struct MonitorHandle {
    tx: flume::Sender<Command>,
    snapshot: watch::Receiver<EngineSnapshot>,
    bus: EventBus,
}

pub struct MonitorService {
    handle: MonitorHandle,
    task: JoinHandle<()>,
}

impl MonitorService {
    /// Move the engine onto its own task
    pub fn spawn(engine: MonitoringEngine, queue_size: usize) -> Self {
        let (tx, rx) = flume::bounded::<Command>(queue_size.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
        let bus = engine.bus().clone();

        let task = tokio::spawn(
            run(engine, rx, snapshot_tx).instrument(tracing::info_span!("monitor_service")),
        );

        Self {
            handle: MonitorHandle {
                tx,
                snapshot: snapshot_rx,
                bus,
            },
            task,
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Stop the engine, flush the anomaly log and wait for the task to exit
    pub async fn shutdown(self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        if self
            .handle
            .tx
            .send_async(Command::Shutdown { reply })
            .await
            .is_ok()
        {
            // The task may already be gone if every handle was dropped
            let _ = done.await;
        }
        self.task.await.context("Monitor service task failed")
    }
}

async fn run(
    mut engine: MonitoringEngine,
    rx: flume::Receiver<Command>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
) {
    info!("Monitor service started");

    while let Ok(command) = rx.recv_async().await {
        // Commands that reply publish before replying so callers see their own change
        match command {
            Command::Fix { fix, now, reply } => {
                let outcome = match now {
                    Some(now) => engine.process_fix_at(*fix, now),
                    None => engine.process_fix(*fix),
                };
                snapshot_tx.send_replace(engine.snapshot());
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Command::Start => {
                engine.start();
                snapshot_tx.send_replace(engine.snapshot());
            }
            Command::Stop => {
                engine.stop();
                snapshot_tx.send_replace(engine.snapshot());
            }
            Command::UpdateConfig { config, reply } => {
                let result = engine.update_config(*config);
                if let Err(e) = &result {
                    warn!("Configuration change rejected: {:#}", e);
                }
                snapshot_tx.send_replace(engine.snapshot());
                let _ = reply.send(result);
            }
            Command::SetFlight(flight_id) => {
                engine.set_flight_id(flight_id);
                snapshot_tx.send_replace(engine.snapshot());
            }
            Command::MarkReported { id, reply } => {
                let marked = engine.mark_reported(id);
                snapshot_tx.send_replace(engine.snapshot());
                let _ = reply.send(marked);
            }
            // Reads leave the snapshot as it is
            Command::History { reply } => {
                let _ = reply.send(engine.history());
            }
            Command::Summary { reply } => {
                let _ = reply.send(engine.summary());
            }
            Command::Shutdown { reply } => {
                close_engine(&mut engine).await;
                snapshot_tx.send_replace(engine.snapshot());
                let _ = reply.send(());
                info!("Monitor service shut down");
                return;
            }
        }

        metrics::gauge!("skyguard.service.queue_depth").set(rx.len() as f64);
    }

    debug!("All monitor handles dropped");
    close_engine(&mut engine).await;
    info!("Monitor service stopped");
}

async fn close_engine(engine: &mut MonitoringEngine) {
    engine.stop();
    if let Some(persister) = engine.take_persister() {
        persister.close().await;
    }
}

impl MonitorHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send_async(command)
            .await
            .map_err(|_| anyhow!("Monitor service is not running"))
    }

    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> Result<T> {
        self.send(command).await?;
        rx.await
            .map_err(|_| anyhow!("Monitor service stopped before replying"))
    }

    /// Queue a fix, waiting for room if the queue is full
    pub async fn submit(&self, fix: PositionFix) -> Result<()> {
        self.send(Command::Fix {
            fix: Box::new(fix),
            now: None,
            reply: None,
        })
        .await
    }

    /// Queue a fix without waiting; fails if the queue is full
    pub fn try_submit(&self, fix: PositionFix) -> Result<()> {
        match self.tx.try_send(Command::Fix {
            fix: Box::new(fix),
            now: None,
            reply: None,
        }) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(_)) => {
                metrics::counter!("skyguard.service.fixes_dropped_total").increment(1);
                Err(anyhow!("Monitor queue is full"))
            }
            Err(flume::TrySendError::Disconnected(_)) => {
                Err(anyhow!("Monitor service is not running"))
            }
        }
    }

    /// Process a fix and wait for the outcome
    pub async fn process(&self, fix: PositionFix) -> Result<FixOutcome> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Fix {
                fix: Box::new(fix),
                now: None,
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    /// Like `process`, with an explicit clock
    pub async fn process_at(&self, fix: PositionFix, now: DateTime<Utc>) -> Result<FixOutcome> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Fix {
                fix: Box::new(fix),
                now: Some(now),
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    pub async fn start(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn update_config(&self, config: MonitorConfig) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::UpdateConfig {
                config: Box::new(config),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn set_flight_id(&self, flight_id: Option<String>) -> Result<()> {
        self.send(Command::SetFlight(flight_id)).await
    }

    pub async fn mark_reported(&self, id: Uuid) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::MarkReported { id, reply }, rx).await
    }

    pub async fn history(&self) -> Result<Vec<AnomalyEvent>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::History { reply }, rx).await
    }

    pub async fn summary(&self) -> Result<AnomalySummary> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Summary { reply }, rx).await
    }

    /// State as of the last applied command
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn queue_depth(&self) -> usize {
        self.tx.len()
    }
}
