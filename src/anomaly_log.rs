//! Durable anomaly log
//!
//! The rolling history is mirrored to an `AnomalyStore` off the fix path: the
//! aggregator hands snapshots to a `HistoryPersister`, whose background task
//! writes them inside `spawn_blocking`. Write failures are logged and counted,
//! never surfaced to fix processing.
//!
//! The plain-text report produced by `export_text` is parsed back by
//! `import_text` field-for-field.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::alert::{AnomalyEvent, LocationSnapshot};

/// Pending snapshots held before the oldest is evicted
const PERSIST_QUEUE_SIZE: usize = 8;

const RECORD_HEADER: &str = "[anomaly]";

/// Backing storage for the anomaly history
pub trait AnomalyStore: Send + Sync {
    fn load(&self) -> Result<Vec<AnomalyEvent>>;
    fn save(&self, events: &[AnomalyEvent]) -> Result<()>;
}

/// JSON file store, written atomically through a temp file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AnomalyStore for JsonFileStore {
    fn load(&self) -> Result<Vec<AnomalyEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        let events: Vec<AnomalyEvent> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {:?}", self.path))?;
        Ok(events)
    }

    fn save(&self, events: &[AnomalyEvent]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let contents =
            serde_json::to_string_pretty(events).context("Failed to serialize anomaly log")?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, self.path))?;
        Ok(())
    }
}

/// In-memory store for tests and hosts without durable storage
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<Vec<AnomalyEvent>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<AnomalyEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|s| *s).unwrap_or(0)
    }
}

impl AnomalyStore for MemoryStore {
    fn load(&self) -> Result<Vec<AnomalyEvent>> {
        Ok(self.snapshot())
    }

    fn save(&self, events: &[AnomalyEvent]) -> Result<()> {
        let mut stored = self
            .events
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        *stored = events.to_vec();
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

/// Hands history snapshots to a background writer task
pub struct HistoryPersister {
    tx: flume::Sender<Vec<AnomalyEvent>>,
    // Used to evict the oldest pending snapshot when the writer is behind
    pending: flume::Receiver<Vec<AnomalyEvent>>,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for HistoryPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryPersister")
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl HistoryPersister {
    /// Spawn the writer task on the current tokio runtime
    ///
    /// Panics outside a runtime; use `spawn_on` with an explicit handle otherwise.
    pub fn spawn(store: Arc<dyn AnomalyStore>) -> Self {
        Self::spawn_on(store, &Handle::current())
    }

    /// Spawn the writer task on `runtime`
    pub fn spawn_on(store: Arc<dyn AnomalyStore>, runtime: &Handle) -> Self {
        let (tx, rx) = flume::bounded::<Vec<AnomalyEvent>>(PERSIST_QUEUE_SIZE);
        let pending = rx.clone();

        let handle = runtime.spawn(async move {
            debug!("Anomaly log writer started");
            while let Ok(mut snapshot) = rx.recv_async().await {
                // Only the newest snapshot matters
                while let Ok(newer) = rx.try_recv() {
                    snapshot = newer;
                }

                let store = Arc::clone(&store);
                let count = snapshot.len();
                let start = std::time::Instant::now();
                match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
                    Ok(Ok(())) => {
                        debug!("Persisted {} anomaly events", count);
                        metrics::histogram!("skyguard.anomaly_log.save_ms")
                            .record(start.elapsed().as_micros() as f64 / 1000.0);
                    }
                    Ok(Err(e)) => {
                        error!("Failed to persist anomaly log: {:#}", e);
                        metrics::counter!("skyguard.anomaly_log.save_failures_total")
                            .increment(1);
                    }
                    Err(e) => {
                        error!("Anomaly log writer panicked: {}", e);
                        metrics::counter!("skyguard.anomaly_log.save_failures_total")
                            .increment(1);
                    }
                }
            }
            debug!("Anomaly log writer stopped");
        });

        Self {
            tx,
            pending,
            handle,
        }
    }

    /// Queue a snapshot without waiting
    ///
    /// Each snapshot is the full history, so when the writer is behind the
    /// oldest pending snapshot is evicted and the newest always gets queued.
    pub fn persist(&self, snapshot: Vec<AnomalyEvent>) {
        let mut snapshot = snapshot;
        loop {
            match self.tx.try_send(snapshot) {
                Ok(()) => return,
                Err(flume::TrySendError::Full(rejected)) => {
                    if self.pending.try_recv().is_ok() {
                        debug!("Anomaly log writer is behind, superseding oldest snapshot");
                        metrics::counter!("skyguard.anomaly_log.snapshots_superseded_total")
                            .increment(1);
                    }
                    snapshot = rejected;
                }
                Err(flume::TrySendError::Disconnected(_)) => {
                    error!("Anomaly log writer is gone, event kept in memory only");
                    metrics::counter!("skyguard.anomaly_log.save_failures_total").increment(1);
                    return;
                }
            }
        }
    }

    /// Flush queued snapshots and stop the writer
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!("Anomaly log writer failed to stop cleanly: {}", e);
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => bail!("invalid escape sequence '\\{}'", other),
            None => bail!("dangling escape at end of value"),
        }
    }
    Ok(out)
}

/// Render the history as a plain-text report, newest first
pub fn export_text(events: &[AnomalyEvent], exported_at: DateTime<Utc>) -> String {
    let mut sorted: Vec<&AnomalyEvent> = events.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut out = String::new();
    out.push_str("# skyguard anomaly log\n");
    out.push_str(&format!(
        "# exported_at = {}\n",
        exported_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    ));
    out.push_str(&format!("# records = {}\n", sorted.len()));

    for event in sorted {
        out.push('\n');
        out.push_str(RECORD_HEADER);
        out.push('\n');
        out.push_str(&format!("id = {}\n", event.id));
        out.push_str(&format!(
            "timestamp = {}\n",
            event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
        ));
        out.push_str(&format!("type = {}\n", event.anomaly_type));
        out.push_str(&format!("level = {}\n", event.alert_level));
        out.push_str(&format!("latitude = {}\n", event.location.latitude));
        out.push_str(&format!("longitude = {}\n", event.location.longitude));
        out.push_str(&format!("altitude = {}\n", event.location.altitude));
        out.push_str(&format!("accuracy = {}\n", event.location.accuracy));
        out.push_str(&format!("speed = {}\n", event.location.speed));
        out.push_str(&format!("course = {}\n", event.location.course));
        out.push_str(&format!(
            "flight = {}\n",
            escape(event.flight_id.as_deref().unwrap_or(""))
        ));
        out.push_str(&format!("reported = {}\n", event.reported));
        out.push_str(&format!("details = {}\n", escape(&event.details)));
    }
    out
}

/// Fields collected for one record while parsing
#[derive(Default)]
struct PartialRecord {
    id: Option<Uuid>,
    timestamp: Option<DateTime<Utc>>,
    anomaly_type: Option<crate::alert::AnomalyType>,
    alert_level: Option<crate::alert::AlertLevel>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
    accuracy: Option<f64>,
    speed: Option<f64>,
    course: Option<f64>,
    flight_id: Option<Option<String>>,
    reported: Option<bool>,
    details: Option<String>,
}

impl PartialRecord {
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "id" => self.id = Some(value.parse().context("invalid id")?),
            "timestamp" => {
                self.timestamp = Some(
                    DateTime::parse_from_rfc3339(value)
                        .context("invalid timestamp")?
                        .with_timezone(&Utc),
                )
            }
            "type" => self.anomaly_type = Some(value.parse()?),
            "level" => self.alert_level = Some(value.parse()?),
            "latitude" => self.latitude = Some(value.parse().context("invalid latitude")?),
            "longitude" => self.longitude = Some(value.parse().context("invalid longitude")?),
            "altitude" => self.altitude = Some(value.parse().context("invalid altitude")?),
            "accuracy" => self.accuracy = Some(value.parse().context("invalid accuracy")?),
            "speed" => self.speed = Some(value.parse().context("invalid speed")?),
            "course" => self.course = Some(value.parse().context("invalid course")?),
            "flight" => {
                let flight = unescape(value)?;
                self.flight_id = Some((!flight.is_empty()).then_some(flight));
            }
            "reported" => self.reported = Some(value.parse().context("invalid reported flag")?),
            "details" => self.details = Some(unescape(value)?),
            other => bail!("unknown field '{}'", other),
        }
        Ok(())
    }

    fn finish(self) -> Result<AnomalyEvent> {
        fn required<T>(value: Option<T>, name: &str) -> Result<T> {
            value.ok_or_else(|| anyhow::anyhow!("record is missing '{}'", name))
        }

        Ok(AnomalyEvent {
            id: required(self.id, "id")?,
            timestamp: required(self.timestamp, "timestamp")?,
            location: LocationSnapshot {
                latitude: required(self.latitude, "latitude")?,
                longitude: required(self.longitude, "longitude")?,
                altitude: required(self.altitude, "altitude")?,
                accuracy: required(self.accuracy, "accuracy")?,
                speed: required(self.speed, "speed")?,
                course: required(self.course, "course")?,
            },
            anomaly_type: required(self.anomaly_type, "type")?,
            alert_level: required(self.alert_level, "level")?,
            details: required(self.details, "details")?,
            flight_id: required(self.flight_id, "flight")?,
            reported: required(self.reported, "reported")?,
        })
    }
}

/// Parse a report produced by `export_text`
pub fn import_text(text: &str) -> Result<Vec<AnomalyEvent>> {
    let mut events = Vec::new();
    let mut current: Option<PartialRecord> = None;

    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        if line.trim() == RECORD_HEADER {
            if let Some(record) = current.take() {
                events.push(
                    record
                        .finish()
                        .with_context(|| format!("record ending before line {}", line_number))?,
                );
            }
            current = Some(PartialRecord::default());
            continue;
        }

        let Some(record) = current.as_mut() else {
            bail!("line {}: field outside of an {} block", line_number, RECORD_HEADER);
        };
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("line {}: expected 'key = value'", line_number))?;
        let value = value.strip_prefix(' ').unwrap_or(value);
        record
            .set(key.trim(), value)
            .with_context(|| format!("line {}", line_number))?;
    }

    if let Some(record) = current.take() {
        events.push(record.finish().context("last record")?);
    }

    Ok(events)
}

/// Write the text report for `events` to `path`
pub fn export_to_file(events: &[AnomalyEvent], path: &Path) -> Result<()> {
    let text = export_text(events, Utc::now());
    std::fs::write(path, text).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Exported {} anomaly events to {:?}", events.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertLevel, AnomalyType};
    use crate::fixes::test_support::fix_at;
    use chrono::Duration;

    fn sample_events() -> Vec<AnomalyEvent> {
        let t0 = Utc::now();
        let mut fix = fix_at(33.123456789, -117.5, 420.0, t0);
        fix.altitude = 10_668.25;
        fix.horizontal_accuracy = 150.5;
        let mut a = AnomalyEvent::new(
            &fix,
            AnomalyType::PoorAccuracy,
            AlertLevel::Warning,
            "Horizontal accuracy 151 m exceeds 100 m".to_string(),
            Some("DAL123".to_string()),
        );
        a.reported = true;

        let fix = fix_at(34.0, 35.0, 0.0, t0 + Duration::seconds(5));
        let b = AnomalyEvent::new(
            &fix,
            AnomalyType::KnownSpoofingZone,
            AlertLevel::Alert,
            "Multi-line\ndetails with a \\ backslash = and equals".to_string(),
            None,
        );
        vec![a, b]
    }

    #[test]
    fn test_text_round_trip() {
        let events = sample_events();
        let text = export_text(&events, Utc::now());
        let mut parsed = import_text(&text).unwrap();
        parsed.sort_by_key(|e| e.timestamp);
        assert_eq!(parsed, events);
    }

    #[test]
    fn test_export_newest_first() {
        let events = sample_events();
        let text = export_text(&events, Utc::now());
        let first = text.find(&events[1].id.to_string()).unwrap();
        let second = text.find(&events[0].id.to_string()).unwrap();
        assert!(first < second);
        assert!(text.contains("# records = 2"));
    }

    #[test]
    fn test_import_rejects_missing_field() {
        let text = "[anomaly]\nid = 6f1c1f8e-4a5e-4a39-9d7e-0d6a9b7b1f10\n";
        assert!(import_text(text).is_err());
    }

    #[test]
    fn test_import_rejects_orphan_field() {
        assert!(import_text("type = poorAccuracy\n").is_err());
    }

    #[test]
    fn test_import_empty_report() {
        let text = export_text(&[], Utc::now());
        assert!(import_text(&text).unwrap().is_empty());
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("anomalies.json"));
        assert!(store.load().unwrap().is_empty());

        let events = sample_events();
        store.save(&events).unwrap();
        assert_eq!(store.load().unwrap(), events);
    }

    #[test]
    fn test_json_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anomalies.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(JsonFileStore::new(&path).load().is_err());
    }

    #[tokio::test]
    async fn test_persister_writes_latest_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let persister = HistoryPersister::spawn(store.clone());
        let events = sample_events();
        persister.persist(events[..1].to_vec());
        persister.persist(events.clone());
        persister.close().await;

        assert_eq!(store.snapshot(), events);
        assert!(store.save_count() >= 1);
    }

    /// Store whose writes take long enough for the queue to fill up
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryStore,
    }

    impl AnomalyStore for SlowStore {
        fn load(&self) -> Result<Vec<AnomalyEvent>> {
            self.inner.load()
        }

        fn save(&self, events: &[AnomalyEvent]) -> Result<()> {
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.inner.save(events)
        }
    }

    fn growing_history(len: usize) -> Vec<AnomalyEvent> {
        let t0 = Utc::now();
        (0..len)
            .map(|i| {
                let fix = fix_at(10.0, 0.001 * i as f64, 120.0, t0 + Duration::seconds(i as i64));
                AnomalyEvent::new(
                    &fix,
                    AnomalyType::SuddenPositionJump,
                    AlertLevel::Warning,
                    format!("jump {}", i),
                    None,
                )
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_store_ends_with_newest_snapshot() {
        let store = Arc::new(SlowStore::default());
        let persister = HistoryPersister::spawn(store.clone());
        let history = growing_history(20);

        for len in 1..=history.len() {
            persister.persist(history[..len].to_vec());
            tokio::task::yield_now().await;
        }
        persister.close().await;

        assert_eq!(store.inner.snapshot().len(), 20);
        assert_eq!(store.inner.snapshot(), history);
    }

    #[test]
    fn test_spawn_on_explicit_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let persister = HistoryPersister::spawn_on(store.clone(), runtime.handle());
        let events = sample_events();
        persister.persist(events.clone());
        runtime.block_on(persister.close());
        assert_eq!(store.snapshot(), events);
    }

    struct FailingStore;

    impl AnomalyStore for FailingStore {
        fn load(&self) -> Result<Vec<AnomalyEvent>> {
            Ok(Vec::new())
        }

        fn save(&self, _events: &[AnomalyEvent]) -> Result<()> {
            bail!("disk full")
        }
    }

    #[tokio::test]
    async fn test_persister_survives_store_failure() {
        let persister = HistoryPersister::spawn(Arc::new(FailingStore));
        persister.persist(sample_events());
        persister.persist(sample_events());
        // Writer keeps running and shuts down cleanly
        persister.close().await;
    }
}
