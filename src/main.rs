use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use skyguard::anomaly_log::{self, AnomalyStore, JsonFileStore};
use skyguard::config::{self, MonitorConfig};
use skyguard::events::{EngineEvent, Subscription};
use skyguard::log_format::TargetFirstFormat;
use skyguard::service::DEFAULT_QUEUE_SIZE;
use skyguard::{
    Coordinate, FixOutcome, MonitorService, MonitoringEngine, PositionFix, ZoneRegistry,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "skyguard",
    version,
    about = "GPS spoofing detection and automatic block time logging"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed recorded position fixes through the monitor
    Replay {
        /// CSV file with one fix per row
        input: PathBuf,
        /// TOML config (default: $SKYGUARD_CONFIG or ./skyguard.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// JSON anomaly log to load and keep up to date
        #[arg(long)]
        log: Option<PathBuf>,
        /// Write the anomaly history as a text report when done
        #[arg(long)]
        export: Option<PathBuf>,
        /// Flight identifier stamped on detected anomalies
        #[arg(long)]
        flight: Option<String>,
        /// Print Prometheus metrics after the replay
        #[arg(long, default_value_t = false)]
        print_metrics: bool,
    },
    /// Known interference zones along a direct route
    Briefing {
        /// Departure as LAT,LON
        #[arg(long, allow_hyphen_values = true)]
        from: Coordinate,
        /// Arrival as LAT,LON
        #[arg(long, allow_hyphen_values = true)]
        to: Coordinate,
    },
    /// List the known interference zones
    Zones,
    /// Convert the JSON anomaly log to a text report
    ExportLog {
        #[arg(long)]
        log: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Write a config file with the default thresholds
    InitConfig {
        #[arg(long)]
        out: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skyguard=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(TargetFirstFormat::new().with_ansi(std::io::stderr().is_terminal()))
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::load(&path),
        None => {
            let path = config::config_path();
            if path.exists() {
                MonitorConfig::load(&path)
            } else {
                debug!("No config at {:?}, using defaults", path);
                Ok(MonitorConfig::default())
            }
        }
    }
}

fn read_fixes(path: &Path) -> Result<Vec<PositionFix>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut fixes = Vec::new();
    for (row, record) in reader.deserialize::<PositionFix>().enumerate() {
        // Row 1 is the header
        let fix = record.with_context(|| format!("Bad fix on row {} of {:?}", row + 2, path))?;
        fixes.push(fix);
    }
    Ok(fixes)
}

fn print_events(subscription: &Subscription) {
    for event in subscription.receiver.try_iter() {
        match event {
            EngineEvent::Trigger(trigger) => println!(
                "{} BLOCK {} at {:.0} kt ({})",
                trigger.formatted_time,
                trigger.time_type.as_str(),
                trigger.speed_kts,
                trigger.spoofing_status.message
            ),
            EngineEvent::Alert(alert) => println!(
                "ALERT [{}] {} anomalies, primary {}: {}",
                alert.alert_level,
                alert.anomaly_count,
                alert.primary_anomaly_type.display_name(),
                alert.details
            ),
            EngineEvent::ZoneEntry(zone) => println!(
                "ZONE  entered {} [{}] {}",
                zone.zone_name, zone.risk_level, zone.notes
            ),
            EngineEvent::PhaseChanged { from, to, timestamp } => {
                println!("PHASE {} -> {} at {}", from, to, timestamp.format("%H:%M:%SZ"))
            }
        }
    }
}

async fn replay(
    input: PathBuf,
    config: Option<PathBuf>,
    log: Option<PathBuf>,
    export: Option<PathBuf>,
    flight: Option<String>,
    print_metrics: bool,
) -> Result<()> {
    if print_metrics {
        skyguard::metrics::init_metrics()?;
    }

    let config = load_config(config)?;
    let fixes = read_fixes(&input)?;
    info!("Replaying {} fixes from {:?}", fixes.len(), input);

    let mut engine = MonitoringEngine::new(config, Arc::new(ZoneRegistry::with_default_zones()))?;
    if let Some(log) = &log {
        let store: Arc<dyn AnomalyStore> = Arc::new(JsonFileStore::new(log));
        engine = engine.with_store(store)?;
    }

    let service = MonitorService::spawn(engine, DEFAULT_QUEUE_SIZE);
    let handle = service.handle();
    let subscription = handle.subscribe();

    handle.set_flight_id(flight).await?;
    handle.start().await?;

    let mut rejected = 0usize;
    for fix in fixes {
        // Recorded fixes are judged against their own timestamps
        let now = fix.timestamp;
        if let FixOutcome::Rejected(reason) = handle.process_at(fix, now).await? {
            rejected += 1;
            debug!("Fix rejected: {}", reason);
        }
        print_events(&subscription);
    }

    let snapshot = handle.snapshot();
    let history = handle.history().await?;
    let summary = handle.summary().await?;
    service.shutdown().await?;

    println!();
    println!(
        "Processed {} fixes, rejected {}",
        snapshot.fixes_processed, rejected
    );
    println!("Final phase: {}", snapshot.phase);
    println!(
        "Alert level: {} ({})",
        snapshot.alert_level, snapshot.status_message
    );
    if let Some(off) = snapshot.last_block_off {
        println!("Block off: {}", off.format("%H:%MZ"));
    }
    if let Some(on) = snapshot.last_block_on {
        println!("Block on:  {}", on.format("%H:%MZ"));
    }
    println!(
        "Anomalies: {} total, {} unreported",
        summary.total, summary.unreported
    );

    if let Some(export) = export {
        anomaly_log::export_to_file(&history, &export)?;
        info!("Wrote {} anomalies to {:?}", history.len(), export);
    }

    if print_metrics && let Some(rendered) = skyguard::metrics::render() {
        println!();
        print!("{}", rendered);
    }

    Ok(())
}

fn briefing(from: Coordinate, to: Coordinate) {
    let zones = ZoneRegistry::with_default_zones();
    print!("{}", zones.route_briefing(&from, &to));
}

fn list_zones() {
    let zones = ZoneRegistry::with_default_zones();
    for zone in zones.zones() {
        println!(
            "{:<24} {:<20} {:>18} {:>4.0} nm  [{}]",
            zone.name,
            zone.region,
            zone.center.to_string(),
            zone.radius_nm,
            zone.risk_level
        );
    }
}

fn export_log(log: &Path, out: &Path) -> Result<()> {
    if !log.exists() {
        bail!("Anomaly log {:?} does not exist", log);
    }
    let events = JsonFileStore::new(log).load()?;
    anomaly_log::export_to_file(&events, out)?;
    info!(
        "Exported {} anomalies to {:?} at {}",
        events.len(),
        out,
        Utc::now().format("%H:%MZ")
    );
    Ok(())
}

fn init_config(out: Option<PathBuf>, force: bool) -> Result<()> {
    let path = out.unwrap_or_else(config::config_path);
    if path.exists() && !force {
        bail!("{:?} already exists, pass --force to overwrite", path);
    }
    MonitorConfig::default().save(&path)?;
    info!("Wrote default configuration to {:?}", path);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Ignoring unreadable .env file: {}", e);
    }
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Replay {
            input,
            config,
            log,
            export,
            flight,
            print_metrics,
        } => replay(input, config, log, export, flight, print_metrics).await,
        Commands::Briefing { from, to } => {
            briefing(from, to);
            Ok(())
        }
        Commands::Zones => {
            list_zones();
            Ok(())
        }
        Commands::ExportLog { log, out } => export_log(&log, &out),
        Commands::InitConfig { out, force } => init_config(out, force),
    }
    .inspect_err(|e| warn!("{:#}", e))
}
