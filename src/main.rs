//! # Family Tracker
//!
//! Tracking agent: arms the capture schedule from the remote configuration
//! and keeps it running until interrupted.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load the TOML configuration (first argument, `FAMILY_TRACKER_CONFIG`
//!      or `config/tracker.toml`)
//!    - Set up logging and restore the operational log window
//!    - Connect the store backend and the device providers
//!
//! 2. **Main Loop**
//!    - Start tracking: one capture now plus the periodic schedule
//!    - On `SIGHUP`, re-read the remote configuration and reinstall the schedule
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Graceful Shutdown**
//!    - Cancel every schedule and wait for running captures to stop

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use family_tracker::capture::CaptureWorker;
use family_tracker::clock::SystemClock;
use family_tracker::config::{
    BatterySourceKind, Config, LocationSourceKind, LoggingConfig, StoreBackend,
};
use family_tracker::log_window::{self, LogWindow};
use family_tracker::scheduler::Scheduler;
use family_tracker::sensors::device::{
    FixedBattery, FixedPosition, LoggedActivity, StaticIdentity, StaticPermissions, SysfsBattery,
};
use family_tracker::sensors::gpsd::GpsdPosition;
use family_tracker::sensors::{
    BatterySource, IdentityProvider, LocationAcquirer, Position, PositionSource,
};
use family_tracker::service::TrackerService;
use family_tracker::store::file::FileStore;
use family_tracker::store::memory::MemoryStore;
use family_tracker::store::sheets::SheetsStore;
use family_tracker::store::PartitionedLog;
use family_tracker::telemetry::TelemetryClient;
use family_tracker::tracking::ConfigClient;

const DEFAULT_CONFIG_PATH: &str = "config/tracker.toml";
const CONFIG_ENV: &str = "FAMILY_TRACKER_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path();
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let _log_guard = init_logging(&config.logging)?;
    info!("Family Tracker v{} starting...", env!("CARGO_PKG_VERSION"));

    let clock = Arc::new(SystemClock);
    let log = log_window::install(LogWindow::load(config.window_file(), clock.clone()));
    log.record("Tracker started");

    let store = build_store(&config).await?;
    let config_range = config.config_range()?;
    let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity::new(config.identity()));

    let worker = Arc::new(CaptureWorker {
        identity: identity.clone(),
        permissions: Arc::new(StaticPermissions {
            fine_location: config.device.location_permission,
        }),
        battery: build_battery(&config),
        acquirer: LocationAcquirer::new(build_position_source(&config), config.location_timeout()),
        config: ConfigClient::new(store.clone(), &config.store.config_partition, config_range),
        telemetry: TelemetryClient::new(
            store.clone(),
            config.store.max_rows_per_partition,
            &config.store.config_partition,
        ),
        activity: Arc::new(LoggedActivity::default()),
        clock,
        log: log.clone(),
    });

    let scheduler = Arc::new(Scheduler::new());
    let service = TrackerService::new(
        ConfigClient::new(store, &config.store.config_partition, config_range),
        identity,
        scheduler.clone(),
        worker,
        &config.schedule.job_name,
        log.clone(),
    );

    // Outcome is already logged either way
    let _ = if config.schedule.run_on_start {
        service.start().await
    } else {
        service.reconfigure().await
    };

    info!("Press Ctrl+C to exit");
    let mut hangup = Hangup::new()?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading tracking configuration");
                let _ = service.reconfigure().await;
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    log.record("Tracker stopped");
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

/// Stdout logging, plus a daily rolling file when a log directory is set.
/// The returned guard must live until exit so buffered lines get flushed.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("Invalid log level {:?}", logging.level))?,
    };
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "family-tracker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.init();
            Ok(None)
        }
    }
}

async fn build_store(config: &Config) -> Result<Arc<dyn PartitionedLog>> {
    let store: Arc<dyn PartitionedLog> = match config.store.backend {
        StoreBackend::Sheets => {
            let token = std::env::var(&config.store.access_token_env).with_context(|| {
                format!("Access token variable {} is not set", config.store.access_token_env)
            })?;
            info!("Using spreadsheet {}", config.store.spreadsheet_id);
            Arc::new(SheetsStore::new(
                &config.store.api_base,
                &config.store.spreadsheet_id,
                &token,
                config.request_timeout(),
            )?)
        }
        StoreBackend::File => Arc::new(FileStore::open(&config.store.data_dir).await?),
        StoreBackend::Memory => {
            warn!("Using in-memory store; nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

fn build_battery(config: &Config) -> Arc<dyn BatterySource> {
    match config.device.battery_source {
        BatterySourceKind::Sysfs => Arc::new(SysfsBattery::new(&config.device.power_supply_dir)),
        BatterySourceKind::Fixed => Arc::new(FixedBattery(config.device.fixed_battery_percent)),
    }
}

fn build_position_source(config: &Config) -> Arc<dyn PositionSource> {
    match config.location.source {
        LocationSourceKind::Gpsd => Arc::new(GpsdPosition::new(&config.location.gpsd_addr)),
        LocationSourceKind::Fixed => Arc::new(FixedPosition(Position {
            latitude: config.location.latitude,
            longitude: config.location.longitude,
        })),
    }
}

/// Reload signal. Never fires on platforms without `SIGHUP`.
struct Hangup {
    #[cfg(unix)]
    signal: tokio::signal::unix::Signal,
}

impl Hangup {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            signal: signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if self.signal.recv().await.is_none() {
            std::future::pending::<()>().await
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}
