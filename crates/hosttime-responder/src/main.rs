//! HostTime responder entry point.
//!
//! Wires the serial adapters into the application layer and runs until
//! Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()              -- TOML, defaults written on first run
//!  └─ SessionManager::new()      -- Tracked Set + session event channel
//!  └─ start services
//!       ├─ DiscoveryLoop         (dedicated thread, polls serial ports)
//!       │    └─ DeviceSession    (one thread per attached port)
//!       └─ session event pump    (Tokio task, logs sync progress)
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use hosttime_core::SystemClock;
use hosttime_responder::application::{
    device_session::{SessionEvent, SessionSettings},
    discovery_loop::DiscoveryLoop,
    session_manager::SessionManager,
};
use hosttime_responder::infrastructure::{
    storage::config::{config_file_path, load_config, save_config, AppConfig},
    transport::serial::{SerialEnumerator, SerialOpener},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The log level comes from the config, so load it before logging exists
    // and report any problem right after.
    let (config, config_error) = match load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.responder.log_level)),
        )
        .init();

    info!("HostTime responder starting");
    match config_error {
        Some(e) => warn!("using default configuration: {e}"),
        // First run: leave a template next to where the config is looked up.
        None if config_file_path().is_ok_and(|p| !p.exists()) => match save_config(&config) {
            Ok(path) => info!("wrote default configuration to {}", path.display()),
            Err(e) => warn!("could not write default configuration: {e}"),
        },
        None => {}
    }

    let settings = SessionSettings {
        port: config.port_settings(),
        idle_backoff: config.idle_backoff(),
    };
    let (manager, mut events) =
        SessionManager::new(Arc::new(SerialOpener), Arc::new(SystemClock), settings);
    let manager = Arc::new(manager);

    // Shutdown flag for the discovery thread.
    let running = Arc::new(AtomicBool::new(true));

    // ── Discovery loop ────────────────────────────────────────────────────────
    let enumerator = SerialEnumerator::new(config.discovery.ignored_ports.clone());
    let discovery_thread = DiscoveryLoop::new(
        Arc::new(enumerator),
        Arc::clone(&manager),
        config.poll_interval(),
    )
    .spawn(Arc::clone(&running))
    .context("failed to start discovery thread")?;

    // ── Session event pump ────────────────────────────────────────────────────
    tokio::spawn(async move {
        let mut synced_devices = 0usize;
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Synced { device_id, .. } => {
                    synced_devices += 1;
                    info!("{device_id} synced ({synced_devices} sync(s) since start)");
                }
                SessionEvent::Closed(report) => debug!(
                    "session {} on {} ended after {} line(s): {}",
                    report.session_id, report.device_id, report.lines_received, report.reason
                ),
                SessionEvent::Opened { .. } | SessionEvent::LineReceived { .. } => {}
            }
        }
    });

    info!(
        "watching serial ports every {:?} at {} baud.  Press Ctrl-C to exit.",
        config.poll_interval(),
        config.serial.baud_rate
    );

    // ── Ctrl-C / shutdown ─────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");
    running.store(false, Ordering::Relaxed);

    let grace = config.shutdown_grace();
    let reaped = tokio::task::spawn_blocking(move || {
        if discovery_thread.join().is_err() {
            error!("discovery thread panicked");
        }
        manager.shutdown(grace)
    })
    .await?;

    info!("HostTime responder stopped ({} session(s) closed)", reaped.len());
    Ok(())
}
