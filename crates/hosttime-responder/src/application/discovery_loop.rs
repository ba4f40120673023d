//! DiscoveryLoop: periodic device enumeration.
//!
//! Every tick the loop:
//!
//! 1. Asks the [`DeviceEnumerator`] which devices are attached.
//! 2. Calls [`SessionManager::start`] for each of them; devices that already
//!    have a session are skipped by the manager.
//! 3. Calls [`SessionManager::reap_finished`] so devices whose session ended
//!    become eligible for a new one on a later tick.
//!
//! A failed enumeration counts as "no devices this tick"; the loop never
//! exits on an error and never waits for a session to finish.
//!
//! # Shutdown
//!
//! The loop runs on a dedicated thread while the shared `running` flag is set.
//! The poll interval is slept in short slices so clearing the flag stops the
//! loop promptly instead of after a full interval.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use hosttime_core::DeviceId;
use tracing::{error, info, warn};

use super::session_manager::{SessionManager, StartOutcome};
use crate::infrastructure::transport::DeviceEnumerator;

/// Default time between two enumerations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Longest single sleep while waiting for the next tick.
const RUNNING_CHECK_SLICE: Duration = Duration::from_millis(100);

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Number of devices the enumerator reported.
    pub observed: usize,
    /// Devices for which a new session was launched.
    pub started: Vec<DeviceId>,
    /// Devices removed from the Tracked Set.
    pub reaped: Vec<DeviceId>,
    pub enumeration_failed: bool,
}

/// Feeds newly attached devices to the [`SessionManager`].
pub struct DiscoveryLoop {
    enumerator: Arc<dyn DeviceEnumerator>,
    manager: Arc<SessionManager>,
    interval: Duration,
}

impl DiscoveryLoop {
    pub fn new(
        enumerator: Arc<dyn DeviceEnumerator>,
        manager: Arc<SessionManager>,
        interval: Duration,
    ) -> Self {
        Self {
            enumerator,
            manager,
            interval,
        }
    }

    /// Runs one enumerate / start / reap pass.
    pub fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        let devices = match self.enumerator.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("{e}; retrying in {:?}", self.interval);
                summary.enumeration_failed = true;
                Vec::new()
            }
        };
        summary.observed = devices.len();

        for device in devices {
            match self.manager.start(&device) {
                Ok(StartOutcome::Started(session_id)) => {
                    info!("new device {device} (session {session_id})");
                    summary.started.push(device);
                }
                Ok(StartOutcome::AlreadyTracked) => {}
                Err(e) => error!("{e}"),
            }
        }

        summary.reaped = self
            .manager
            .reap_finished()
            .into_iter()
            .map(|r| r.device_id)
            .collect();

        summary
    }

    /// Ticks until `running` is cleared.
    pub fn run(&self, running: &AtomicBool) {
        info!("discovery loop started (every {:?})", self.interval);

        while running.load(Ordering::Relaxed) {
            self.tick();
            self.sleep_while_running(running);
        }

        info!("discovery loop stopped");
    }

    /// Moves the loop onto its own thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(self, running: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("hosttime-discovery".to_string())
            .spawn(move || self.run(&running))
    }

    fn sleep_while_running(&self, running: &AtomicBool) {
        let deadline = Instant::now() + self.interval;
        loop {
            let now = Instant::now();
            if now >= deadline || !running.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep((deadline - now).min(RUNNING_CHECK_SLICE));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
