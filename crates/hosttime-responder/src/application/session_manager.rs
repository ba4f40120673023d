//! SessionManager: the Tracked Set of running device sessions.
//!
//! The manager is the only owner of the mapping from [`DeviceId`] to running
//! session.  It is mutated through three operations:
//!
//! - [`SessionManager::start`] – adds a device and launches its session on a
//!   dedicated thread, unless the device is already tracked.
//! - [`SessionManager::reap_finished`] – removes every device whose session
//!   has signalled that it ended.
//! - [`SessionManager::shutdown`] – raises the stop flag and reaps sessions
//!   as they release their ports.
//!
//! # Termination signal
//!
//! Each session thread holds the sending half of a `oneshot` channel and
//! sends its [`SessionReport`] after the transport has been released.  The
//! manager keeps the receiving half next to the thread's `JoinHandle`, so
//! reaping checks an explicit signal rather than polling thread liveness.  A
//! thread that panics drops the sender, which also counts as finished.
//!
//! # Locking
//!
//! All Tracked Set reads and writes take one `std::sync::Mutex`.  `start`
//! checks and inserts under a single acquisition, so two concurrent `start`s
//! for the same device launch exactly one session.  No lock is held while a
//! session does I/O; threads are joined only after being removed from the map.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use hosttime_core::{Clock, DeviceId, SessionId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::device_session::{DeviceSession, SessionEvent, SessionReport, SessionSettings};
use crate::infrastructure::transport::TransportOpener;

/// How often `shutdown` re-checks for finished sessions.
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// Error type for session management.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The OS refused to create the session thread.
    #[error("failed to spawn session thread for {device}: {source}")]
    Spawn {
        device: DeviceId,
        #[source]
        source: std::io::Error,
    },
}

/// Result of [`SessionManager::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was launched.
    Started(SessionId),
    /// The device already has a session that has not been reaped; nothing
    /// was done.
    AlreadyTracked,
}

/// A session removed from the Tracked Set.
#[derive(Debug, Clone)]
pub struct Reaped {
    pub device_id: DeviceId,
    pub session_id: SessionId,
    /// `None` if the session thread died without reporting.
    pub report: Option<SessionReport>,
}

struct SessionHandle {
    session_id: SessionId,
    thread: JoinHandle<()>,
    done: oneshot::Receiver<SessionReport>,
}

/// Supervises one session thread per attached device.
pub struct SessionManager {
    tracked: Mutex<HashMap<DeviceId, SessionHandle>>,
    opener: Arc<dyn TransportOpener>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    stop: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    /// Creates a manager and returns it together with the session event receiver.
    pub fn new(
        opener: Arc<dyn TransportOpener>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mgr = Self {
            tracked: Mutex::new(HashMap::new()),
            opener,
            clock,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
            event_tx,
        };
        (mgr, event_rx)
    }

    /// Starts a session for `device_id` unless one is already tracked.
    ///
    /// Never blocks on device I/O: the port is opened on the new session's
    /// own thread.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spawn`] if the session thread cannot be
    /// created; the device is then left untracked.
    pub fn start(&self, device_id: &DeviceId) -> Result<StartOutcome, SessionError> {
        let mut tracked = self.lock();
        if tracked.contains_key(device_id) {
            return Ok(StartOutcome::AlreadyTracked);
        }

        let session = DeviceSession::new(device_id.clone(), Arc::clone(&self.clock), self.settings)
            .with_events(self.event_tx.clone());
        let session_id = session.session_id();

        let (done_tx, done_rx) = oneshot::channel();
        let opener = Arc::clone(&self.opener);
        let stop = Arc::clone(&self.stop);
        let events = self.event_tx.clone();

        let thread = std::thread::Builder::new()
            .name(format!("hosttime-session-{device_id}"))
            .spawn(move || {
                let report = session.run(opener.as_ref(), &stop);
                // Signal the manager first so a reap triggered by the
                // `Closed` event always finds the session finished.
                let _ = done_tx.send(report.clone());
                let _ = events.send(SessionEvent::Closed(report));
            })
            .map_err(|source| SessionError::Spawn {
                device: device_id.clone(),
                source,
            })?;

        tracked.insert(
            device_id.clone(),
            SessionHandle {
                session_id,
                thread,
                done: done_rx,
            },
        );
        debug!("tracking {device_id} (session {session_id})");
        Ok(StartOutcome::Started(session_id))
    }

    /// Removes every session that has ended and returns what was removed.
    ///
    /// Sessions still running are left untouched.
    pub fn reap_finished(&self) -> Vec<Reaped> {
        let finished: Vec<(DeviceId, SessionHandle, Option<SessionReport>)> = {
            let mut tracked = self.lock();

            let mut ended = Vec::new();
            for (device_id, handle) in tracked.iter_mut() {
                match handle.done.try_recv() {
                    Ok(report) => ended.push((device_id.clone(), Some(report))),
                    Err(oneshot::error::TryRecvError::Closed) => {
                        ended.push((device_id.clone(), None));
                    }
                    Err(oneshot::error::TryRecvError::Empty) => {}
                }
            }

            ended
                .into_iter()
                .filter_map(|(device_id, report)| {
                    tracked
                        .remove(&device_id)
                        .map(|handle| (device_id, handle, report))
                })
                .collect()
        };

        finished
            .into_iter()
            .map(|(device_id, handle, report)| {
                if handle.thread.join().is_err() {
                    error!("session thread for {device_id} panicked");
                }
                match &report {
                    Some(r) => debug!(
                        "reaped {device_id} (session {}, synced={}): {}",
                        r.session_id, r.synced, r.reason
                    ),
                    None => warn!("reaped {device_id} without a session report"),
                }
                Reaped {
                    device_id,
                    session_id: handle.session_id,
                    report,
                }
            })
            .collect()
    }

    /// Returns `true` while `device_id` has a session that has not been reaped.
    pub fn is_tracked(&self, device_id: &DeviceId) -> bool {
        self.lock().contains_key(device_id)
    }

    /// Returns a sorted snapshot of the tracked device identifiers.
    pub fn tracked_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stops every session and waits up to `grace` for them to release their
    /// ports.
    ///
    /// Sessions notice the stop flag after their current read returns, so
    /// `grace` should exceed the read timeout.  Sessions still running when
    /// `grace` expires stay tracked and are logged.
    pub fn shutdown(&self, grace: Duration) -> Vec<Reaped> {
        self.stop.store(true, Ordering::SeqCst);
        info!("stopping {} session(s)", self.len());

        let deadline = Instant::now() + grace;
        let mut reaped = self.reap_finished();
        while !self.is_empty() && Instant::now() < deadline {
            std::thread::sleep(SHUTDOWN_POLL);
            reaped.extend(self.reap_finished());
        }

        if !self.is_empty() {
            warn!(
                "{} session(s) still running after {grace:?}: {:?}",
                self.len(),
                self.tracked_devices()
            );
        }
        reaped
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeviceId, SessionHandle>> {
        // A poisoned map is still consistent: every mutation is a single
        // insert or remove.
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Best-effort port release at process teardown.
        self.stop.store(true, Ordering::SeqCst);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
