//! Integration tests for discovery, session management and the line protocol.
//!
//! # Purpose
//!
//! These tests drive the public API the way `main.rs` does: a
//! [`DiscoveryLoop`] over a scripted device list feeds a [`SessionManager`],
//! whose sessions talk to scripted in-memory devices.  They verify:
//!
//! - Protocol behaviour: `GETTIME` is answered once, `RTC:` counts as a
//!   request, chatter is never answered.
//! - Lifecycle: a failed read releases the port exactly once and the device is
//!   picked up again on a later tick.
//! - Isolation: devices found in the same tick run independent sessions, and
//!   one device failing leaves the others untouched.
//!
//! # Waiting for sessions
//!
//! Sessions run on their own threads.  Tests wait on the manager's event
//! channel with `blocking_recv` until the expected `Closed` events arrive,
//! so no test depends on sleeps for correctness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use hosttime_core::{DeviceId, FixedClock, HostTimeReply};
use hosttime_responder::application::{
    device_session::{CloseReason, SessionEvent, SessionReport, SessionSettings},
    discovery_loop::DiscoveryLoop,
    session_manager::{SessionManager, StartOutcome},
};
use hosttime_responder::infrastructure::transport::mock::{
    MockDevice, MockDeviceList, MockTransportOpener,
};
use tokio::sync::mpsc::UnboundedReceiver;

const NEW_YEAR_REPLY: &str = "HOSTTIME 2024-01-01 00:00:00\n";

struct Harness {
    opener: Arc<MockTransportOpener>,
    devices: Arc<MockDeviceList>,
    manager: Arc<SessionManager>,
    events: UnboundedReceiver<SessionEvent>,
    discovery: DiscoveryLoop,
}

fn harness() -> Harness {
    let opener = Arc::new(MockTransportOpener::new());
    let devices = Arc::new(MockDeviceList::new());
    let clock = FixedClock(
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
    );
    let (manager, events) = SessionManager::new(
        opener.clone(),
        Arc::new(clock),
        SessionSettings::default(),
    );
    let manager = Arc::new(manager);
    let discovery = DiscoveryLoop::new(
        devices.clone(),
        Arc::clone(&manager),
        Duration::from_millis(50),
    );
    Harness {
        opener,
        devices,
        manager,
        events,
        discovery,
    }
}

impl Harness {
    /// Blocks until `count` sessions have reported `Closed`, keyed by device.
    fn wait_closed(&mut self, count: usize) -> HashMap<String, SessionReport> {
        let mut closed = HashMap::new();
        while closed.len() < count {
            match self.events.blocking_recv() {
                Some(SessionEvent::Closed(report)) => {
                    closed.insert(report.device_id.to_string(), report);
                }
                Some(_) => {}
                None => panic!("event channel closed early"),
            }
        }
        closed
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// `GETTIME` is answered with the host time and the session
/// ends up synced.
#[test]
fn test_gettime_gets_one_hosttime_reply() {
    let mut h = harness();
    let device = MockDevice::new().line("GETTIME");
    h.opener.add("/dev/ttyACM0", device.clone());
    h.devices.set(&["/dev/ttyACM0"]);

    h.discovery.tick();
    let closed = h.wait_closed(1);

    assert_eq!(device.written_text(), vec![NEW_YEAR_REPLY]);
    assert!(closed["/dev/ttyACM0"].synced);
}

/// An `RTC:` status line triggers the reply; the `GETTIME`
/// that follows in the same session does not.
#[test]
fn test_rtc_line_triggers_and_later_gettime_is_ignored() {
    let mut h = harness();
    let device = MockDevice::new().line("RTC: 2023-01-01").line("GETTIME");
    h.opener.add("/dev/ttyACM0", device.clone());
    h.devices.set(&["/dev/ttyACM0"]);

    h.discovery.tick();
    let closed = h.wait_closed(1);

    assert_eq!(device.written_text(), vec![NEW_YEAR_REPLY]);
    assert_eq!(closed["/dev/ttyACM0"].lines_received, 2);
}

/// Chatter is observed but never answered.
#[test]
fn test_non_trigger_line_gets_no_reply() {
    let mut h = harness();
    let device = MockDevice::new().line("hello");
    h.opener.add("/dev/ttyACM0", device.clone());
    h.devices.set(&["/dev/ttyACM0"]);

    h.discovery.tick();
    let closed = h.wait_closed(1);

    let report = &closed["/dev/ttyACM0"];
    assert!(device.written().is_empty());
    assert!(!report.synced);
    assert_eq!(report.lines_received, 1);
}

/// Every reply the device sees passes the reply parser.
#[test]
fn test_reply_is_accepted_by_device_side_parser() {
    let mut h = harness();
    let device = MockDevice::new().line("GETTIME");
    h.opener.add("COM5", device.clone());
    h.devices.set(&["COM5"]);

    h.discovery.tick();
    h.wait_closed(1);

    let written = device.written_text();
    let reply = HostTimeReply::parse(&written[0]).expect("device must accept reply");
    assert_eq!(reply.to_string(), NEW_YEAR_REPLY.trim_end());
}

/// At most one reply per session, whatever mix of requests the device sends.
#[test]
fn test_at_most_one_reply_for_repeated_requests() {
    let mut h = harness();
    let device = MockDevice::new()
        .line("boot")
        .line("GETTIME")
        .line("GETTIME")
        .line("RTC: 2024-01-01 00:00:00")
        .idle()
        .line("RTC: 2024-01-01 00:00:01")
        .line("GETTIME");
    h.opener.add("COM5", device.clone());
    h.devices.set(&["COM5"]);

    h.discovery.tick();
    let closed = h.wait_closed(1);

    assert_eq!(device.written().len(), 1);
    assert_eq!(closed["COM5"].lines_received, 6);
}

/// A read failure closes the session, releases the port once,
/// and the device is picked up again by a later tick.
#[test]
fn test_read_failure_releases_port_once_and_device_is_rediscovered() {
    // Arrange
    let mut h = harness();
    let device = MockDevice::new()
        .line("GETTIME")
        .read_error(std::io::ErrorKind::BrokenPipe);
    h.opener.add("/dev/ttyUSB0", device.clone());
    h.devices.set(&["/dev/ttyUSB0"]);
    let id = DeviceId::new("/dev/ttyUSB0");

    // Act: first session fails
    h.discovery.tick();
    let closed = h.wait_closed(1);

    // Assert
    assert!(matches!(closed["/dev/ttyUSB0"].reason, CloseReason::ReadFailed(_)));
    assert_eq!(device.close_calls(), 1);

    // Act: the next tick reaps, the one after restarts
    let reap_tick = h.discovery.tick();
    assert_eq!(reap_tick.reaped, vec![id.clone()]);
    assert!(!h.manager.is_tracked(&id));

    device.push_line("GETTIME");
    let restart_tick = h.discovery.tick();
    h.wait_closed(1);

    // Assert: a fresh session answered again
    assert_eq!(restart_tick.started, vec![id]);
    assert_eq!(device.open_count(), 2);
    assert_eq!(device.close_calls(), 2);
    assert_eq!(device.written().len(), 2, "each session may reply once");
}

/// Two devices in one tick get two independent sessions.
#[test]
fn test_two_devices_in_one_tick_sync_independently() {
    // Arrange
    let mut h = harness();
    let asking = MockDevice::new().line("GETTIME");
    let quiet = MockDevice::new().line("hello").line("still booting");
    h.opener.add("COM1", asking.clone());
    h.opener.add("COM2", quiet.clone());
    h.devices.set(&["COM1", "COM2"]);

    // Act
    let tick = h.discovery.tick();
    let closed = h.wait_closed(2);

    // Assert
    assert_eq!(tick.started.len(), 2);
    assert!(closed["COM1"].synced);
    assert!(!closed["COM2"].synced);
    assert_eq!(asking.written().len(), 1);
    assert!(quiet.written().is_empty());
}

/// A failing device never disturbs a session running on another device.
#[test]
fn test_failure_on_one_device_leaves_other_session_running() {
    // Arrange
    let mut h = harness();
    let healthy = MockDevice::new().line("GETTIME").stay_open();
    let broken = MockDevice::new().fail_writes().line("GETTIME");
    h.opener.add("COM1", healthy.clone());
    h.opener.add("COM2", broken.clone());
    h.devices.set(&["COM1", "COM2"]);

    // Act
    h.discovery.tick();
    let closed = h.wait_closed(1);
    eventually("COM1 reply", || healthy.written().len() == 1);
    h.discovery.tick();

    // Assert: only COM2 ended, COM1 is still tracked and synced
    assert!(matches!(closed["COM2"].reason, CloseReason::WriteFailed(_)));
    assert!(!closed["COM2"].synced);
    assert!(h.manager.is_tracked(&DeviceId::new("COM1")));
    assert!(!h.manager.is_tracked(&DeviceId::new("COM2")));
    assert_eq!(healthy.written().len(), 1);

    // A later request to the healthy device is still not re-answered.
    healthy.push_line("GETTIME");
    healthy.disconnect();
    let closed = h.wait_closed(1);
    assert!(closed["COM1"].synced);
    assert_eq!(closed["COM1"].lines_received, 2);
    assert_eq!(healthy.written().len(), 1);
}

/// Calling `start` twice for a live device yields one session.
#[test]
fn test_idempotent_start_yields_single_session() {
    let h = harness();
    let device = MockDevice::new().stay_open();
    h.opener.add("COM3", device.clone());
    let id = DeviceId::new("COM3");

    let first = h.manager.start(&id).expect("start");
    let second = h.manager.start(&id).expect("start");

    assert!(matches!(first, StartOutcome::Started(_)));
    assert_eq!(second, StartOutcome::AlreadyTracked);
    assert_eq!(h.manager.len(), 1);

    eventually("COM3 open", || device.open_count() == 1);
    h.manager.shutdown(Duration::from_secs(2));
    assert_eq!(device.open_count(), 1);
    assert_eq!(device.close_calls(), 1);
}

/// A failed enumeration is skipped and the next tick proceeds normally.
#[test]
fn test_enumeration_failure_is_retried_next_tick() {
    let mut h = harness();
    let device = MockDevice::new().line("GETTIME");
    h.opener.add("COM4", device.clone());
    h.devices.set(&["COM4"]);
    h.devices.fail_next(1);

    let failed = h.discovery.tick();
    let ok = h.discovery.tick();
    h.wait_closed(1);

    assert!(failed.enumeration_failed);
    assert!(failed.started.is_empty());
    assert_eq!(ok.started, vec![DeviceId::new("COM4")]);
    assert_eq!(device.written().len(), 1);
}

/// A port that cannot be opened ends quietly and is retried after reaping.
#[test]
fn test_busy_port_is_reaped_and_retried() {
    let mut h = harness();
    h.opener.add("COM6", MockDevice::new().fail_open());
    h.devices.set(&["COM6"]);

    h.discovery.tick();
    let closed = h.wait_closed(1);
    let reap = h.discovery.tick();

    assert!(matches!(closed["COM6"].reason, CloseReason::OpenFailed(_)));
    assert_eq!(reap.reaped, vec![DeviceId::new("COM6")]);

    // Port becomes free: the retry opens it.
    let device = MockDevice::new().line("GETTIME");
    h.opener.add("COM6", device.clone());
    h.discovery.tick();
    h.wait_closed(1);
    assert_eq!(device.written_text(), vec![NEW_YEAR_REPLY]);
}
