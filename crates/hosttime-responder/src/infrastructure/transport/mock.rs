//! Scripted in-memory transports for testing.
//!
//! Allows tests to play back device output line by line and to inspect what
//! the responder wrote, without a physical serial port.
//!
//! ```rust
//! use hosttime_responder::infrastructure::transport::mock::{MockDevice, MockTransportOpener};
//!
//! let device = MockDevice::new().line("GETTIME");
//! let opener = MockTransportOpener::new();
//! opener.add("/dev/ttyMOCK0", device.clone());
//! // ... run a session against `opener`, then:
//! assert!(device.written_text().is_empty());
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use hosttime_core::DeviceId;

use super::{
    DeviceEnumerator, EnumerationError, PortSettings, ReadOutcome, Transport, TransportError,
    TransportOpener,
};

/// One scripted result for a `read_line` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Return these raw bytes as a line.
    Line(Vec<u8>),
    /// Return [`ReadOutcome::Idle`].
    Idle,
    /// Fail the read with an I/O error of this kind.
    ReadError(std::io::ErrorKind),
}

#[derive(Default)]
struct DeviceState {
    script: Mutex<VecDeque<ScriptStep>>,
    written: Mutex<Vec<Vec<u8>>>,
    close_calls: AtomicUsize,
    open_count: AtomicUsize,
    fail_open: AtomicBool,
    fail_writes: AtomicBool,
    stay_open: AtomicBool,
}

/// A scripted device shared between the test and the transport it opens.
///
/// Cloning yields another handle to the same device.  When the script runs
/// out the next read fails with [`TransportError::Closed`] (the device was
/// unplugged), unless [`MockDevice::stay_open`] was set, in which case reads
/// keep returning [`ReadOutcome::Idle`].
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<DeviceState>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a text line; `\n` is added.
    pub fn line(self, text: &str) -> Self {
        self.push(ScriptStep::Line(format!("{text}\n").into_bytes()));
        self
    }

    /// Appends raw bytes returned verbatim by one read.
    pub fn raw(self, bytes: &[u8]) -> Self {
        self.push(ScriptStep::Line(bytes.to_vec()));
        self
    }

    /// Appends a read that times out with no data.
    pub fn idle(self) -> Self {
        self.push(ScriptStep::Idle);
        self
    }

    /// Appends a failing read.
    pub fn read_error(self, kind: std::io::ErrorKind) -> Self {
        self.push(ScriptStep::ReadError(kind));
        self
    }

    /// Makes every `open` of this device fail.
    pub fn fail_open(self) -> Self {
        self.state.fail_open.store(true, Ordering::SeqCst);
        self
    }

    /// Makes every write fail with `BrokenPipe`.
    pub fn fail_writes(self) -> Self {
        self.state.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Keeps the device attached after the script runs out.
    pub fn stay_open(self) -> Self {
        self.state.stay_open.store(true, Ordering::SeqCst);
        self
    }

    /// Feeds a line to a device that is already being read.
    pub fn push_line(&self, text: &str) {
        self.push(ScriptStep::Line(format!("{text}\n").into_bytes()));
    }

    /// Simulates an unplug: the next read after the queued steps fails.
    pub fn disconnect(&self) {
        self.state.stay_open.store(false, Ordering::SeqCst);
    }

    /// Every buffer written to the device, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.written.lock().expect("lock poisoned").clone()
    }

    /// Written buffers decoded as UTF-8 (lossily).
    pub fn written_text(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    /// Number of `close` calls across every transport opened on this device.
    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.state.open_count.load(Ordering::SeqCst)
    }

    fn push(&self, step: ScriptStep) {
        self.state
            .script
            .lock()
            .expect("lock poisoned")
            .push_back(step);
    }

    fn next_step(&self) -> Option<ScriptStep> {
        self.state.script.lock().expect("lock poisoned").pop_front()
    }
}

/// Transport returned by [`MockTransportOpener`].
pub struct MockTransport {
    device: MockDevice,
    closed: bool,
}

impl Transport for MockTransport {
    fn read_line(&mut self) -> Result<ReadOutcome, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.device.next_step() {
            Some(ScriptStep::Line(bytes)) => Ok(ReadOutcome::Line(bytes)),
            Some(ScriptStep::Idle) => Ok(ReadOutcome::Idle),
            Some(ScriptStep::ReadError(kind)) => Err(TransportError::Io(std::io::Error::new(
                kind,
                "scripted read failure",
            ))),
            None if self.device.state.stay_open.load(Ordering::SeqCst) => {
                // Stand in for the blocking read timeout.
                std::thread::sleep(std::time::Duration::from_millis(5));
                Ok(ReadOutcome::Idle)
            }
            None => Err(TransportError::Closed),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.device.state.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }
        self.device
            .state
            .written
            .lock()
            .expect("lock poisoned")
            .push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.device.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
    }
}

/// Opens [`MockDevice`]s registered by identifier.
#[derive(Default)]
pub struct MockTransportOpener {
    devices: Mutex<HashMap<DeviceId, MockDevice>>,
}

impl MockTransportOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the device behind `id`.
    pub fn add(&self, id: impl Into<DeviceId>, device: MockDevice) {
        self.devices
            .lock()
            .expect("lock poisoned")
            .insert(id.into(), device);
    }
}

impl TransportOpener for MockTransportOpener {
    fn open(
        &self,
        device: &DeviceId,
        _settings: &PortSettings,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let found = self
            .devices
            .lock()
            .expect("lock poisoned")
            .get(device)
            .cloned();
        match found {
            Some(mock) if !mock.state.fail_open.load(Ordering::SeqCst) => {
                mock.state.open_count.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockTransport {
                    device: mock,
                    closed: false,
                }))
            }
            Some(_) => Err(TransportError::OpenFailed {
                device: device.clone(),
                reason: "Device or resource busy".to_string(),
            }),
            None => Err(TransportError::OpenFailed {
                device: device.clone(),
                reason: "No such file or directory".to_string(),
            }),
        }
    }
}

/// Device list whose contents tests change between discovery ticks.
#[derive(Default)]
pub struct MockDeviceList {
    devices: Mutex<Vec<DeviceId>>,
    failures_pending: AtomicUsize,
    calls: AtomicUsize,
}

impl MockDeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the attached device list.
    pub fn set(&self, ids: &[&str]) {
        *self.devices.lock().expect("lock poisoned") =
            ids.iter().map(|s| DeviceId::from(*s)).collect();
    }

    /// Makes the next `count` enumerations fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Number of enumerations performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeviceEnumerator for MockDeviceList {
    fn enumerate(&self) -> Result<Vec<DeviceId>, EnumerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EnumerationError("scripted enumeration failure".to_string()));
        }
        Ok(self.devices.lock().expect("lock poisoned").clone())
    }
}
