//! Serial port adapters built on the `serialport` crate.
//!
//! - [`SerialEnumerator`] lists ports via `serialport::available_ports()`.
//! - [`SerialOpener`] opens a port at the configured baud rate with a read
//!   timeout, wrapping it in a [`SerialTransport`].
//!
//! # Read timeout semantics
//!
//! The port is opened with a finite timeout, so `read_line` never blocks for
//! longer than that.  A timeout with nothing buffered is reported as
//! [`ReadOutcome::Idle`]; a timeout after part of a line arrived returns the
//! partial line, so a device that never prints `\n` is still observed.
//! A zero-byte read means the port went away and is reported as
//! [`TransportError::Closed`].

use std::io::{BufRead, BufReader, Write};

use hosttime_core::DeviceId;
use serialport::SerialPort;
use tracing::debug;

use super::{
    is_timeout_error, DeviceEnumerator, EnumerationError, PortSettings, ReadOutcome, Transport,
    TransportError, TransportOpener,
};

/// Lists attached serial ports, minus the configured ignore list.
#[derive(Debug, Clone, Default)]
pub struct SerialEnumerator {
    ignored_ports: Vec<String>,
}

impl SerialEnumerator {
    pub fn new(ignored_ports: Vec<String>) -> Self {
        Self { ignored_ports }
    }
}

impl DeviceEnumerator for SerialEnumerator {
    fn enumerate(&self) -> Result<Vec<DeviceId>, EnumerationError> {
        let ports = serialport::available_ports().map_err(|e| EnumerationError(e.to_string()))?;
        Ok(filter_ports(
            ports.into_iter().map(|p| p.port_name),
            &self.ignored_ports,
        ))
    }
}

/// Drops ignored names and duplicates, returning identifiers in sorted order.
fn filter_ports(names: impl IntoIterator<Item = String>, ignored: &[String]) -> Vec<DeviceId> {
    let mut ids: Vec<DeviceId> = names
        .into_iter()
        .filter(|name| !ignored.iter().any(|i| i == name))
        .map(DeviceId::from)
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Opens real serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl TransportOpener for SerialOpener {
    fn open(
        &self,
        device: &DeviceId,
        settings: &PortSettings,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let port = serialport::new(device.as_str(), settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| TransportError::OpenFailed {
                device: device.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(SerialTransport::new(device.clone(), port)))
    }
}

/// An open serial port.
pub struct SerialTransport {
    device: DeviceId,
    // `None` once closed.
    reader: Option<BufReader<Box<dyn SerialPort>>>,
}

impl SerialTransport {
    pub fn new(device: DeviceId, port: Box<dyn SerialPort>) -> Self {
        Self {
            device,
            reader: Some(BufReader::new(port)),
        }
    }
}

impl Transport for SerialTransport {
    fn read_line(&mut self) -> Result<ReadOutcome, TransportError> {
        let reader = self.reader.as_mut().ok_or(TransportError::Closed)?;
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => Err(TransportError::Closed),
            Ok(_) => Ok(ReadOutcome::Line(line)),
            Err(e) if is_timeout_error(&e) => {
                if line.is_empty() {
                    Ok(ReadOutcome::Idle)
                } else {
                    Ok(ReadOutcome::Line(line))
                }
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let reader = self.reader.as_mut().ok_or(TransportError::Closed)?;
        let port = reader.get_mut();
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("serial port {} released", self.device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_ports_keeps_everything_without_ignore_list() {
        let ids = filter_ports(names(&["/dev/ttyUSB0", "/dev/ttyACM0"]), &[]);
        assert_eq!(
            ids,
            vec![DeviceId::new("/dev/ttyACM0"), DeviceId::new("/dev/ttyUSB0")]
        );
    }

    #[test]
    fn test_filter_ports_drops_ignored_ports() {
        let ignored = names(&["/dev/ttyS0"]);
        let ids = filter_ports(names(&["/dev/ttyS0", "/dev/ttyUSB0"]), &ignored);
        assert_eq!(ids, vec![DeviceId::new("/dev/ttyUSB0")]);
    }

    #[test]
    fn test_filter_ports_removes_duplicates() {
        let ids = filter_ports(names(&["COM3", "COM3", "COM4"]), &[]);
        assert_eq!(ids, vec![DeviceId::new("COM3"), DeviceId::new("COM4")]);
    }

    #[test]
    fn test_serial_opener_reports_open_failure_for_missing_port() {
        // Arrange
        let device = DeviceId::new("/nonexistent/hosttime-test-port");

        // Act
        let result = SerialOpener.open(&device, &PortSettings::default());

        // Assert
        match result {
            Err(TransportError::OpenFailed { device: failed, .. }) => assert_eq!(failed, device),
            Err(other) => panic!("expected OpenFailed, got {other}"),
            Ok(_) => panic!("opening a missing port must fail"),
        }
    }
}
