//! In-memory simulated arm controller.
//!
//! [`MockSerialDevice`] stands in for the microcontroller at the far end of the
//! cable.  Opening it behaves like the real board resetting on open: the boot
//! banner shows up in the read stream.  Each frame the host writes is recorded
//! and, unless the device was built with [`MockSerialDevice::quiet`],
//! acknowledged with an `OK J <joint> <angle>` line.
//!
//! Fault switches let tests reproduce what the field produces: a port held by
//! another program, failing writes, transient read errors and a yanked cable.
//!
//! [`MockPortBackend`] maps port names to devices and doubles as a port
//! enumerator, so the whole panel can run with `--simulate`.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arm_core::decode_frame;

use super::{PortBackend, PortIo};
use crate::infrastructure::ports::{PortDescriptor, PortDiscoveryError, PortEnumerator};

/// Line the simulated board prints after every reset.
pub const BOOT_BANNER: &str = "ARM READY";

#[derive(Debug, Default)]
struct DeviceState {
    to_host: VecDeque<u8>,
    inbox: Vec<u8>,
    frames: Vec<String>,
    handles: usize,
    opens: usize,
    busy: bool,
    fail_writes: bool,
    pending_read_errors: u32,
    unplugged: bool,
    banner: Option<String>,
    acknowledge: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<DeviceState>,
    readable: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A simulated device; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MockSerialDevice {
    shared: Arc<Shared>,
}

impl MockSerialDevice {
    /// A device that prints [`BOOT_BANNER`] on open and acknowledges frames.
    pub fn new() -> Self {
        let device = Self::default();
        {
            let mut state = device.shared.lock();
            state.banner = Some(BOOT_BANNER.to_string());
            state.acknowledge = true;
        }
        device
    }

    /// A device that never talks unless told to.
    pub fn quiet() -> Self {
        Self::default()
    }

    // ── Host-visible traffic ────────────────────────────────────────────────

    /// Queues raw bytes for the host to read.
    pub fn emit_raw(&self, bytes: &[u8]) {
        self.shared.lock().to_host.extend(bytes);
        self.shared.readable.notify_all();
    }

    /// Queues one `'\n'`-terminated line for the host to read.
    pub fn emit_line(&self, line: &str) {
        {
            let mut state = self.shared.lock();
            state.to_host.extend(line.as_bytes());
            state.to_host.push_back(b'\n');
        }
        self.shared.readable.notify_all();
    }

    /// Frames received from the host so far, without terminators.
    pub fn received_frames(&self) -> Vec<String> {
        self.shared.lock().frames.clone()
    }

    /// Returns and forgets the frames received so far.
    pub fn take_frames(&self) -> Vec<String> {
        std::mem::take(&mut self.shared.lock().frames)
    }

    /// Number of port handles currently open against this device.
    pub fn open_handles(&self) -> usize {
        self.shared.lock().handles
    }

    /// Number of times the device has been opened (reset).
    pub fn open_count(&self) -> usize {
        self.shared.lock().opens
    }

    // ── Fault switches ──────────────────────────────────────────────────────

    /// Refuse to open, as when another program holds the port.
    pub fn set_busy(&self, busy: bool) {
        self.shared.lock().busy = busy;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.lock().fail_writes = fail;
    }

    /// Makes the next `count` reads fail with a transient I/O error.
    pub fn inject_read_errors(&self, count: u32) {
        self.shared.lock().pending_read_errors += count;
        self.shared.readable.notify_all();
    }

    /// Simulates the cable being pulled.  Open handles start failing with
    /// `BrokenPipe` and new opens fail with `NotFound`.
    pub fn unplug(&self) {
        self.shared.lock().unplugged = true;
        self.shared.readable.notify_all();
    }

    pub fn plug_in(&self) {
        self.shared.lock().unplugged = false;
    }

    fn attach_handle(&self, timeout: Duration, reset: bool) -> MockPort {
        let mut state = self.shared.lock();
        state.handles += 1;
        if reset {
            state.opens += 1;
            state.to_host.clear();
            state.inbox.clear();
            if let Some(banner) = state.banner.clone() {
                state.to_host.extend(banner.as_bytes());
                state.to_host.push_back(b'\n');
            }
        }
        drop(state);
        self.shared.readable.notify_all();
        MockPort {
            device: self.clone(),
            timeout,
        }
    }
}

/// One open handle to a [`MockSerialDevice`].
pub struct MockPort {
    device: MockSerialDevice,
    timeout: Duration,
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let shared = &self.device.shared;
        let guard = shared.lock();
        let (mut state, _) = shared
            .readable
            .wait_timeout_while(guard, self.timeout, |s| {
                s.to_host.is_empty() && !s.unplugged && s.pending_read_errors == 0
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.unplugged {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if state.pending_read_errors > 0 {
            state.pending_read_errors -= 1;
            return Err(io::Error::other("simulated read error"));
        }
        if state.to_host.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        }

        let n = buf.len().min(state.to_host.len());
        for (slot, byte) in buf.iter_mut().zip(state.to_host.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.shared.lock();
        if state.unplugged {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if state.fail_writes {
            return Err(io::Error::other("simulated write failure"));
        }

        state.inbox.extend_from_slice(buf);
        let mut acked = false;
        while let Some(end) = state.inbox.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = state.inbox.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).into_owned();
            state.frames.push(line.trim_end().to_string());
            if state.acknowledge {
                let reply = match decode_frame(&line) {
                    Ok(cmd) => format!("OK J {} {}\n", cmd.joint.index(), cmd.angle.degrees()),
                    Err(e) => format!("ERR {e}\n"),
                };
                state.to_host.extend(reply.as_bytes());
                acked = true;
            }
        }
        drop(state);
        if acked {
            self.device.shared.readable.notify_all();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PortIo for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn try_clone_port(&self) -> io::Result<Box<dyn PortIo>> {
        Ok(Box::new(self.device.attach_handle(self.timeout, false)))
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        let mut state = self.device.shared.lock();
        state.handles = state.handles.saturating_sub(1);
    }
}

/// Port name → simulated device table.
#[derive(Debug, Default)]
pub struct MockPortBackend {
    devices: Mutex<BTreeMap<String, MockSerialDevice>>,
}

impl MockPortBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MockPortBackend::add_device`].
    pub fn with_device(self, port: &str, device: MockSerialDevice) -> Self {
        self.add_device(port, device);
        self
    }

    pub fn add_device(&self, port: &str, device: MockSerialDevice) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port.to_string(), device);
    }

    pub fn device(&self, port: &str) -> Option<MockSerialDevice> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(port)
            .cloned()
    }
}

impl PortBackend for MockPortBackend {
    fn open_port(
        &self,
        port: &str,
        _baud_rate: u32,
        timeout: Duration,
    ) -> io::Result<Box<dyn PortIo>> {
        let device = self.device(port).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such port: {port}"))
        })?;
        {
            let state = device.shared.lock();
            if state.unplugged {
                return Err(io::Error::new(io::ErrorKind::NotFound, "device unplugged"));
            }
            if state.busy {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "port busy: held by another program",
                ));
            }
        }
        Ok(Box::new(device.attach_handle(timeout, true)))
    }
}

impl PortEnumerator for MockPortBackend {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, PortDiscoveryError> {
        let devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(devices
            .iter()
            .filter(|(_, device)| !device.shared.lock().unplugged)
            .map(|(name, _)| PortDescriptor {
                name: name.clone(),
                description: "Simulated arm controller".to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORT: &str = "SIM0";

    fn read_all(port: &mut Box<dyn PortIo>) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        while let Ok(n) = port.read(&mut buf) {
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_open_emits_boot_banner() {
        let backend = MockPortBackend::new().with_device(PORT, MockSerialDevice::new());

        let mut port = backend.open_port(PORT, 115_200, Duration::from_millis(5)).unwrap();

        assert_eq!(read_all(&mut port), "ARM READY\n");
    }

    #[test]
    fn test_frames_are_recorded_and_acknowledged() {
        // Arrange
        let device = MockSerialDevice::new();
        let backend = MockPortBackend::new().with_device(PORT, device.clone());
        let mut port = backend.open_port(PORT, 115_200, Duration::from_millis(5)).unwrap();
        read_all(&mut port);

        // Act
        port.write_all(b"J 5 170\nJ 9 1\n").unwrap();

        // Assert
        assert_eq!(device.received_frames(), vec!["J 5 170", "J 9 1"]);
        let replies = read_all(&mut port);
        assert!(replies.starts_with("OK J 5 170\nERR "), "{replies}");
    }

    #[test]
    fn test_quiet_device_says_nothing() {
        let device = MockSerialDevice::quiet();
        let backend = MockPortBackend::new().with_device(PORT, device.clone());
        let mut port = backend.open_port(PORT, 115_200, Duration::from_millis(5)).unwrap();

        port.write_all(b"J 0 0\n").unwrap();

        assert_eq!(read_all(&mut port), "");
        assert_eq!(device.take_frames(), vec!["J 0 0"]);
        assert!(device.received_frames().is_empty());
    }

    #[test]
    fn test_reopen_counts_as_reset() {
        let device = MockSerialDevice::new();
        let backend = MockPortBackend::new().with_device(PORT, device.clone());

        drop(backend.open_port(PORT, 115_200, Duration::ZERO).unwrap());
        drop(backend.open_port(PORT, 115_200, Duration::ZERO).unwrap());

        assert_eq!(device.open_count(), 2);
        assert_eq!(device.open_handles(), 0);
    }

    #[test]
    fn test_unplugged_device_is_not_listed_and_cannot_open() {
        let device = MockSerialDevice::new();
        let backend = MockPortBackend::new()
            .with_device("SIM0", device.clone())
            .with_device("SIM1", MockSerialDevice::new());

        device.unplug();

        let names: Vec<String> = backend
            .list_ports()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["SIM1"]);
        let err = backend.open_port("SIM0", 115_200, Duration::ZERO).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
