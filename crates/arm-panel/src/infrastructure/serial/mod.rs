//! Serial transport: line framing over a byte-level port.
//!
//! The byte-level port is abstracted by [`PortIo`] so the same framing code
//! runs against a real device (`native`, via the `serialport` crate) and an
//! in-memory simulated arm (`mock`).
//!
//! # Split handles
//!
//! Opening a port yields one handle; [`SerialTransport`] clones it into a
//! reader half and a writer half, much like splitting a TCP stream.  The
//! reader thread owns reads and the command writer owns writes, each behind
//! its own mutex, so a 100ms read never holds up a frame write.
//!
//! # Line framing
//!
//! Bytes are accumulated until a `'\n'` arrives.  Each line is decoded as
//! UTF-8 (invalid sequences are replaced), trimmed, and blank lines are
//! skipped.  A partial line that has not been terminated when a read times out
//! stays buffered for the next call.

use std::io::{self, Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::application::link::{LinkError, LinkOpener, LinkSettings, SerialLink};

pub mod mock;
pub mod native;

/// Byte-level access to one opened port handle.
pub trait PortIo: Read + Write + Send {
    /// Sets the timeout used by subsequent reads and writes on this handle.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Returns a second handle to the same port.
    fn try_clone_port(&self) -> io::Result<Box<dyn PortIo>>;
}

/// Opens byte-level ports by name.
pub trait PortBackend: Send + Sync {
    fn open_port(&self, port: &str, baud_rate: u32, timeout: Duration)
        -> io::Result<Box<dyn PortIo>>;
}

const READ_CHUNK: usize = 256;

/// Reader half: the port handle plus the unterminated tail of the stream.
struct LineReader {
    port: Box<dyn PortIo>,
    buffer: Vec<u8>,
    timeout: Duration,
}

impl LineReader {
    /// Waits at most `timeout` in total for a complete line.  Each read after a
    /// partial chunk is bounded by what is left of the window.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let deadline = Instant::now() + timeout;
        let mut wait = timeout;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if wait != self.timeout {
                self.port.set_timeout(wait).map_err(LinkError::Read)?;
                self.timeout = wait;
            }
            match self.port.read(&mut chunk) {
                Ok(0) => {
                    return Err(LinkError::Disconnected(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "port hung up",
                    )))
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if let Some(line) = self.take_line() {
                        return Ok(Some(line));
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_device_gone(&e) => return Err(LinkError::Disconnected(e)),
                Err(e) => return Err(LinkError::Read(e)),
            }
            wait = deadline.saturating_duration_since(Instant::now());
            if wait.is_zero() {
                return Ok(None);
            }
        }
    }

    /// Pops the next non-blank complete line out of the buffer.
    fn take_line(&mut self) -> Option<String> {
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }
}

/// OS errors meaning the device itself is gone rather than a glitch.
fn is_device_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotFound
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A line-oriented serial connection over a [`PortIo`].
pub struct SerialTransport {
    port_name: String,
    open: AtomicBool,
    reader: Mutex<Option<LineReader>>,
    writer: Mutex<Option<Box<dyn PortIo>>>,
}

impl SerialTransport {
    /// Opens `port` through `backend` and splits it into reader and writer
    /// halves.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Connection`] if the port is absent, busy, or
    /// cannot be cloned.
    pub fn open(
        backend: &dyn PortBackend,
        port: &str,
        settings: &LinkSettings,
    ) -> Result<Self, LinkError> {
        let connection_error = |e: io::Error| LinkError::Connection {
            port: port.to_string(),
            reason: e.to_string(),
        };

        let writer = backend
            .open_port(port, settings.baud_rate, settings.write_timeout)
            .map_err(connection_error)?;
        let mut reader_port = writer.try_clone_port().map_err(connection_error)?;
        reader_port
            .set_timeout(settings.read_timeout)
            .map_err(connection_error)?;

        Ok(Self {
            port_name: port.to_string(),
            open: AtomicBool::new(true),
            reader: Mutex::new(Some(LineReader {
                port: reader_port,
                buffer: Vec::new(),
                timeout: settings.read_timeout,
            })),
            writer: Mutex::new(Some(writer)),
        })
    }
}

impl SerialLink for SerialTransport {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn write_frame(&self, frame: &str) -> Result<(), LinkError> {
        debug_assert!(frame.ends_with('\n'), "frames are newline-terminated");
        if !self.is_open() {
            return Err(LinkError::NotOpen);
        }
        let mut guard = lock(&self.writer);
        let port = guard.as_mut().ok_or(LinkError::NotOpen)?;
        port.write_all(frame.as_bytes())
            .and_then(|()| port.flush())
            .map_err(|e| {
                if is_device_gone(&e) {
                    LinkError::Disconnected(e)
                } else {
                    LinkError::Write(e)
                }
            })
    }

    fn read_line(&self, timeout: Duration) -> Result<Option<String>, LinkError> {
        if !self.is_open() {
            return Err(LinkError::NotOpen);
        }
        let mut guard = lock(&self.reader);
        let reader = guard.as_mut().ok_or(LinkError::NotOpen)?;
        reader.read_line(timeout)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            lock(&self.writer).take();
            lock(&self.reader).take();
            debug!(port = %self.port_name, "serial port closed");
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// [`LinkOpener`] that builds [`SerialTransport`]s over a [`PortBackend`].
pub struct SerialLinkOpener {
    backend: Arc<dyn PortBackend>,
}

impl SerialLinkOpener {
    pub fn new(backend: Arc<dyn PortBackend>) -> Self {
        Self { backend }
    }
}

impl LinkOpener for SerialLinkOpener {
    fn open(&self, port: &str, settings: &LinkSettings) -> Result<Arc<dyn SerialLink>, LinkError> {
        let transport = SerialTransport::open(self.backend.as_ref(), port, settings)?;
        info!("opened serial port {port} @ {}", settings.baud_rate);
        Ok(Arc::new(transport))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
