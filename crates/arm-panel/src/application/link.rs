//! Serial link abstractions used by the application layer.
//!
//! The use cases in this layer never touch a serial port directly.  They talk
//! to a [`SerialLink`] obtained from a [`LinkOpener`]; the infrastructure
//! layer provides the real `serialport`-backed implementation and an
//! in-memory simulated device for tests.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Baud rate the arm firmware listens at.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Errors raised by a serial link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The port could not be opened (absent, busy, or not a serial device).
    #[error("could not open {port}: {reason}")]
    Connection { port: String, reason: String },

    /// A frame could not be written.  The link stays usable.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// A read failed transiently.  The caller may retry.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// The device went away (unplugged or hung up).
    #[error("device disconnected: {0}")]
    Disconnected(#[source] std::io::Error),

    /// The operation needs an open link.
    #[error("link is not open")]
    NotOpen,
}

/// Physical link parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Upper bound of a single blocking read.
    pub read_timeout: Duration,
    /// Upper bound of a single frame write; a stuck link fails fast.
    pub write_timeout: Duration,
    /// Wait after opening, while the board reboots.
    pub settle_delay: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(100),
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// An open, line-oriented serial connection.
///
/// Reads and writes go through separate handles, so the reader thread and
/// the command writer never wait on each other.
pub trait SerialLink: Send + Sync {
    /// System identifier of the port, e.g. `/dev/ttyACM0` or `COM3`.
    fn port_name(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Writes one newline-terminated frame.  Failures are returned, never
    /// retried.
    fn write_frame(&self, frame: &str) -> Result<(), LinkError>;

    /// Blocks for at most `timeout` waiting for a complete line.
    ///
    /// Returns `Ok(None)` on timeout.  Partial lines are kept for the next
    /// call.
    fn read_line(&self, timeout: Duration) -> Result<Option<String>, LinkError>;

    /// Releases the port.  Safe to call more than once.
    fn close(&self);
}

/// Opens serial links by port identifier.
pub trait LinkOpener: Send + Sync {
    /// # Errors
    ///
    /// Returns [`LinkError::Connection`] if the port is absent or busy.
    fn open(&self, port: &str, settings: &LinkSettings) -> Result<Arc<dyn SerialLink>, LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_settings_default_matches_firmware() {
        let settings = LinkSettings::default();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.read_timeout, Duration::from_millis(100));
        assert_eq!(settings.settle_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_connection_error_message_names_port() {
        let err = LinkError::Connection {
            port: "/dev/ttyACM9".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "could not open /dev/ttyACM9: No such file or directory"
        );
    }
}
