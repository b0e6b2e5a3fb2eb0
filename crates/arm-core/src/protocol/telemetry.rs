//! Inbound telemetry lines.
//!
//! The firmware's replies are free text.  Nothing here parses them; a
//! [`TelemetryLine`] only records where the text came from so the log can
//! label it.

use serde::{Deserialize, Serialize};

/// Where a telemetry line originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineOrigin {
    /// Text read from the device.
    Device,
    /// A synthetic line produced by the reader describing a read failure.
    Diagnostic,
}

/// One decoded line received from (or about) the device.
///
/// Fields are private so a line cannot be altered after the reader has
/// queued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryLine {
    origin: LineOrigin,
    text: String,
}

impl TelemetryLine {
    /// A line of device output.
    pub fn device(text: impl Into<String>) -> Self {
        Self {
            origin: LineOrigin::Device,
            text: text.into(),
        }
    }

    /// A synthetic diagnostic line.
    pub fn diagnostic(text: impl Into<String>) -> Self {
        Self {
            origin: LineOrigin::Diagnostic,
            text: text.into(),
        }
    }

    pub fn origin(&self) -> LineOrigin {
        self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Formats the line for the operator log: `RX: <text>` for device
    /// output, the bare text for diagnostics.
    pub fn log_entry(&self) -> String {
        match self.origin {
            LineOrigin::Device => format!("RX: {}", self.text),
            LineOrigin::Diagnostic => self.text.clone(),
        }
    }
}
