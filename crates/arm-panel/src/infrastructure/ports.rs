//! Serial port discovery.
//!
//! The panel lists the ports it can see so the operator can pick one.  Only
//! the list matters here; nothing is opened.

use serde::{Deserialize, Serialize};
use serialport::SerialPortType;
use thiserror::Error;
use tracing::debug;

/// One port the operator can choose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// OS device name, e.g. `/dev/ttyACM0` or `COM3`.
    pub name: String,
    /// Human-readable description, e.g. the USB product string.
    pub description: String,
}

#[derive(Debug, Error)]
pub enum PortDiscoveryError {
    #[error("port enumeration failed: {0}")]
    Enumeration(String),
}

impl From<serialport::Error> for PortDiscoveryError {
    fn from(e: serialport::Error) -> Self {
        Self::Enumeration(e.to_string())
    }
}

/// Source of the available port list.
pub trait PortEnumerator: Send + Sync {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, PortDiscoveryError>;
}

/// Enumerates the host's serial ports via `serialport::available_ports`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortEnumerator;

impl PortEnumerator for SystemPortEnumerator {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, PortDiscoveryError> {
        let mut ports: Vec<PortDescriptor> = serialport::available_ports()?
            .into_iter()
            .map(|info| PortDescriptor {
                description: describe(&info.port_type),
                name: info.port_name,
            })
            .collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = ports.len(), "enumerated serial ports");
        Ok(ports)
    }
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => match (&usb.manufacturer, &usb.product) {
            (Some(m), Some(p)) => format!("{m} {p}"),
            (None, Some(p)) => p.clone(),
            (Some(m), None) => m.clone(),
            (None, None) => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
        },
        SerialPortType::PciPort => "PCI serial".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        SerialPortType::Unknown => "n/a".to_string(),
    }
}

/// Fixed port list, for tests.
#[derive(Debug, Default, Clone)]
pub struct MockPortEnumerator {
    ports: Vec<PortDescriptor>,
}

impl MockPortEnumerator {
    pub fn new(names: &[&str]) -> Self {
        Self {
            ports: names
                .iter()
                .map(|name| PortDescriptor {
                    name: (*name).to_string(),
                    description: "mock".to_string(),
                })
                .collect(),
        }
    }
}

impl PortEnumerator for MockPortEnumerator {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, PortDiscoveryError> {
        Ok(self.ports.clone())
    }
}

/// Formats a port list the way the panel log shows it: `[COM3, COM4]`, or
/// `None` when nothing was found.
pub fn format_port_list(ports: &[PortDescriptor]) -> String {
    if ports.is_empty() {
        return "None".to_string();
    }
    let names: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
    format!("[{}]", names.join(", "))
}
