//! Real serial ports via the `serialport` crate.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use super::{PortBackend, PortIo};

/// One handle to an OS serial port.
pub struct NativePort(Box<dyn SerialPort>);

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl PortIo for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.0.set_timeout(timeout).map_err(io::Error::from)
    }

    fn try_clone_port(&self) -> io::Result<Box<dyn PortIo>> {
        let clone = self.0.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(NativePort(clone)))
    }
}

/// Opens ports on the host operating system, 8N1 with no flow control.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePortBackend;

impl PortBackend for NativePortBackend {
    fn open_port(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> io::Result<Box<dyn PortIo>> {
        let handle = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(io::Error::from)?;
        Ok(Box::new(NativePort(handle)))
    }
}
