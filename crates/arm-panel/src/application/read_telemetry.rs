//! Reader loop: drains the serial link into the inbound telemetry queue.
//!
//! The loop runs on its own OS thread because `SerialLink::read_line` is a
//! blocking call.  Each read is bounded by a short timeout so the stop flag is
//! observed within one timeout period.
//!
//! ```text
//! loop until stop:
//!   link closed?        -> park for idle_recheck, recheck
//!   read_line(timeout)
//!     Some(line)        -> push TelemetryLine::device(line)
//!     None (timeout)    -> loop
//!     Read error        -> push "RX error: ..." diagnostic, park for error_backoff
//!     Disconnected      -> push diagnostic, flag link lost, exit
//! ```
//!
//! The loop never closes the link.  The bridge controller stops and joins the
//! loop first and only then closes the port, so no read is ever issued on a
//! closed handle.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::Sender,
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arm_core::TelemetryLine;
use tracing::{debug, error, warn};

use crate::application::link::{LinkError, SerialLink};

/// Timing of the reader loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Timeout of each blocking read; also bounds how long a stop takes.
    pub read_timeout: Duration,
    /// Pause between checks while the link is closed.
    pub idle_recheck: Duration,
    /// Pause after a transient read error.
    pub error_backoff: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            idle_recheck: Duration::from_millis(50),
            error_backoff: Duration::from_millis(200),
        }
    }
}

/// Why the reader loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The stop flag was raised (or the queue consumer went away).
    Stopped,
    /// The device disappeared; the connection must be torn down.
    LinkLost,
}

/// Handle to a running reader thread.
pub struct ReaderHandle {
    stop: Arc<AtomicBool>,
    link_lost: Arc<AtomicBool>,
    thread: JoinHandle<ReaderExit>,
}

impl ReaderHandle {
    /// `true` once the loop has exited because the device went away.
    pub fn link_lost(&self) -> bool {
        self.link_lost.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Raises the stop flag, wakes the thread and waits for it to exit.
    ///
    /// Blocks for at most one read timeout.
    pub fn stop(self) -> ReaderExit {
        self.stop.store(true, Ordering::Release);
        self.thread.thread().unpark();
        match self.thread.join() {
            Ok(exit) => exit,
            Err(_) => {
                error!("serial reader thread panicked");
                ReaderExit::Stopped
            }
        }
    }
}

/// Starts the reader loop on a dedicated thread.
///
/// # Errors
///
/// Returns the OS error if the thread could not be spawned.
pub fn spawn_reader(
    link: Arc<dyn SerialLink>,
    inbound: Sender<TelemetryLine>,
    settings: ReaderSettings,
) -> std::io::Result<ReaderHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let link_lost = Arc::new(AtomicBool::new(false));

    let thread = {
        let stop = Arc::clone(&stop);
        let link_lost = Arc::clone(&link_lost);
        thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || {
                let exit = run_reader(link.as_ref(), &inbound, &settings, &stop);
                if exit == ReaderExit::LinkLost {
                    link_lost.store(true, Ordering::Release);
                }
                exit
            })?
    };

    Ok(ReaderHandle {
        stop,
        link_lost,
        thread,
    })
}

fn run_reader(
    link: &dyn SerialLink,
    inbound: &Sender<TelemetryLine>,
    settings: &ReaderSettings,
    stop: &AtomicBool,
) -> ReaderExit {
    debug!(port = link.port_name(), "reader loop started");

    while !stop.load(Ordering::Acquire) {
        if !link.is_open() {
            thread::park_timeout(settings.idle_recheck);
            continue;
        }

        match link.read_line(settings.read_timeout) {
            Ok(Some(line)) => {
                if inbound.send(TelemetryLine::device(line)).is_err() {
                    debug!("inbound queue dropped; reader exiting");
                    return ReaderExit::Stopped;
                }
            }
            Ok(None) => {}
            Err(LinkError::NotOpen) => thread::park_timeout(settings.idle_recheck),
            Err(LinkError::Disconnected(source)) => {
                warn!(port = link.port_name(), "device disconnected: {source}");
                let _ = inbound.send(TelemetryLine::diagnostic(format!(
                    "RX error: device disconnected: {source}"
                )));
                return ReaderExit::LinkLost;
            }
            Err(e) => {
                warn!(port = link.port_name(), "serial read error: {e}");
                let detail = match &e {
                    LinkError::Read(source) => source.to_string(),
                    other => other.to_string(),
                };
                if inbound
                    .send(TelemetryLine::diagnostic(format!("RX error: {detail}")))
                    .is_err()
                {
                    return ReaderExit::Stopped;
                }
                thread::park_timeout(settings.error_backoff);
            }
        }
    }

    debug!(port = link.port_name(), "reader loop stopped");
    ReaderExit::Stopped
}

// ── Tests ─────────────────────────────────────────────────────────────────────
