//! Bridge controller: the single owner of the serial connection.
//!
//! # State machine
//!
//! ```text
//!                connect(port) ok
//!  Disconnected ─────────────────────> Connected
//!       ^                                  │
//!       └──── disconnect() / link lost ────┘
//! ```
//!
//! `connect` opens the link, waits for the board to finish the reset that
//! opening the port triggers, starts the reader loop and attaches the command
//! dispatcher.  If any step fails the link is closed again and the state stays
//! `Disconnected`.
//!
//! `disconnect` tears down in the reverse order: pending sends are cancelled,
//! the reader loop is stopped and joined, and only then is the link closed.
//!
//! Both are called from the presentation context only, which serialises every
//! lifecycle transition.

use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;

use arm_core::{ArmPose, Joint, TelemetryLine};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::dispatch_commands::{CommandDispatcher, DispatchEvent};
use crate::application::link::{LinkError, LinkOpener, LinkSettings, SerialLink};
use crate::application::read_telemetry::{spawn_reader, ReaderExit, ReaderHandle, ReaderSettings};

/// Connection state as seen by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeState {
    Disconnected,
    Connected,
}

/// Describes the open connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub port: String,
    pub baud_rate: u32,
}

/// Every tunable of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub link: LinkSettings,
    pub reader: ReaderSettings,
    /// Debounce quiet period per joint.
    pub debounce: Duration,
    /// Send the current pose once right after connecting.
    pub sync_pose_on_connect: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        let link = LinkSettings::default();
        Self {
            reader: ReaderSettings {
                read_timeout: link.read_timeout,
                ..ReaderSettings::default()
            },
            link,
            debounce: Duration::from_millis(40),
            sync_pose_on_connect: true,
        }
    }
}

struct ActiveConnection {
    info: ConnectionInfo,
    link: Arc<dyn SerialLink>,
    reader: ReaderHandle,
}

impl ActiveConnection {
    fn is_alive(&self) -> bool {
        !self.reader.link_lost() && self.link.is_open()
    }
}

/// Owns the serial link, the reader loop and the command dispatcher.
pub struct BridgeController {
    opener: Arc<dyn LinkOpener>,
    settings: BridgeSettings,
    active: Option<ActiveConnection>,
    dispatcher: CommandDispatcher,
    dispatch_events: mpsc::UnboundedReceiver<DispatchEvent>,
    inbound_tx: std_mpsc::Sender<TelemetryLine>,
    inbound_rx: std_mpsc::Receiver<TelemetryLine>,
}

impl BridgeController {
    pub fn new(opener: Arc<dyn LinkOpener>, settings: BridgeSettings) -> Self {
        let (dispatcher, dispatch_events) = CommandDispatcher::new(settings.debounce);
        let (inbound_tx, inbound_rx) = std_mpsc::channel();
        Self {
            opener,
            settings,
            active: None,
            dispatcher,
            dispatch_events,
            inbound_tx,
            inbound_rx,
        }
    }

    /// `Connected` only while the open link is healthy.  A link whose reader
    /// has reported loss reads as `Disconnected` even before
    /// [`check_link_health`](Self::check_link_health) tears it down.
    pub fn state(&self) -> BridgeState {
        if self.live_connection().is_some() {
            BridgeState::Connected
        } else {
            BridgeState::Disconnected
        }
    }

    pub fn connection(&self) -> Option<&ConnectionInfo> {
        self.live_connection().map(|active| &active.info)
    }

    fn live_connection(&self) -> Option<&ActiveConnection> {
        self.active.as_ref().filter(|active| active.is_alive())
    }

    /// Opens `port` and brings the bridge to `Connected`.
    ///
    /// Connecting to the port that is already open is a no-op; connecting to a
    /// different port disconnects first.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Connection`] if the port cannot be opened or the
    /// reader cannot be started.  The bridge is `Disconnected` afterwards.
    pub async fn connect(&mut self, port: &str) -> Result<ConnectionInfo, LinkError> {
        let port = port.trim();
        self.check_link_health().await;
        if let Some(active) = &self.active {
            if active.info.port == port {
                return Ok(active.info.clone());
            }
            self.disconnect().await;
        }
        if port.is_empty() {
            return Err(LinkError::Connection {
                port: String::new(),
                reason: "no port selected".to_string(),
            });
        }

        info!("opening {port} @ {}", self.settings.link.baud_rate);
        let link = {
            let opener = Arc::clone(&self.opener);
            let settings = self.settings.link.clone();
            let requested = port.to_string();
            tokio::task::spawn_blocking(move || opener.open(&requested, &settings))
                .await
                .map_err(|e| LinkError::Connection {
                    port: port.to_string(),
                    reason: format!("open task failed: {e}"),
                })??
        };

        // The board reboots when the port opens; give it time to come up.
        tokio::time::sleep(self.settings.link.settle_delay).await;

        let reader = match spawn_reader(
            Arc::clone(&link),
            self.inbound_tx.clone(),
            self.settings.reader.clone(),
        ) {
            Ok(reader) => reader,
            Err(e) => {
                error!("could not start serial reader: {e}");
                link.close();
                return Err(LinkError::Connection {
                    port: port.to_string(),
                    reason: format!("could not start reader: {e}"),
                });
            }
        };

        self.dispatcher.attach(Arc::clone(&link));
        let info = ConnectionInfo {
            port: port.to_string(),
            baud_rate: self.settings.link.baud_rate,
        };
        self.active = Some(ActiveConnection {
            info: info.clone(),
            link,
            reader,
        });
        info!("connected to {} @ {}", info.port, info.baud_rate);

        if self.settings.sync_pose_on_connect {
            self.dispatcher.send_all();
        }
        Ok(info)
    }

    /// Stops the reader, cancels pending sends and closes the link.
    ///
    /// Calling this while disconnected does nothing.
    pub async fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("disconnect ignored: not connected");
            return;
        };

        self.dispatcher.detach();

        let reader = active.reader;
        match tokio::task::spawn_blocking(move || reader.stop()).await {
            Ok(exit) => debug!(?exit, "reader loop joined"),
            Err(e) => error!("failed to join reader loop: {e}"),
        }

        active.link.close();
        info!("disconnected from {}", active.info.port);
    }

    /// Tears the connection down if the reader reported the device gone.
    ///
    /// Returns `true` if the bridge transitioned to `Disconnected`.
    pub async fn check_link_health(&mut self) -> bool {
        let lost = self.active.as_ref().is_some_and(|active| !active.is_alive());
        if lost {
            warn!("serial link lost; disconnecting");
            self.disconnect().await;
        }
        lost
    }

    // ── Command submission ──────────────────────────────────────────────────

    pub fn on_joint_changed(&mut self, joint: Joint, raw_angle: i64) {
        self.dispatcher.on_joint_changed(joint, raw_angle);
    }

    pub fn send_now(&mut self, joint: Joint, raw_angle: i64) {
        self.dispatcher.send_now(joint, raw_angle);
    }

    pub fn send_all(&mut self) {
        self.dispatcher.send_all();
    }

    pub fn reset_to_default(&mut self) {
        self.dispatcher.reset_to_default();
    }

    pub fn pose(&self) -> ArmPose {
        self.dispatcher.pose()
    }

    pub fn pending_sends(&self) -> usize {
        self.dispatcher.pending_count()
    }

    // ── Queue drains ────────────────────────────────────────────────────────

    /// Removes and returns every telemetry line received so far, oldest first.
    pub fn drain_inbound(&mut self) -> Vec<TelemetryLine> {
        self.inbound_rx.try_iter().collect()
    }

    /// Removes and returns every write outcome reported so far.
    pub fn drain_dispatch_events(&mut self) -> Vec<DispatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.dispatch_events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            self.dispatcher.detach();
            if active.reader.stop() == ReaderExit::LinkLost {
                debug!("reader had already lost the link");
            }
            active.link.close();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
