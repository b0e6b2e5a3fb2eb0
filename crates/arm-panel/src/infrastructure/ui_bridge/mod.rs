//! Command bridge: exposes the bridge controller to a front end.
//!
//! Every command is an `async fn(Arc<PanelAppState>, ..) -> CommandResult<T>`
//! so a desktop shell can register them as IPC handlers unchanged; the console
//! front end in `main.rs` calls them directly.
//!
//! # Data Transfer Objects (DTOs)
//!
//! Responses carry plain serialisable snapshots (`StatusDto`, `JointDto`,
//! `LogBatchDto`) rather than the domain types, so the wire shape seen by a
//! front end does not move when the domain types do.
//!
//! # `CommandResult<T>` wrapper
//!
//! All commands return `CommandResult<T>` rather than `Result<T, E>`, so every
//! response has the same shape: `{ success: bool, data: T | null, error:
//! string | null }`.
//!
//! # The panel log
//!
//! The operator-facing log is append-only.  Writers push `TX:`/`RX:` lines and
//! status messages; readers call [`poll_log`] with the cursor returned by the
//! previous call and receive only what is new.

use std::collections::VecDeque;
use std::sync::Arc;

use arm_core::{Joint, JOINT_COUNT};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::application::bridge_controller::{BridgeController, BridgeSettings, BridgeState};
use crate::application::link::LinkOpener;
use crate::infrastructure::ports::{format_port_list, PortDescriptor, PortEnumerator};

/// Oldest entries are dropped beyond this many.
pub const LOG_CAPACITY: usize = 2000;

// ── Panel log ─────────────────────────────────────────────────────────────────

/// Bounded append-only log addressed by absolute sequence numbers.
#[derive(Debug, Default)]
pub struct PanelLog {
    entries: VecDeque<String>,
    /// Sequence number of `entries[0]`.
    first_seq: u64,
}

impl PanelLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push_back(entry.into());
        if self.entries.len() > LOG_CAPACITY {
            self.entries.pop_front();
            self.first_seq += 1;
        }
    }

    /// Sequence number the next pushed entry will get.
    pub fn end(&self) -> u64 {
        self.first_seq + self.entries.len() as u64
    }

    /// Entries at or after `cursor`.  A cursor older than the retained window
    /// starts at the oldest retained entry.
    pub fn since(&self, cursor: u64) -> Vec<String> {
        let skip = cursor.saturating_sub(self.first_seq) as usize;
        self.entries.iter().skip(skip).cloned().collect()
    }
}

// ── Shared application state ──────────────────────────────────────────────────

/// State shared between command invocations.
///
/// Fields are `tokio::sync::Mutex` because commands run as async tasks and
/// `connect` holds the controller across the settle delay.
pub struct PanelAppState {
    pub controller: Mutex<BridgeController>,
    pub selected_port: Mutex<Option<String>>,
    pub log: Mutex<PanelLog>,
    pub ports: Arc<dyn PortEnumerator>,
}

impl PanelAppState {
    pub fn new(
        opener: Arc<dyn LinkOpener>,
        ports: Arc<dyn PortEnumerator>,
        settings: BridgeSettings,
        default_port: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            controller: Mutex::new(BridgeController::new(opener, settings)),
            selected_port: Mutex::new(default_port),
            log: Mutex::new(PanelLog::new()),
            ports,
        })
    }

    async fn append_log(&self, entry: impl Into<String>) {
        self.log.lock().await.push(entry);
    }
}

// ── Data Transfer Objects ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointDto {
    pub index: usize,
    pub name: String,
    pub angle: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDto {
    pub connected: bool,
    /// `"Connected to <port> @ <baud>"` or `"Not connected"`.
    pub status_text: String,
    /// Sliders and send buttons are live only while connected.
    pub controls_enabled: bool,
    pub selected_port: Option<String>,
    pub joints: Vec<JointDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBatchDto {
    pub entries: Vec<String>,
    /// Pass this to the next `poll_log` call.
    pub next_cursor: u64,
}

/// Unified response wrapper used by all commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

fn joints_of(controller: &BridgeController) -> Vec<JointDto> {
    let pose = controller.pose();
    Joint::ALL
        .iter()
        .map(|&joint| JointDto {
            index: joint.index(),
            name: joint.name().to_string(),
            angle: pose.angle(joint).degrees(),
        })
        .collect()
}

fn status_of(controller: &BridgeController, selected_port: Option<String>) -> StatusDto {
    let connected = controller.state() == BridgeState::Connected;
    let status_text = match controller.connection() {
        Some(info) => format!("Connected to {} @ {}", info.port, info.baud_rate),
        None => "Not connected".to_string(),
    };
    StatusDto {
        connected,
        status_text,
        controls_enabled: connected,
        selected_port,
        joints: joints_of(controller),
    }
}

async fn snapshot(state: &PanelAppState) -> StatusDto {
    let selected = state.selected_port.lock().await.clone();
    let controller = state.controller.lock().await;
    status_of(&controller, selected)
}

fn parse_joint(index: usize) -> Result<Joint, String> {
    Joint::try_from(index).map_err(|_| {
        format!("joint index {index} out of range 0..{}", JOINT_COUNT - 1)
    })
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Enumerates serial ports and preselects the first one if none is chosen.
pub async fn list_ports(state: Arc<PanelAppState>) -> CommandResult<Vec<PortDescriptor>> {
    let ports = match state.ports.list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("port scan failed: {e}");
            state.append_log(format!("Port scan failed: {e}")).await;
            return CommandResult::err(e.to_string());
        }
    };

    state.append_log(format!("Ports found: {}", format_port_list(&ports))).await;
    let mut selected = state.selected_port.lock().await;
    if selected.is_none() {
        *selected = ports.first().map(|p| p.name.clone());
    }
    CommandResult::ok(ports)
}

pub async fn select_port(state: Arc<PanelAppState>, port: String) -> CommandResult<StatusDto> {
    let port = port.trim().to_string();
    if port.is_empty() {
        return CommandResult::err("port name is empty");
    }
    *state.selected_port.lock().await = Some(port);
    CommandResult::ok(snapshot(&state).await)
}

/// Connects to `port`, or to the selected port when `None`.
pub async fn connect(state: Arc<PanelAppState>, port: Option<String>) -> CommandResult<StatusDto> {
    let port = match port {
        Some(port) => {
            *state.selected_port.lock().await = Some(port.clone());
            port
        }
        None => match state.selected_port.lock().await.clone() {
            Some(port) => port,
            None => {
                state.append_log("No port selected.").await;
                return CommandResult::err("No port selected.");
            }
        },
    };

    let result = state.controller.lock().await.connect(&port).await;
    match result {
        Ok(info) => {
            state
                .append_log(format!("Connected to {} @ {}", info.port, info.baud_rate))
                .await;
            CommandResult::ok(snapshot(&state).await)
        }
        Err(e) => {
            warn!("connect to {port} failed: {e}");
            let message = format!("Connect failed: {e}");
            state.append_log(message.clone()).await;
            CommandResult::err(message)
        }
    }
}

pub async fn disconnect(state: Arc<PanelAppState>) -> CommandResult<StatusDto> {
    let was_connected = {
        let mut controller = state.controller.lock().await;
        let was_connected = controller.state() == BridgeState::Connected;
        controller.disconnect().await;
        was_connected
    };
    if was_connected {
        state.append_log("Disconnected.").await;
    }
    CommandResult::ok(snapshot(&state).await)
}

/// The panel's single Connect/Disconnect button.
pub async fn toggle_connection(state: Arc<PanelAppState>) -> CommandResult<StatusDto> {
    let connected = state.controller.lock().await.state() == BridgeState::Connected;
    if connected {
        disconnect(state).await
    } else {
        connect(state, None).await
    }
}

/// Slider moved: the frame is debounced.  While disconnected only the pose is
/// updated.
pub async fn set_joint_angle(
    state: Arc<PanelAppState>,
    joint: usize,
    angle: i64,
) -> CommandResult<JointDto> {
    let joint = match parse_joint(joint) {
        Ok(joint) => joint,
        Err(e) => return CommandResult::err(e),
    };
    let mut controller = state.controller.lock().await;
    controller.on_joint_changed(joint, angle);
    CommandResult::ok(JointDto {
        index: joint.index(),
        name: joint.name().to_string(),
        angle: controller.pose().angle(joint).degrees(),
    })
}

pub async fn send_all(state: Arc<PanelAppState>) -> CommandResult<Vec<JointDto>> {
    let mut controller = state.controller.lock().await;
    controller.send_all();
    CommandResult::ok(joints_of(&controller))
}

pub async fn reset_to_default(state: Arc<PanelAppState>) -> CommandResult<Vec<JointDto>> {
    let mut controller = state.controller.lock().await;
    controller.reset_to_default();
    info!("pose reset to home");
    CommandResult::ok(joints_of(&controller))
}

/// Moves write outcomes and device lines into the panel log and returns every
/// entry after `cursor`.
///
/// Also notices a lost device and drops the connection.
pub async fn poll_log(state: Arc<PanelAppState>, cursor: u64) -> CommandResult<LogBatchDto> {
    let (lost, events, lines) = {
        let mut controller = state.controller.lock().await;
        // Health first: the reader queues its last diagnostic before flagging.
        let lost = controller.check_link_health().await;
        let events = controller.drain_dispatch_events();
        let lines = controller.drain_inbound();
        (lost, events, lines)
    };

    let mut log = state.log.lock().await;
    for event in &events {
        log.push(event.log_entry());
    }
    for line in &lines {
        log.push(line.log_entry());
    }
    if lost {
        log.push("Link lost. Disconnected.");
    }
    CommandResult::ok(LogBatchDto {
        entries: log.since(cursor),
        next_cursor: log.end(),
    })
}

pub async fn get_status(state: Arc<PanelAppState>) -> CommandResult<StatusDto> {
    CommandResult::ok(snapshot(&state).await)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
