//! Arm panel entry point: a console front end over the serial bridge.
//!
//! ```text
//! main()
//!  └─ load config, apply CLI overrides
//!  └─ PanelAppState::new()   -- bridge controller over native or simulated ports
//!  └─ event loop
//!       ├─ stdin command     -> ui_bridge command
//!       ├─ poll tick (50ms)  -> poll_log, print new entries
//!       └─ Ctrl-C            -> leave the loop
//!  └─ disconnect
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arm_panel::infrastructure::ports::{PortEnumerator, SystemPortEnumerator};
use arm_panel::infrastructure::serial::{
    mock::{MockPortBackend, MockSerialDevice},
    native::NativePortBackend,
    PortBackend, SerialLinkOpener,
};
use arm_panel::infrastructure::storage::config::{load_config, load_config_from, AppConfig};
use arm_panel::infrastructure::ui_bridge::{self, PanelAppState, StatusDto};

/// Port name of the built-in simulated arm.
const SIMULATED_PORT: &str = "SIM0";

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Six-servo robotic arm control panel.
///
/// Drives the arm over a serial link with `J <joint> <angle>` frames and shows
/// whatever the board prints back.
#[derive(Debug, Parser)]
#[command(name = "arm-panel", version)]
struct Cli {
    /// Serial port to preselect (e.g. /dev/ttyACM0 or COM3).
    #[arg(long, env = "ARM_PANEL_PORT")]
    port: Option<String>,

    /// Baud rate; must match the firmware.
    #[arg(long, env = "ARM_PANEL_BAUD")]
    baud: Option<u32>,

    /// Config file to use instead of the platform default.
    #[arg(long, env = "ARM_PANEL_CONFIG")]
    config: Option<PathBuf>,

    /// Per-joint debounce quiet period in milliseconds.
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Wait after opening the port while the board resets, in milliseconds.
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Talk to a simulated arm on port SIM0 instead of real hardware.
    #[arg(long)]
    simulate: bool,
}

impl Cli {
    /// Layers the command-line overrides on top of the file config.
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(port) = &self.port {
            config.panel.default_port = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(debounce) = self.debounce_ms {
            config.timing.debounce_ms = debounce;
        }
        match self.settle_ms {
            Some(settle) => config.serial.settle_ms = settle,
            // The simulated board is ready as soon as it is opened.
            None if self.simulate => config.serial.settle_ms = 0,
            None => {}
        }
    }

    fn load_config(&self) -> anyhow::Result<AppConfig> {
        match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => load_config().context("failed to load config"),
        }
    }
}

// ── Console commands ──────────────────────────────────────────────────────────

const HELP: &str = "\
commands:
  ports                 list serial ports
  connect [port]        connect to port (or the selected one)
  disconnect            close the connection
  toggle                connect or disconnect
  j <joint> <angle>     move joint 0..5 to angle 0..180
  all                   send every joint
  home                  reset every joint to 90 and send
  status                show connection and pose
  quit                  disconnect and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Ports,
    Connect(Option<String>),
    Disconnect,
    Toggle,
    Joint { index: usize, angle: i64 },
    SendAll,
    Home,
    Status,
    Help,
    Quit,
}

fn parse_command(input: &str) -> Result<ConsoleCommand, String> {
    let mut words = input.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("ports", []) => ConsoleCommand::Ports,
        ("connect", []) => ConsoleCommand::Connect(None),
        ("connect", [port]) => ConsoleCommand::Connect(Some((*port).to_string())),
        ("disconnect", []) => ConsoleCommand::Disconnect,
        ("toggle", []) => ConsoleCommand::Toggle,
        ("j" | "joint", [index, angle]) => ConsoleCommand::Joint {
            index: index
                .parse()
                .map_err(|_| format!("bad joint index: {index}"))?,
            angle: angle.parse().map_err(|_| format!("bad angle: {angle}"))?,
        },
        ("all", []) => ConsoleCommand::SendAll,
        ("home" | "reset", []) => ConsoleCommand::Home,
        ("status", []) => ConsoleCommand::Status,
        ("help" | "?", []) => ConsoleCommand::Help,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        _ => return Err(format!("unrecognised command: {input}")),
    };
    Ok(command)
}

fn print_status(status: &StatusDto) {
    println!("{}", status.status_text);
    if let Some(port) = &status.selected_port {
        println!("selected port: {port}");
    }
    for joint in &status.joints {
        println!("  {} {:<8} {:>3}", joint.index, joint.name, joint.angle);
    }
}

/// Runs one console command.  Returns `false` when the operator asked to quit.
async fn run_command(state: &Arc<PanelAppState>, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Ports => {
            ui_bridge::list_ports(Arc::clone(state)).await;
        }
        ConsoleCommand::Connect(port) => {
            ui_bridge::connect(Arc::clone(state), port).await;
        }
        ConsoleCommand::Disconnect => {
            ui_bridge::disconnect(Arc::clone(state)).await;
        }
        ConsoleCommand::Toggle => {
            ui_bridge::toggle_connection(Arc::clone(state)).await;
        }
        ConsoleCommand::Joint { index, angle } => {
            let result = ui_bridge::set_joint_angle(Arc::clone(state), index, angle).await;
            if let Some(error) = result.error {
                println!("{error}");
            }
        }
        ConsoleCommand::SendAll => {
            ui_bridge::send_all(Arc::clone(state)).await;
        }
        ConsoleCommand::Home => {
            ui_bridge::reset_to_default(Arc::clone(state)).await;
        }
        ConsoleCommand::Status => {
            if let Some(status) = ui_bridge::get_status(Arc::clone(state)).await.data {
                print_status(&status);
            }
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return false,
    }
    true
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = cli.load_config();

    // `RUST_LOG` wins; otherwise the configured level.
    let level = loaded
        .as_ref()
        .map(|cfg| cfg.panel.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match loaded {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => return Err(e),
        Err(e) => {
            warn!("{e:#}; using defaults");
            AppConfig::default()
        }
    };
    cli.apply_to(&mut config);

    let (backend, ports): (Arc<dyn PortBackend>, Arc<dyn PortEnumerator>) = if cli.simulate {
        let sim = Arc::new(
            MockPortBackend::new().with_device(SIMULATED_PORT, MockSerialDevice::new()),
        );
        let backend: Arc<dyn PortBackend> = sim.clone();
        let ports: Arc<dyn PortEnumerator> = sim;
        (backend, ports)
    } else {
        (Arc::new(NativePortBackend), Arc::new(SystemPortEnumerator))
    };

    let state = PanelAppState::new(
        Arc::new(SerialLinkOpener::new(backend)),
        ports,
        config.bridge_settings(),
        config.panel.default_port.clone(),
    );

    info!(
        simulate = cli.simulate,
        baud = config.serial.baud_rate,
        "arm panel starting"
    );
    ui_bridge::list_ports(Arc::clone(&state)).await;
    println!("Type 'help' for commands.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut poll = tokio::time::interval(config.poll_interval());
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut cursor = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if let Some(batch) = ui_bridge::poll_log(Arc::clone(&state), cursor).await.data {
                    for entry in &batch.entries {
                        println!("{entry}");
                    }
                    cursor = batch.next_cursor;
                }
            }
            line = stdin.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(command) => {
                        if !run_command(&state, command).await {
                            break;
                        }
                    }
                    Err(e) => println!("{e} (try 'help')"),
                }
            }
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    ui_bridge::disconnect(Arc::clone(&state)).await;
    if let Some(batch) = ui_bridge::poll_log(Arc::clone(&state), cursor).await.data {
        for entry in &batch.entries {
            println!("{entry}");
        }
    }
    info!("arm panel stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_joint_command() {
        assert_eq!(
            parse_command("j 5 170"),
            Ok(ConsoleCommand::Joint { index: 5, angle: 170 })
        );
    }

    #[test]
    fn test_parse_joint_command_keeps_out_of_range_angle_for_clamping() {
        assert_eq!(
            parse_command("J 0 -20"),
            Ok(ConsoleCommand::Joint { index: 0, angle: -20 })
        );
    }

    #[test]
    fn test_parse_connect_with_and_without_port() {
        assert_eq!(parse_command("connect"), Ok(ConsoleCommand::Connect(None)));
        assert_eq!(
            parse_command("connect /dev/ttyACM0"),
            Ok(ConsoleCommand::Connect(Some("/dev/ttyACM0".to_string())))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_command("j five 10").is_err());
        assert!(parse_command("launch").is_err());
        assert!(parse_command("all now").is_err());
        assert!(parse_command("   ").is_err());
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(parse_command("reset"), Ok(ConsoleCommand::Home));
        assert_eq!(parse_command("exit"), Ok(ConsoleCommand::Quit));
        assert_eq!(parse_command("?"), Ok(ConsoleCommand::Help));
    }

    #[test]
    fn test_cli_defaults_leave_config_untouched() {
        // Arrange
        let cli = Cli::parse_from(["arm-panel"]);
        let mut config = AppConfig::default();

        // Act
        cli.apply_to(&mut config);

        // Assert
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_cli_overrides_apply() {
        // Arrange
        let cli = Cli::parse_from([
            "arm-panel",
            "--port",
            "COM7",
            "--baud",
            "57600",
            "--debounce-ms",
            "25",
            "--settle-ms",
            "500",
        ]);
        let mut config = AppConfig::default();

        // Act
        cli.apply_to(&mut config);

        // Assert
        assert_eq!(config.panel.default_port.as_deref(), Some("COM7"));
        assert_eq!(config.serial.baud_rate, 57_600);
        assert_eq!(config.timing.debounce_ms, 25);
        assert_eq!(config.serial.settle_ms, 500);
    }

    #[test]
    fn test_simulate_skips_settle_delay_unless_given() {
        let mut config = AppConfig::default();
        Cli::parse_from(["arm-panel", "--simulate"]).apply_to(&mut config);
        assert_eq!(config.serial.settle_ms, 0);

        let mut config = AppConfig::default();
        Cli::parse_from(["arm-panel", "--simulate", "--settle-ms", "100"]).apply_to(&mut config);
        assert_eq!(config.serial.settle_ms, 100);
    }
}
