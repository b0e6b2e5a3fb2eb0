//! TOML-based configuration persistence for the arm panel.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\ArmPanel\config.toml`
//! - Linux:    `~/.config/armpanel/config.toml`
//! - macOS:    `~/Library/Application Support/ArmPanel/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [panel]
//! log_level = "debug"
//! default_port = "/dev/ttyACM0"
//!
//! [serial]
//! baud_rate = 115200
//! settle_ms = 2000
//!
//! [timing]
//! debounce_ms = 40
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section and a
//! missing key all fall back to the values the firmware expects.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::bridge_controller::BridgeSettings;
use crate::application::link::{LinkSettings, DEFAULT_BAUD_RATE};
use crate::application::read_telemetry::ReaderSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Operator-facing behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PanelConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port to preselect instead of the first one discovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_port: Option<String>,
    /// Push the full pose to the arm right after connecting.
    #[serde(default = "default_true")]
    pub sync_pose_on_connect: bool,
}

/// Serial line parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Wait after opening while the board resets.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

/// Timer intervals, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How often the front end drains the log queues.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_idle_recheck_ms")]
    pub idle_recheck_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_io_timeout_ms() -> u64 {
    100
}
fn default_settle_ms() -> u64 {
    2000
}
fn default_debounce_ms() -> u64 {
    40
}
fn default_poll_ms() -> u64 {
    50
}
fn default_idle_recheck_ms() -> u64 {
    50
}
fn default_error_backoff_ms() -> u64 {
    200
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_port: None,
            sync_pose_on_connect: default_true(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_io_timeout_ms(),
            write_timeout_ms: default_io_timeout_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_ms: default_poll_ms(),
            idle_recheck_ms: default_idle_recheck_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl AppConfig {
    /// Builds the bridge controller settings described by this config.
    pub fn bridge_settings(&self) -> BridgeSettings {
        let read_timeout = Duration::from_millis(self.serial.read_timeout_ms);
        BridgeSettings {
            link: LinkSettings {
                baud_rate: self.serial.baud_rate,
                read_timeout,
                write_timeout: Duration::from_millis(self.serial.write_timeout_ms),
                settle_delay: Duration::from_millis(self.serial.settle_ms),
            },
            reader: ReaderSettings {
                read_timeout,
                idle_recheck: Duration::from_millis(self.timing.idle_recheck_ms),
                error_backoff: Duration::from_millis(self.timing.error_backoff_ms),
            },
            debounce: Duration::from_millis(self.timing.debounce_ms),
            sync_pose_on_connect: self.panel.sync_pose_on_connect,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.timing.poll_ms.max(1))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform path, or defaults if there is no file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("ArmPanel"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("armpanel"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("ArmPanel")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("arm_panel_test_{}", Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");
        (dir, path)
    }

    #[test]
    fn test_app_config_default_matches_firmware() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.serial.baud_rate, 115_200);
        assert_eq!(cfg.serial.settle_ms, 2000);
        assert_eq!(cfg.timing.debounce_ms, 40);
        assert_eq!(cfg.panel.log_level, "info");
        assert!(cfg.panel.sync_pose_on_connect);
        assert_eq!(cfg.panel.default_port, None);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        // Arrange
        let toml_str = r#"
[serial]
baud_rate = 57600

[timing]
debounce_ms = 25
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.serial.baud_rate, 57_600);
        assert_eq!(cfg.serial.read_timeout_ms, 100);
        assert_eq!(cfg.timing.debounce_ms, 25);
        assert_eq!(cfg.timing.poll_ms, 50);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ nope");
        assert!(result.is_err());
    }

    #[test]
    fn test_default_port_is_omitted_when_unset() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        assert!(!toml_str.contains("default_port"));
    }

    #[test]
    fn test_bridge_settings_follow_config() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.serial.baud_rate = 9600;
        cfg.serial.settle_ms = 0;
        cfg.serial.read_timeout_ms = 30;
        cfg.timing.debounce_ms = 10;
        cfg.panel.sync_pose_on_connect = false;

        // Act
        let settings = cfg.bridge_settings();

        // Assert
        assert_eq!(settings.link.baud_rate, 9600);
        assert_eq!(settings.link.settle_delay, Duration::ZERO);
        assert_eq!(settings.reader.read_timeout, Duration::from_millis(30));
        assert_eq!(settings.link.read_timeout, Duration::from_millis(30));
        assert_eq!(settings.debounce, Duration::from_millis(10));
        assert!(!settings.sync_pose_on_connect);
    }

    #[test]
    fn test_default_bridge_settings_match_controller_defaults() {
        assert_eq!(AppConfig::default().bridge_settings(), BridgeSettings::default());
    }

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let (dir, path) = temp_path();
        let cfg = load_config_from(&path).expect("missing file is not an error");
        assert_eq!(cfg, AppConfig::default());
        assert!(!dir.exists());
    }

    #[test]
    fn test_load_config_from_file_written_as_toml() {
        // Arrange
        let (dir, path) = temp_path();
        let mut cfg = AppConfig::default();
        cfg.panel.default_port = Some("/dev/ttyACM0".to_string());
        cfg.panel.log_level = "debug".to_string();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, toml::to_string_pretty(&cfg).unwrap()).unwrap();

        // Act
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_from_malformed_file_returns_parse_error() {
        let (dir, path) = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "panel = 3 = 4").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
