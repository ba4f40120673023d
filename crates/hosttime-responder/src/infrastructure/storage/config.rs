//! TOML-based configuration for the responder.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\HostTime\config.toml`
//! - Linux:    `~/.config/hosttime/config.toml`
//! - macOS:    `~/Library/Application Support/HostTime/config.toml`
//!
//! The `HOSTTIME_CONFIG` environment variable, when set, names the file
//! directly.  Example:
//!
//! ```toml
//! [responder]
//! log_level = "debug"
//!
//! [serial]
//! baud_rate = 115200
//! read_timeout_ms = 1000
//!
//! [discovery]
//! poll_interval_ms = 2000
//! ignored_ports = ["/dev/ttyS0"]
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section, or a
//! missing key all fall back to the built-in values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::transport::PortSettings;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "HOSTTIME_CONFIG";

/// Shortest idle backoff accepted; anything lower would busy-spin on a quiet port.
pub const MIN_IDLE_BACKOFF_MS: u64 = 10;

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

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is outside its accepted range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level responder configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponderConfig {
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long shutdown waits for sessions to release their ports.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Serial line settings applied to every session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Upper bound on one blocking read.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Pause after a read that produced no line.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

/// Device discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Port names never opened, e.g. a built-in UART used by a console.
    #[serde(default)]
    pub ignored_ports: Vec<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_shutdown_grace_ms() -> u64 {
    3000
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_idle_backoff_ms() -> u64 {
    MIN_IDLE_BACKOFF_MS
}
fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            idle_backoff_ms: default_idle_backoff_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            ignored_ports: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Checks every value the serial and discovery layers depend on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud_rate == 0 {
            return Err(invalid("serial.baud_rate", "must be greater than zero"));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(invalid(
                "serial.read_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.serial.idle_backoff_ms < MIN_IDLE_BACKOFF_MS {
            return Err(invalid(
                "serial.idle_backoff_ms",
                format!("must be at least {MIN_IDLE_BACKOFF_MS}"),
            ));
        }
        if self.discovery.poll_interval_ms == 0 {
            return Err(invalid(
                "discovery.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            baud_rate: self.serial.baud_rate,
            read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
        }
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.serial.idle_backoff_ms.max(MIN_IDLE_BACKOFF_MS))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.responder.shutdown_grace_ms)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
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

/// Resolves the full path to the config file, honouring `HOSTTIME_CONFIG`.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if no override is set and the
/// base directory cannot be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("config.toml"))
}

/// Loads and validates `AppConfig` from [`config_file_path`].
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads and validates `AppConfig` from `path`, returning
/// `AppConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if a value is out of range.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Persists `config` to [`config_file_path`].
///
/// # Errors
///
/// See [`config_file_path`] and [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<PathBuf, ConfigError> {
    let path = config_file_path()?;
    save_config_to(config, &path)?;
    Ok(path)
}

/// Resolves the platform config base directory plus the `HostTime` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("HostTime"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("hosttime"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("HostTime")
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

    fn temp_config_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("hosttime_test_{tag}_{}", std::process::id()))
            .join("config.toml")
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_matches_serial_protocol_parameters() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.serial.baud_rate, 115_200);
        assert_eq!(cfg.serial.read_timeout_ms, 1000);
        assert_eq!(cfg.serial.idle_backoff_ms, 10);
        assert_eq!(cfg.discovery.poll_interval_ms, 2000);
        assert!(cfg.discovery.ignored_ports.is_empty());
        assert_eq!(cfg.responder.log_level, "info");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_duration_helpers_convert_milliseconds() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.idle_backoff(), Duration::from_millis(10));
        assert_eq!(cfg.shutdown_grace(), Duration::from_secs(3));
        assert_eq!(cfg.port_settings(), PortSettings::default());
    }

    // ── TOML parsing ──────────────────────────────────────────────────────────

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_section_overrides_only_given_keys() {
        // Arrange
        let toml_str = r#"
[serial]
baud_rate = 9600

[discovery]
ignored_ports = ["/dev/ttyS0", "/dev/ttyAMA0"]
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.serial.baud_rate, 9600);
        assert_eq!(cfg.serial.read_timeout_ms, 1000);
        assert_eq!(cfg.discovery.poll_interval_ms, 2000);
        assert_eq!(cfg.discovery.ignored_ports, vec!["/dev/ttyS0", "/dev/ttyAMA0"]);
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_validate_rejects_backoff_below_minimum() {
        let mut cfg = AppConfig::default();
        cfg.serial.idle_backoff_ms = 1;

        let result = cfg.validate();

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "serial.idle_backoff_ms", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_read_timeout() {
        let mut cfg = AppConfig::default();
        cfg.serial.read_timeout_ms = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "serial.read_timeout_ms", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval_and_baud() {
        let mut cfg = AppConfig::default();
        cfg.discovery.poll_interval_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.serial.baud_rate = 0;
        assert!(cfg.validate().is_err());
    }

    // ── File round trip ───────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        let cfg = load_config_from(&path).expect("missing file means defaults");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let path = temp_config_path("roundtrip");
        let mut cfg = AppConfig::default();
        cfg.serial.baud_rate = 57_600;
        cfg.responder.log_level = "debug".to_string();
        cfg.discovery.ignored_ports.push("COM1".to_string());

        // Act
        save_config_to(&cfg, &path).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_load_config_from_rejects_out_of_range_values() {
        let path = temp_config_path("invalid");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[serial]\nidle_backoff_ms = 0\n").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if std::env::var_os(CONFIG_PATH_ENV).is_some() {
            return;
        }
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
    }
}
