//! Configuration loading and parsing.
//!
//! Defines the server config schema and resolves plugin defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Source activated at startup.
    pub default_source: Option<String>,
    /// Origins allowed by CORS.
    pub cors_origins: Option<Vec<String>>,
    /// Snapclient plugin settings.
    pub snapclient: Option<SnapclientConfig>,
}

/// Snapserver JSON-RPC control port.
pub const DEFAULT_CONTROL_PORT: u16 = 1780;

/// Snapclient section from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct SnapclientConfig {
    /// Register the plugin at all (default: true).
    pub enabled: Option<bool>,
    /// Path to the snapclient binary.
    pub executable_path: Option<String>,
    /// ALSA output device passed with `-s`.
    pub alsa_device: Option<String>,
    /// Extra arguments appended to the invocation.
    pub extra_args: Option<Vec<String>>,
    /// `avahi` (default) or `mdns`.
    pub discovery_backend: Option<String>,
    /// Bound on a single discovery pass.
    pub discovery_timeout_ms: Option<u64>,
    /// Interval of the discovery / peer health loop.
    pub polling_interval_ms: Option<u64>,
    /// Interval of the process monitor loop.
    pub monitor_interval_ms: Option<u64>,
    /// Run periodic discovery while active.
    pub auto_discover: Option<bool>,
    /// Connect to the first discovered server automatically.
    pub auto_connect: Option<bool>,
    /// Probe the connected peer over TCP.
    pub health_check: Option<bool>,
    pub health_check_timeout_ms: Option<u64>,
    /// Window during which a second auto-connect is suppressed.
    pub reconnect_guard_ms: Option<u64>,
    /// Watch the snapserver JSON-RPC control port while connected.
    pub control_watch: Option<bool>,
    /// Snapserver control port (default 1780).
    pub control_port: Option<u16>,
    /// Tone player used by the `test_audio` command.
    pub test_tone_command: Option<String>,
}

/// Discovery implementation used by the snapclient plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryBackend {
    /// `avahi-browse -r -t -p _snapcast._tcp`.
    Avahi,
    /// In-process mDNS browse.
    Mdns,
}

/// Resolved snapclient settings.
#[derive(Debug, Clone)]
pub struct SnapclientSettings {
    pub enabled: bool,
    pub executable_path: PathBuf,
    pub alsa_device: String,
    pub extra_args: Vec<String>,
    pub discovery_backend: DiscoveryBackend,
    pub discovery_timeout: Duration,
    pub polling_interval: Duration,
    pub monitor_interval: Duration,
    pub auto_discover: bool,
    pub auto_connect: bool,
    pub health_check: bool,
    pub health_check_timeout: Duration,
    pub reconnect_guard: Duration,
    pub control_watch: bool,
    pub control_port: u16,
    pub test_tone_command: PathBuf,
}

impl Default for SnapclientSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            executable_path: PathBuf::from("/usr/bin/snapclient"),
            alsa_device: "default".to_string(),
            extra_args: Vec::new(),
            discovery_backend: DiscoveryBackend::Avahi,
            discovery_timeout: Duration::from_secs(3),
            polling_interval: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(5),
            auto_discover: true,
            auto_connect: true,
            health_check: true,
            health_check_timeout: Duration::from_millis(500),
            reconnect_guard: Duration::from_secs(5),
            control_watch: true,
            control_port: DEFAULT_CONTROL_PORT,
            test_tone_command: PathBuf::from("speaker-test"),
        }
    }
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

/// Resolve the snapclient section, applying defaults.
pub fn snapclient_from_config(cfg: &ServerConfig) -> Result<SnapclientSettings> {
    let defaults = SnapclientSettings::default();
    let Some(raw) = cfg.snapclient.as_ref() else {
        return Ok(defaults);
    };

    let discovery_backend = match raw.discovery_backend.as_deref().map(str::trim) {
        None | Some("") | Some("avahi") => DiscoveryBackend::Avahi,
        Some("mdns") => DiscoveryBackend::Mdns,
        Some(other) => {
            return Err(anyhow::anyhow!(
                "snapclient.discovery_backend: unknown backend {other:?} (expected avahi or mdns)"
            ));
        }
    };

    let executable_path = raw
        .executable_path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or(defaults.executable_path);
    let alsa_device = raw
        .alsa_device
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(defaults.alsa_device);
    let control_port = match raw.control_port {
        Some(0) => return Err(anyhow::anyhow!("snapclient.control_port must be greater than zero")),
        Some(port) => port,
        None => defaults.control_port,
    };
    let test_tone_command = raw
        .test_tone_command
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or(defaults.test_tone_command);

    Ok(SnapclientSettings {
        enabled: raw.enabled.unwrap_or(defaults.enabled),
        executable_path,
        alsa_device,
        extra_args: raw.extra_args.clone().unwrap_or_default(),
        discovery_backend,
        discovery_timeout: duration_ms(
            "snapclient.discovery_timeout_ms",
            raw.discovery_timeout_ms,
            defaults.discovery_timeout,
        )?,
        polling_interval: duration_ms(
            "snapclient.polling_interval_ms",
            raw.polling_interval_ms,
            defaults.polling_interval,
        )?,
        monitor_interval: duration_ms(
            "snapclient.monitor_interval_ms",
            raw.monitor_interval_ms,
            defaults.monitor_interval,
        )?,
        auto_discover: raw.auto_discover.unwrap_or(defaults.auto_discover),
        auto_connect: raw.auto_connect.unwrap_or(defaults.auto_connect),
        health_check: raw.health_check.unwrap_or(defaults.health_check),
        health_check_timeout: duration_ms(
            "snapclient.health_check_timeout_ms",
            raw.health_check_timeout_ms,
            defaults.health_check_timeout,
        )?,
        reconnect_guard: duration_ms(
            "snapclient.reconnect_guard_ms",
            raw.reconnect_guard_ms,
            defaults.reconnect_guard,
        )?,
        control_watch: raw.control_watch.unwrap_or(defaults.control_watch),
        control_port,
        test_tone_command,
    })
}

fn duration_ms(key: &str, value: Option<u64>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(0) => Err(anyhow::anyhow!("{key} must be greater than zero")),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}
