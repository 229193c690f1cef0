//! Konfiguration der Call-Engine
//!
//! Alle Timeouts und Verbindungsparameter an einer Stelle. Defaults
//! entsprechen dem Verhalten der App; einzelne Werte lassen sich über
//! Umgebungsvariablen überschreiben.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Standard Signaling-Server
pub const DEFAULT_SIGNALING_URL: &str = "https://call-app-signaling.questxen.workers.dev";

const DEFAULT_RING_TIMEOUT_SECS: u64 = 45;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECONNECT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MODE_SWITCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_HEARTBEAT_MISS_LIMIT: u32 = 3;

// ============================================================================
// CALL CONFIG
// ============================================================================

/// Laufzeit-Konfiguration für Signaling und Call-Engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Basis-URL des Signaling-Servers (http/https oder ws/wss)
    pub signaling_url: String,
    /// App-Datenverzeichnis (Keys, Datenbanken). `None` = Plattform-Default
    pub data_dir: Option<PathBuf>,
    pub ring_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_timeout_secs: u64,
    pub mode_switch_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Anzahl verpasster Heartbeats bis zum Link-Verlust
    pub heartbeat_miss_limit: u32,
    /// Keepalive zum Signaling-Server (Idle-Timeout des Workers)
    pub keepalive_interval_secs: u64,
    pub signaling_reconnect_attempts: u32,
    pub signaling_reconnect_delay_secs: u64,
    pub registration_timeout_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            data_dir: None,
            ring_timeout_secs: DEFAULT_RING_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            reconnect_timeout_secs: DEFAULT_RECONNECT_TIMEOUT_SECS,
            mode_switch_timeout_secs: DEFAULT_MODE_SWITCH_TIMEOUT_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            heartbeat_miss_limit: DEFAULT_HEARTBEAT_MISS_LIMIT,
            keepalive_interval_secs: 25,
            signaling_reconnect_attempts: 1,
            signaling_reconnect_delay_secs: 2,
            registration_timeout_secs: 10,
        }
    }
}

impl CallConfig {
    /// Defaults plus Overrides aus der Umgebung
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SIGNALING_URL") {
            config.signaling_url = url;
        }
        if let Ok(dir) = std::env::var("PULSE_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        override_from_env("PULSE_RING_TIMEOUT_SECS", &mut config.ring_timeout_secs);
        override_from_env("PULSE_CONNECT_TIMEOUT_SECS", &mut config.connect_timeout_secs);
        override_from_env(
            "PULSE_RECONNECT_TIMEOUT_SECS",
            &mut config.reconnect_timeout_secs,
        );
        override_from_env(
            "PULSE_MODE_SWITCH_TIMEOUT_SECS",
            &mut config.mode_switch_timeout_secs,
        );
        override_from_env(
            "PULSE_HEARTBEAT_INTERVAL_SECS",
            &mut config.heartbeat_interval_secs,
        );
        override_from_env("PULSE_HEARTBEAT_MISS_LIMIT", &mut config.heartbeat_miss_limit);

        config
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }

    pub fn mode_switch_timeout(&self) -> Duration {
        Duration::from_secs(self.mode_switch_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Zeitspanne ohne Heartbeat, nach der ein Link als verloren gilt
    pub fn heartbeat_grace(&self) -> Duration {
        self.heartbeat_interval()
            .checked_mul(self.heartbeat_miss_limit.max(1))
            .unwrap_or(Duration::MAX)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn signaling_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.signaling_reconnect_delay_secs)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    /// Ermittelt das Datenverzeichnis (explizit oder Plattform-Default)
    ///
    /// - Windows: `%APPDATA%/questxen/pulse/data`
    /// - macOS: `~/Library/Application Support/com.questxen.pulse`
    /// - Linux: `~/.local/share/pulse`
    pub fn resolve_data_dir(&self) -> std::io::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }

        let proj_dirs = directories::ProjectDirs::from("com", "questxen", "pulse").ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine app data directory",
            )
        })?;

        Ok(proj_dirs.data_dir().to_path_buf())
    }
}

/// Überschreibt `target`, wenn die Variable gesetzt und parsebar ist
fn override_from_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    let Ok(raw) = std::env::var(name) else {
        return;
    };

    match parse_setting::<T>(&raw) {
        Some(value) => *target = value,
        None => tracing::warn!("Ignoring malformed value for {}: {:?}", name, raw),
    }
}

fn parse_setting<T: std::str::FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

// ============================================================================
// TESTS
// ============================================================================
