//! Engine configuration: JSON file under the XDG config dir plus `NEXUS_TELEMETRY_*` overrides.
//! Stored at $XDG_CONFIG_HOME/nexus/telemetry.json (fallback ~/.config/nexus/telemetry.json)

use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigSourceError, EngineError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_ms: u64,
    pub read_timeout_ms: u64,
    pub history_capacity: usize,
    pub graph_step: f64,
    pub graph_baseline: f64,
    pub graph_cap_kbps: f64,
    pub graph_scale: f64,
    pub graph_floor: f64,
    pub top_k: usize,
    pub feed_capacity: usize,
    pub connection_limit: usize,
    pub upload_ratio: f64,
    pub disk_volume: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            read_timeout_ms: 750,
            history_capacity: 60,
            graph_step: 5.0,
            graph_baseline: 200.0,
            graph_cap_kbps: 2_000.0,
            graph_scale: 10.0,
            graph_floor: 250.0,
            top_k: 5,
            feed_capacity: 20,
            connection_limit: 12,
            upload_ratio: 0.2,
            disk_volume: default_volume().to_string(),
            interface: None,
            seed: None,
        }
    }
}

#[cfg(windows)]
fn default_volume() -> &'static str {
    "C:\\"
}

#[cfg(not(windows))]
fn default_volume() -> &'static str {
    "/"
}

impl TelemetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Reads `path`; a missing file yields defaults, a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, EngineError> {
        let text = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(EngineError::Config {
                    path: path.to_path_buf(),
                    source: ConfigSourceError::Io(e),
                })
            }
        };
        serde_json::from_str(&text).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            source: ConfigSourceError::Json(e),
        })
    }

    /// Default file, then environment overrides, then clamping.
    pub fn load() -> Result<Self, EngineError> {
        let mut cfg = Self::load_from(&config_path())?;
        cfg.apply_env();
        Ok(cfg.validated())
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let wrap = |source: ConfigSourceError| EngineError::Config {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| wrap(e.into()))?;
        }
        let data = serde_json::to_vec_pretty(self).map_err(|e| wrap(e.into()))?;
        fs::write(path, data).map_err(|e| wrap(e.into()))
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup; unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NEXUS_TELEMETRY_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.interval_ms = v;
        }
        if let Some(v) = lookup("NEXUS_TELEMETRY_READ_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.read_timeout_ms = v;
        }
        if let Some(v) = lookup("NEXUS_TELEMETRY_IFACE").filter(|v| !v.is_empty()) {
            self.interface = Some(v);
        }
        if let Some(v) = lookup("NEXUS_TELEMETRY_VOLUME").filter(|v| !v.is_empty()) {
            self.disk_volume = v;
        }
        if let Some(v) = lookup("NEXUS_TELEMETRY_SEED").and_then(|v| v.parse().ok()) {
            self.seed = Some(v);
        }
    }

    /// Clamps values that would make the engine spin or divide by zero.
    pub fn validated(mut self) -> Self {
        self.interval_ms = self.interval_ms.max(10);
        self.read_timeout_ms = self.read_timeout_ms.max(1);
        self.history_capacity = self.history_capacity.max(1);
        self.feed_capacity = self.feed_capacity.max(1);
        if !(self.graph_scale.is_finite() && self.graph_scale > 0.0) {
            self.graph_scale = 1.0;
        }
        if !(self.graph_cap_kbps.is_finite() && self.graph_cap_kbps >= 0.0) {
            self.graph_cap_kbps = 0.0;
        }
        if !(self.upload_ratio.is_finite() && self.upload_ratio >= 0.0) {
            self.upload_ratio = 0.0;
        }
        self
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("nexus")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nexus")
    }
}

pub fn config_path() -> PathBuf {
    config_dir().join("telemetry.json")
}
