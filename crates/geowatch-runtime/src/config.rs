//! Runtime configuration: an optional TOML file, overridden by CLI flags.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use geowatch::WatcherConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("cannot locate a config directory: set XDG_CONFIG_HOME or HOME, or pass --prefs")]
    NoConfigDir,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub watcher: WatcherConfig,
    pub simulation: SimulationConfig,
    /// Preference file; falls back to the XDG location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Read `path`, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Behaviour of the simulated sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay between fixes of a watch, and before a one-shot answer.
    pub interval_ms: u64,
    /// `[latitude, longitude]` waypoints, visited in a loop.
    pub route: Vec<[f64; 2]>,
    /// Every n-th reading is a failure. `0` never fails.
    pub fail_every: u32,
    pub accuracy_m: f64,
}

impl SimulationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            route: vec![[52.5200, 13.4050], [52.5206, 13.4094], [52.5163, 13.3777]],
            fail_every: 0,
            accuracy_m: 10.0,
        }
    }
}

/// `$XDG_CONFIG_HOME/geowatch/preferences.json`, else `~/.config/...`.
pub fn default_preferences_path() -> Result<PathBuf, ConfigError> {
    preferences_path_from(std::env::var_os("XDG_CONFIG_HOME"), std::env::var_os("HOME"))
}

fn preferences_path_from(
    xdg_config_home: Option<OsString>,
    home: Option<OsString>,
) -> Result<PathBuf, ConfigError> {
    let base = match (xdg_config_home, home) {
        (Some(xdg), _) if !xdg.is_empty() => PathBuf::from(xdg),
        (_, Some(home)) if !home.is_empty() => PathBuf::from(home).join(".config"),
        _ => return Err(ConfigError::NoConfigDir),
    };
    Ok(base.join("geowatch").join("preferences.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = RuntimeConfig::parse("").expect("parse");
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.watcher.app_id, "geowatch");
    }

    #[test]
    fn sections_are_read() {
        let config = RuntimeConfig::parse(
            r#"
preferences = "/tmp/prefs.json"

[watcher]
app_id = "maps"

[watcher.options]
enable_high_accuracy = true
timeout_ms = 5000

[simulation]
interval_ms = 200
route = [[1.0, 2.0], [3.0, 4.0]]
fail_every = 3
"#,
        )
        .expect("parse");
        assert_eq!(config.watcher.app_id, "maps");
        assert!(config.watcher.options.enable_high_accuracy);
        assert_eq!(config.watcher.options.timeout_ms, Some(5_000));
        assert_eq!(config.simulation.interval_ms, 200);
        assert_eq!(config.simulation.route, vec![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(config.simulation.fail_every, 3);
        assert_eq!(config.simulation.accuracy_m, 10.0);
        assert_eq!(config.preferences, Some(PathBuf::from("/tmp/prefs.json")));
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("geowatch.toml");
        std::fs::write(&path, "[simulation]\ninterval_ms = \"fast\"\n").expect("write");
        let err = RuntimeConfig::load(Some(&path)).expect_err("bad type");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("geowatch.toml"));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = RuntimeConfig::load(Some(&dir.path().join("absent.toml"))).expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn preferences_path_prefers_xdg() {
        let path = preferences_path_from(Some("/xdg".into()), Some("/home/u".into())).expect("path");
        assert_eq!(path, PathBuf::from("/xdg/geowatch/preferences.json"));

        let path = preferences_path_from(Some("".into()), Some("/home/u".into())).expect("path");
        assert_eq!(path, PathBuf::from("/home/u/.config/geowatch/preferences.json"));

        assert!(matches!(
            preferences_path_from(None, None),
            Err(ConfigError::NoConfigDir)
        ));
    }
}
