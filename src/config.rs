//! Configuration loading for the Teal toolchain.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use teal_core::MachineConfig;

/// Project-local configuration file name.
pub const CONFIG_FILE: &str = "teal.toml";

/// Environment variable that turns instruction tracing on.
pub const TRACE_ENV: &str = "TEAL_TRACE";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TealConfig {
    /// Function invoked when no `--entry` is given.
    pub entry: String,
    /// Instructions one session may execute per scheduling quantum.
    pub step_limit: u64,
    /// Emit a trace event per executed instruction.
    pub trace: bool,
    /// Directory holding persisted sessions for `start`/`resume`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for TealConfig {
    fn default() -> Self {
        let machine = MachineConfig::default();
        Self {
            entry: "main".to_string(),
            step_limit: machine.step_limit,
            trace: machine.trace,
            state_dir: None,
        }
    }
}

impl TealConfig {
    /// Load from `explicit`, else the first existing search path, else defaults.
    /// Returns the file the configuration came from, if any.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_path(path)?, Some(path.to_path_buf())));
        }
        for path in Self::search_paths() {
            if path.is_file() {
                return Ok((Self::from_path(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        Self::from_toml_str(&data)
            .with_context(|| format!("parsing configuration {}", path.display()))
    }

    pub fn from_toml_str(data: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(data)
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("teal").join("config.toml"));
        }
        paths
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(TRACE_ENV) {
            self.trace = matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            step_limit: self.step_limit,
            trace: self.trace,
        }
    }

    /// Where persisted sessions live when no directory is configured.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join("teal").join("sessions"))
                .unwrap_or_else(|| PathBuf::from(".teal").join("sessions"))
        })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let serialized = toml::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("writing configuration to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = TealConfig::from_toml_str("step_limit = 10\n").unwrap();
        assert_eq!(config.step_limit, 10);
        assert_eq!(config.entry, "main");
        assert!(!config.trace);
        assert_eq!(config.machine_config().step_limit, 10);
    }

    #[test]
    fn explicit_path_wins_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let config = TealConfig {
            entry: "start".into(),
            state_dir: Some(dir.path().join("state")),
            ..TealConfig::default()
        };
        config.save(&path).unwrap();
        let (loaded, from) = TealConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(from.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.state_dir(), dir.path().join("state"));
    }

    #[test]
    fn malformed_file_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "step_limit = \"many\"").unwrap();
        let err = TealConfig::from_path(&path).unwrap_err();
        assert!(format!("{err:#}").contains("bad.toml"));
    }

    #[test]
    fn trace_env_override() {
        let mut config = TealConfig::default();
        config.apply_env(|key| (key == TRACE_ENV).then(|| "1".to_string()));
        assert!(config.trace);
        config.apply_env(|_| Some("0".to_string()));
        assert!(!config.trace);
        config.apply_env(|_| None);
        assert!(!config.trace);
    }
}
