use super::types::*;
use crate::error_handling::types::ConfigError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Schema version understood by this build.
pub const CONFIG_VERSION: u32 = 1;

/// Environment variable overriding `output_directory`.
pub const OUTPUT_DIR_ENV: &str = "SNA_OUTPUT_DIR";

/// On-disk configuration of a capture session.
///
/// This is the structured hand-off format between whatever produced the
/// settings (an interactive wizard, a provisioning script, a human with an
/// editor) and the capture process. It is plain TOML with an explicit schema
/// `version`, so producer and consumer do not need to share code.
///
/// # Example
///
/// ```toml
/// version = 1
/// interface = "wlan0"
/// ssid = "HomeNet"
/// output_directory = "/var/lib/sna"
/// base_name = "capture"
/// run_for = "1h 30m"
///
/// [analysis]
/// windows = 10
/// analyze_on_stop = true
/// ```
///
/// # Fields Overview
///
/// - `version`: schema version, must equal [`CONFIG_VERSION`]
/// - `interface`: name of the network interface to capture on
/// - `ssid`: wireless network the interface is associated with, informational
/// - `output_directory`: directory receiving the capture artifact
/// - `base_name`: artifact name without extension, a numeric suffix is added
///   when the name is taken
/// - `extension`: artifact extension, `pcap` when omitted
/// - `until`: `HH:MM` wall clock time at which the capture ends
/// - `run_for`: relative run period such as `2d 3h 30m`
/// - `analysis`: settings of the analysis pass
///
/// Exactly one of `until` and `run_for` must be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    pub interface: String,
    #[serde(default)]
    pub ssid: String,
    pub output_directory: PathBuf,
    pub base_name: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_for: Option<String>,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

impl Config {
    /// Reads and parses a TOML configuration file.
    ///
    /// The returned value is not validated yet, see [`Config::validate`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Applies overrides coming from the process environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(OUTPUT_DIR_ENV) {
            if !dir.is_empty() {
                info!("Using output directory from {}: {}", OUTPUT_DIR_ENV, dir);
                self.output_directory = PathBuf::from(dir);
            }
        }
    }

    /// Checks every field and produces the immutable session configuration.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found; [`ConfigError::field`] names
    /// the offending field.
    pub fn validate(&self) -> Result<CaptureConfig, ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        if self.interface.trim().is_empty() {
            return Err(ConfigError::EmptyField("interface"));
        }
        if self.base_name.trim().is_empty() {
            return Err(ConfigError::EmptyField("base_name"));
        }
        if self.output_directory.as_os_str().is_empty() {
            return Err(ConfigError::EmptyField("output_directory"));
        }
        let extension = self.extension.trim().trim_start_matches('.');
        if extension.is_empty() {
            return Err(ConfigError::EmptyField("extension"));
        }
        if self.analysis.windows == 0 {
            return Err(ConfigError::NotInRange(
                "analysis.windows",
                "at least one window is required".to_string(),
            ));
        }

        let deadline = match (&self.until, &self.run_for) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingDeadline),
            (None, None) => return Err(ConfigError::MissingDeadline),
            (Some(until), None) => DeadlineSpec::Absolute(until.parse()?),
            (None, Some(run_for)) => DeadlineSpec::Relative(run_for.parse()?),
        };

        Ok(CaptureConfig {
            interface: self.interface.trim().to_string(),
            ssid: self.ssid.clone(),
            output_directory: self.output_directory.clone(),
            base_name: self.base_name.trim().to_string(),
            extension: extension.to_string(),
            deadline,
            analysis: self.analysis.clone(),
        })
    }
}

impl From<&CaptureConfig> for Config {
    fn from(config: &CaptureConfig) -> Self {
        let (until, run_for) = match config.deadline {
            DeadlineSpec::Absolute(t) => (Some(t.to_string()), None),
            DeadlineSpec::Relative(p) => (None, Some(p.to_string())),
        };
        Config {
            version: CONFIG_VERSION,
            interface: config.interface.clone(),
            ssid: config.ssid.clone(),
            output_directory: config.output_directory.clone(),
            base_name: config.base_name.clone(),
            extension: config.extension.clone(),
            until,
            run_for,
            analysis: config.analysis.clone(),
        }
    }
}
