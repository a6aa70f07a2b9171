//! Workbench configuration (`config.yaml`).
//!
//! Every field is optional; a missing file yields defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{WorkbenchError, WorkbenchResult};

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Whether toolchain scripts are run through `sudo`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "SudoSetting")]
pub enum SudoMode {
    /// Resolves to no escalation.
    #[default]
    Auto,
    Always,
    Never,
}

/// Accepts `auto`, `true`/`false` and `always`/`never` in YAML.
#[derive(Deserialize)]
#[serde(untagged)]
enum SudoSetting {
    Flag(bool),
    Word(String),
}

impl From<SudoSetting> for SudoMode {
    fn from(setting: SudoSetting) -> Self {
        match setting {
            SudoSetting::Flag(true) => SudoMode::Always,
            SudoSetting::Flag(false) => SudoMode::Never,
            SudoSetting::Word(word) => match word.to_ascii_lowercase().as_str() {
                "always" | "true" | "yes" => SudoMode::Always,
                "never" | "false" | "no" => SudoMode::Never,
                _ => SudoMode::Auto,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Toolchain root containing `extract-firmware.sh`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub use_sudo_extract: SudoMode,
    #[serde(default)]
    pub use_sudo_build: SudoMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub unpack_timeout_secs: u64,
    pub entropy_samples: usize,
    pub entropy_window: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { unpack_timeout_secs: 45, entropy_samples: 4, entropy_window: 65536 }
    }
}

impl AnalysisConfig {
    pub fn unpack_timeout(&self) -> Duration {
        Duration::from_secs(self.unpack_timeout_secs)
    }
}

/// Filesystem tool overrides; `None` means look up on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub unsquashfs: Option<PathBuf>,
    pub mksquashfs: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    pub fmk: ToolchainConfig,
    pub workspaces_dir: PathBuf,
    pub output_dir: PathBuf,
    pub analysis: AnalysisConfig,
    pub tools: ToolPaths,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            fmk: ToolchainConfig::default(),
            workspaces_dir: PathBuf::from("workspaces"),
            output_dir: PathBuf::from("output"),
            analysis: AnalysisConfig::default(),
            tools: ToolPaths::default(),
        }
    }
}

impl WorkbenchConfig {
    /// Parse YAML text; an empty document yields defaults.
    pub fn from_yaml(body: &str) -> WorkbenchResult<Self> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(body).map_err(|e| WorkbenchError::Config(e.to_string()))
    }

    /// Load configuration from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> WorkbenchResult<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let body = fs::read_to_string(path)?;
        Self::from_yaml(&body)
            .map_err(|e| WorkbenchError::Config(format!("{}: {e}", path.display())))
    }
}
