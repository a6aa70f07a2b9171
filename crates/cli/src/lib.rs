use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fwbench_core::config::{WorkbenchConfig, DEFAULT_CONFIG_FILE};
use fwbench_core::WorkbenchError;

pub mod commands;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Path to `config.yaml`; defaults to `./config.yaml` when present.
    pub config: Option<String>,
    /// Explicit toolchain root; wins over the config file and `FMK_PATH`.
    pub fmk: Option<String>,
}

impl GlobalOpts {
    /// Load the workbench configuration. A missing default file yields defaults;
    /// a missing explicit file is an error.
    pub fn load_config(&self) -> Result<WorkbenchConfig> {
        match &self.config {
            Some(path) => {
                let path = Path::new(path);
                if !path.is_file() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                tracing::debug!(path = %path.display(), "loading config");
                WorkbenchConfig::load(path)
                    .with_context(|| format!("Failed to load config {}", path.display()))
            }
            None => WorkbenchConfig::load(Path::new(DEFAULT_CONFIG_FILE))
                .context("Failed to load config.yaml"),
        }
    }
}

/// Canonicalize the path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(root: &str) -> Result<PathBuf> {
    let path = Path::new(root);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Progress sink used by every command: tool output goes to stderr so that
/// `--json` output on stdout stays parseable.
pub fn stderr_sink(line: &str) {
    eprintln!("{line}");
}

/// Render an error chain with the classification of the first workbench error in it.
pub fn describe_error(err: &anyhow::Error) -> String {
    let class = err
        .chain()
        .find_map(|c| c.downcast_ref::<WorkbenchError>())
        .map(|w| w.classification())
        .unwrap_or("error");
    format!("[{class}] {err:#}")
}
