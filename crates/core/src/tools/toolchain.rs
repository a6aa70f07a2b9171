use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{SudoMode, ToolchainConfig};
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::tools::{ensure_executable, run_tool, should_escalate, LogSink, ToolCommand};
use crate::workspace::{Workspace, WorkspaceLayout, WorkspaceMode};

/// Script whose presence identifies a toolchain root.
pub const EXTRACT_SCRIPT: &str = "extract-firmware.sh";
pub const BUILD_SCRIPT: &str = "build-firmware.sh";
pub const EXTRACT_MULTI_SCRIPT: &str = "extract-multisquashfs-firmware.sh";
pub const BUILD_MULTI_SCRIPT: &str = "build-multisquashfs-firmware.sh";
pub const IPK_INSTALL_SCRIPT: &str = "ipkg_install.sh";
pub const IPK_REMOVE_SCRIPT: &str = "ipkg_remove.sh";
pub const FOOTER_SCRIPT: &str = "linksys_footer.sh";
/// Artifact written by the footer script into its working directory.
pub const FOOTER_OUTPUT: &str = "modified_checksum.img";

/// Environment variable naming the toolchain root.
pub const TOOLCHAIN_ENV: &str = "FMK_PATH";

const DEFAULT_LOCATIONS: [&str; 3] =
    ["external/firmware_mod_kit", "firmware_mod_kit", "/opt/firmware-mod-kit"];

/// Padding flags passed through to the build scripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildFlags {
    /// `-nopad`: do not pad the image to its original size.
    pub nopad: bool,
    /// `-min`: use the minimum (1 MiB) block size. Ignored when `nopad` is set.
    pub min_block: bool,
}

impl BuildFlags {
    pub fn to_args(self) -> Vec<&'static str> {
        if self.nopad {
            vec!["-nopad"]
        } else if self.min_block {
            vec!["-min"]
        } else {
            Vec::new()
        }
    }
}

/// The firmware extraction/build script collection, invoked as opaque processes.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub root: PathBuf,
    pub sudo_extract: SudoMode,
    pub sudo_build: SudoMode,
}

impl Toolchain {
    /// Find a toolchain root: explicit path, `FMK_PATH`, then well-known locations.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(p) = explicit {
            candidates.push(p.to_path_buf());
        }
        if let Some(p) = env::var_os(TOOLCHAIN_ENV) {
            candidates.push(PathBuf::from(p));
        }
        candidates.extend(DEFAULT_LOCATIONS.iter().map(PathBuf::from));

        candidates.into_iter().map(|c| absolute(&c)).find(|c| c.join(EXTRACT_SCRIPT).is_file())
    }

    pub fn new(root: impl Into<PathBuf>) -> WorkbenchResult<Self> {
        let root = absolute(&root.into());
        if !root.is_dir() {
            return Err(WorkbenchError::MissingPrerequisite(format!(
                "toolchain root not found: {}",
                root.display()
            )));
        }
        Ok(Self { root, sudo_extract: SudoMode::Auto, sudo_build: SudoMode::Auto })
    }

    /// Resolve from configuration (explicit flag wins over the config file).
    pub fn from_config(explicit: Option<&Path>, config: &ToolchainConfig) -> WorkbenchResult<Self> {
        let preferred = explicit.or(config.root.as_deref());
        let root = Self::locate(preferred).ok_or_else(|| {
            WorkbenchError::MissingPrerequisite(format!(
                "toolchain not found (pass --fmk, set fmk.root or {TOOLCHAIN_ENV})"
            ))
        })?;
        let mut toolchain = Self::new(root)?;
        toolchain.sudo_extract = config.use_sudo_extract;
        toolchain.sudo_build = config.use_sudo_build;
        Ok(toolchain)
    }

    pub fn script(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn command(&self, script: &str, sudo: SudoMode) -> WorkbenchResult<ToolCommand> {
        let path = self.script(script);
        if !path.is_file() {
            return Err(WorkbenchError::ToolNotFound(path.display().to_string()));
        }
        ensure_executable(&path);
        Ok(ToolCommand::new(path).cwd(&self.root).sudo(should_escalate(sudo)))
    }

    /// Extract a firmware image into a fresh single-segment workspace.
    pub fn extract_single(
        &self,
        firmware: &Path,
        workspace_dir: &Path,
        log: LogSink<'_>,
    ) -> WorkbenchResult<Workspace> {
        self.extract_with(EXTRACT_SCRIPT, firmware, workspace_dir, log)
    }

    /// Extract every filesystem segment of a firmware image.
    pub fn extract_multi(
        &self,
        firmware: &Path,
        workspace_dir: &Path,
        log: LogSink<'_>,
    ) -> WorkbenchResult<Workspace> {
        let workspace = self.extract_with(EXTRACT_MULTI_SCRIPT, firmware, workspace_dir, log)?;
        if workspace.mode != WorkspaceMode::Multi {
            return Err(WorkbenchError::MissingPrerequisite(
                "no filesystem segments detected in multi-segment extraction".to_string(),
            ));
        }
        Ok(workspace)
    }

    fn extract_with(
        &self,
        script: &str,
        firmware: &Path,
        workspace_dir: &Path,
        log: LogSink<'_>,
    ) -> WorkbenchResult<Workspace> {
        if !firmware.is_file() {
            return Err(WorkbenchError::MissingPrerequisite(format!(
                "firmware not found: {}",
                firmware.display()
            )));
        }
        let workspace_dir = absolute(workspace_dir);
        if workspace_dir.exists() {
            return Err(WorkbenchError::WorkspaceExists(workspace_dir));
        }
        if let Some(parent) = workspace_dir.parent() {
            fs::create_dir_all(parent)?;
        }

        let cmd = self
            .command(script, self.sudo_extract)?
            .arg(absolute(firmware))
            .arg(&workspace_dir);
        run_tool(&cmd, log)?;

        let workspace = Workspace::open(&workspace_dir)?;
        for path in workspace.snapshot_all()? {
            log(&format!("[snapshot] {}", path.display()));
        }
        info!(
            "Extracted {} segment(s) into {}",
            workspace.registry.len(),
            workspace_dir.display()
        );
        Ok(workspace)
    }

    /// Run the build script matching the workspace mode.
    ///
    /// Returns the path of `new-firmware.bin`; its absence after a zero exit is a failure.
    pub fn build(
        &self,
        workspace: &Workspace,
        flags: BuildFlags,
        log: LogSink<'_>,
    ) -> WorkbenchResult<PathBuf> {
        let script = match workspace.mode {
            WorkspaceMode::Single => BUILD_SCRIPT,
            WorkspaceMode::Multi => BUILD_MULTI_SCRIPT,
        };
        let cmd = self
            .command(script, self.sudo_build)?
            .arg(&workspace.layout.root)
            .args(flags.to_args());
        let output = run_tool(&cmd, log)?;

        let layout = WorkspaceLayout::new(&workspace.layout.root);
        if !layout.build_output.is_file() {
            return Err(WorkbenchError::ToolInvocation {
                tool: script.to_string(),
                status: format!("no output file {}", layout.build_output.display()),
                output: output.text(),
            });
        }
        Ok(layout.build_output)
    }

    /// Install an `.ipk` package into the workspace tree.
    pub fn install_ipk(
        &self,
        workspace: &Workspace,
        ipk: &Path,
        log: LogSink<'_>,
    ) -> WorkbenchResult<()> {
        self.run_ipk(IPK_INSTALL_SCRIPT, workspace, ipk, log)
    }

    /// Remove the files of an `.ipk` package from the workspace tree.
    pub fn remove_ipk(
        &self,
        workspace: &Workspace,
        ipk: &Path,
        log: LogSink<'_>,
    ) -> WorkbenchResult<()> {
        self.run_ipk(IPK_REMOVE_SCRIPT, workspace, ipk, log)
    }

    fn run_ipk(
        &self,
        script: &str,
        workspace: &Workspace,
        ipk: &Path,
        log: LogSink<'_>,
    ) -> WorkbenchResult<()> {
        if !ipk.is_file() {
            return Err(WorkbenchError::MissingPrerequisite(format!(
                "package not found: {}",
                ipk.display()
            )));
        }
        let cmd = self
            .command(script, SudoMode::Never)?
            .arg(absolute(ipk))
            .arg(&workspace.layout.root);
        run_tool(&cmd, log)?;
        Ok(())
    }

    /// Best-effort vendor footer repair.
    ///
    /// A missing script is a skipped step (`Ok(None)`), not an error. Any
    /// output left by an earlier run is removed first, so `Some` always names
    /// an image written by this invocation.
    pub fn repair_footer(
        &self,
        firmware: &Path,
        log: LogSink<'_>,
    ) -> WorkbenchResult<Option<PathBuf>> {
        let script = self.script(FOOTER_SCRIPT);
        if !script.is_file() {
            log("[build] Footer repair script not found, skipping.");
            warn!("{} not found in {}", FOOTER_SCRIPT, self.root.display());
            return Ok(None);
        }
        let repaired = self.root.join(FOOTER_OUTPUT);
        match fs::remove_file(&repaired) {
            Ok(()) => info!("Removed stale {}", repaired.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let cmd = self.command(FOOTER_SCRIPT, SudoMode::Never)?.arg(firmware);
        run_tool(&cmd, log)?;
        Ok(repaired.is_file().then_some(repaired))
    }
}

/// Absolute form of `path` without touching the filesystem.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
