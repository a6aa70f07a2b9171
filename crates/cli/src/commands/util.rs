use std::path::Path;

use anyhow::{Context, Result};
use fwbench_core::analysis::Finding;
use fwbench_core::config::WorkbenchConfig;
use fwbench_core::tools::Toolchain;
use fwbench_core::workspace::{Segment, Workspace};
use serde::Serialize;

use crate::{canonicalize_or_current, GlobalOpts};

/// Resolve the toolchain from `--fmk`, the config file, `FMK_PATH` and well-known locations.
pub fn resolve_toolchain(globals: &GlobalOpts, config: &WorkbenchConfig) -> Result<Toolchain> {
    let explicit = globals.fmk.as_deref().map(Path::new);
    Toolchain::from_config(explicit, &config.fmk).context("Failed to resolve firmware toolchain")
}

/// Open an existing workspace directory.
pub fn open_workspace(root: &str) -> Result<Workspace> {
    let root_path = canonicalize_or_current(root)?;
    Workspace::open(&root_path)
        .with_context(|| format!("Failed to open workspace {}", root_path.display()))
}

/// Pick `--segment`, or the first segment when none is given.
pub fn select_segment<'a>(workspace: &'a Workspace, segment: Option<&str>) -> Result<&'a Segment> {
    Ok(workspace.select(segment)?)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
    println!("{}", serialized);
    Ok(())
}

/// Print findings, flagging risk-tagged ones.
pub fn print_findings(findings: &[Finding]) {
    if findings.is_empty() {
        println!("  (none)");
        return;
    }
    for finding in findings {
        let marker = if finding.is_risk() { "!" } else { "-" };
        println!("  {marker} {}", finding.message);
    }
}
