use std::path::PathBuf;

use anyhow::{Context, Result};
use fwbench_core::snapshot::{default_export_name, diff, export_diff, summarize_changes};

use crate::commands::{open_workspace, print_json, select_segment};

/// List files that differ between the snapshot and the live tree.
///
/// Takes the snapshot first when it does not exist yet.
pub fn diff_list_command(workspace: &str, segment: Option<String>, json: bool) -> Result<()> {
    let workspace = open_workspace(workspace)?;
    let segment = select_segment(&workspace, segment.as_deref())?;
    let rootfs = segment.require_rootfs()?;
    if !segment.snapshot_dir().is_dir() {
        eprintln!("No snapshot (rootfs_original) found; creating it now.");
    }
    let snapshot = segment.ensure_snapshot()?;

    let summary = summarize_changes(&snapshot, &rootfs);
    if json {
        return print_json(&summary);
    }
    for entry in summary.entries() {
        println!("{} {}", entry.kind.marker(), entry.path);
    }
    println!("{}", summary.counts_line());
    Ok(())
}

/// Show the unified diff of one file.
///
/// `export` writes it to a file as well; `Some(None)` uses the default `.diff` name.
pub fn diff_show_command(
    workspace: &str,
    segment: Option<String>,
    path: &str,
    export: Option<Option<String>>,
) -> Result<()> {
    let workspace = open_workspace(workspace)?;
    let segment = select_segment(&workspace, segment.as_deref())?;
    let rootfs = segment.require_rootfs()?;
    let snapshot = segment.ensure_snapshot()?;

    for line in diff(&snapshot, &rootfs, path)? {
        println!("{line}");
    }

    if let Some(dest) = export {
        let dest = dest.map(PathBuf::from).unwrap_or_else(|| default_export_name(path).into());
        export_diff(&snapshot, &rootfs, path, &dest)
            .with_context(|| format!("Failed to export diff to {}", dest.display()))?;
        eprintln!("Diff exported to {}", dest.display());
    }
    Ok(())
}
