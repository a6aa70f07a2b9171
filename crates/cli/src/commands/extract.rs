use anyhow::{Context, Result};
use fwbench_core::workspace::{default_workspace_name, WorkspaceMode};

use crate::commands::{print_findings, resolve_toolchain, run_analysis};
use crate::{canonicalize_or_current, stderr_sink, GlobalOpts};

/// Extract a firmware image into a new workspace under the configured workspaces dir.
pub fn extract_command(
    globals: &GlobalOpts,
    firmware: &str,
    name: Option<String>,
    multi: bool,
    analyze: bool,
) -> Result<()> {
    let config = globals.load_config()?;
    let toolchain = resolve_toolchain(globals, &config)?;
    let firmware_path = canonicalize_or_current(firmware)?;

    let name = name.unwrap_or_else(default_workspace_name);
    let workspace_dir = config.workspaces_dir.join(&name);

    let workspace = if multi {
        toolchain.extract_multi(&firmware_path, &workspace_dir, &stderr_sink)
    } else {
        toolchain.extract_single(&firmware_path, &workspace_dir, &stderr_sink)
    }
    .with_context(|| format!("Failed to extract {}", firmware_path.display()))?;

    println!("Extracted workspace:");
    println!("  Root: {}", workspace.layout.root.display());
    println!(
        "  Mode: {}",
        match workspace.mode {
            WorkspaceMode::Single => "single",
            WorkspaceMode::Multi => "multi",
        }
    );
    println!("  Segments ({}):", workspace.registry.len());
    for segment in workspace.registry.list() {
        println!("    - {} ({})", segment.name, segment.directory.display());
    }

    if analyze {
        let report = run_analysis(&config, &workspace, &firmware_path, None, true)?;
        for seg in &report.segments {
            println!("[{}] Findings:", seg.segment);
            print_findings(&seg.findings);
        }
        if !report.risks.is_empty() {
            println!("Risks:");
            for line in report.risk_lines() {
                println!("  {line}");
            }
        }
    }

    Ok(())
}
