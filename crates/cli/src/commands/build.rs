use std::path::Path;

use anyhow::{Context, Result};
use fwbench_core::build::{rebuild, BuildOptions};
use fwbench_core::estimate::{check_segment_budget, BudgetStatus};
use fwbench_core::tools::{BuildFlags, Toolchain};

use crate::commands::{open_workspace, print_json, resolve_toolchain, select_segment};
use crate::{stderr_sink, GlobalOpts};

/// Predict the packaged size of a segment and compare it with its original span.
pub fn estimate_command(
    globals: &GlobalOpts,
    workspace: &str,
    segment: Option<String>,
    json: bool,
) -> Result<()> {
    let config = globals.load_config()?;
    let workspace = open_workspace(workspace)?;
    let segment = select_segment(&workspace, segment.as_deref())?;

    // The toolchain is optional here; it only helps resolve a relative MKFS.
    let explicit = globals.fmk.as_deref().map(Path::new);
    let toolchain_root = Toolchain::from_config(explicit, &config.fmk).ok().map(|t| t.root);

    let report = check_segment_budget(
        segment,
        config.tools.mksquashfs.as_deref(),
        toolchain_root.as_deref(),
        &stderr_sink,
    )
    .with_context(|| format!("Failed to estimate segment '{}'", segment.name))?;

    if json {
        return print_json(&report);
    }
    match report {
        None => println!("[{}] Original rootfs span unknown (metadata incomplete)", segment.name),
        Some(report) => {
            println!("[{}] {report}", segment.name);
            match report.status {
                BudgetStatus::Overflow => {
                    println!("Warning: predicted filesystem exceeds the original rootfs span")
                }
                BudgetStatus::LowHeadroom => println!("Warning: low free space in rootfs span"),
                BudgetStatus::Fits => {}
            }
        }
    }
    Ok(())
}

/// Rebuild the workspace into a firmware image and copy it to the output dir.
#[allow(clippy::too_many_arguments)]
pub fn build_command(
    globals: &GlobalOpts,
    workspace: &str,
    flags: BuildFlags,
    footer_fix: bool,
    allow_overflow: bool,
    skip_estimate: bool,
    firmware_name: Option<String>,
    json: bool,
) -> Result<()> {
    let config = globals.load_config()?;
    let toolchain = resolve_toolchain(globals, &config)?;
    let workspace = open_workspace(workspace)?;

    let firmware_name = firmware_name.or_else(|| {
        workspace.layout.root.file_name().map(|n| format!("{}.bin", n.to_string_lossy()))
    });
    let options = BuildOptions {
        flags,
        footer_fix,
        allow_overflow,
        skip_budget: skip_estimate,
        firmware_name,
        output_dir: config.output_dir.clone(),
        packer: config.tools.mksquashfs.clone(),
    };

    let outcome = rebuild(&toolchain, &workspace, &options, &stderr_sink)
        .with_context(|| format!("Failed to rebuild {}", workspace.layout.root.display()))?;

    if json {
        return print_json(&outcome);
    }
    println!("Rebuilt firmware:");
    println!("  Built: {}", outcome.built.display());
    println!("  Footer repaired: {}", if outcome.footer_repaired { "yes" } else { "no" });
    println!("  Output: {}", outcome.artifact.display());
    for budget in &outcome.budgets {
        match &budget.report {
            Some(report) => println!("  [{}] {report}", budget.segment),
            None => println!("  [{}] span unknown", budget.segment),
        }
    }
    Ok(())
}
