use std::path::Path;

use anyhow::{Context, Result};
use fwbench_core::analysis::checks::inspect_tree;
use fwbench_core::analysis::{consolidate, BatchReport, SegmentReport};
use fwbench_core::config::WorkbenchConfig;
use fwbench_core::jobs::Session;
use fwbench_core::workspace::Workspace;

use crate::commands::{open_workspace, print_findings, print_json, select_segment};
use crate::{canonicalize_or_current, stderr_sink, GlobalOpts};

/// Run analysis as a background job and wait for it, streaming progress to stderr.
///
/// `all` analyzes every segment concurrently; otherwise only `segment` (or the
/// first segment) is analyzed.
pub fn run_analysis(
    config: &WorkbenchConfig,
    workspace: &Workspace,
    firmware: &Path,
    segment: Option<&str>,
    all: bool,
) -> Result<BatchReport> {
    let mut session = Session::new(config.clone());
    session.workspace = Some(workspace.clone());
    session.set_firmware(firmware);

    if all {
        let job = session.analyze_all()?;
        return Ok(job.wait_with(stderr_sink)?);
    }

    if let Some(name) = segment {
        session.select_segment(name)?;
    }
    let name = session.selected_segment()?.name.clone();
    let job = session.analyze_selected()?;
    let findings = job
        .wait_with(stderr_sink)?
        .with_context(|| format!("Analysis of segment '{name}' failed"))?;
    Ok(consolidate(vec![SegmentReport { segment: name, findings }]))
}

/// Analyze one segment (or all with `--all`) of a workspace against its source image.
pub fn analyze_command(
    globals: &GlobalOpts,
    workspace: &str,
    firmware: &str,
    segment: Option<String>,
    all: bool,
    json: bool,
) -> Result<()> {
    let config = globals.load_config()?;
    let workspace = open_workspace(workspace)?;
    let firmware = canonicalize_or_current(firmware)?;

    let report = run_analysis(&config, &workspace, &firmware, segment.as_deref(), all)?;

    if json {
        return print_json(&report);
    }
    for seg in &report.segments {
        println!("[{}] Findings ({}):", seg.segment, seg.findings.len());
        print_findings(&seg.findings);
    }
    println!("Risks ({}):", report.risks.len());
    if report.risks.is_empty() {
        println!("  (none)");
    }
    for line in report.risk_lines() {
        println!("  {line}");
    }
    Ok(())
}

/// Run the filesystem-content checks directly against a segment's live tree.
pub fn audit_command(workspace: &str, segment: Option<String>, json: bool) -> Result<()> {
    let workspace = open_workspace(workspace)?;
    let segment = select_segment(&workspace, segment.as_deref())?;
    let rootfs = segment.require_rootfs()?;

    let findings = inspect_tree(&rootfs);
    if json {
        return print_json(&findings);
    }
    println!("[{}] Audit of {}:", segment.name, rootfs.display());
    print_findings(&findings);
    Ok(())
}
