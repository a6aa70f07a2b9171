use anyhow::Result;
use serde::Serialize;

use fwbench_core::workspace::WorkspaceMode;

use crate::commands::{open_workspace, print_json, select_segment};

#[derive(Debug, Serialize)]
struct SegmentSummary<'a> {
    name: &'a str,
    directory: String,
    extracted: bool,
    snapshot: bool,
    span: Option<i64>,
}

/// List the segments of a workspace.
pub fn segments_command(workspace: &str, json: bool) -> Result<()> {
    let workspace = open_workspace(workspace)?;
    let summaries: Vec<SegmentSummary<'_>> = workspace
        .registry
        .list()
        .iter()
        .map(|s| SegmentSummary {
            name: &s.name,
            directory: s.directory.display().to_string(),
            extracted: s.is_extracted(),
            snapshot: s.snapshot_dir().is_dir(),
            span: s.metadata.original_span(),
        })
        .collect();

    if json {
        return print_json(&summaries);
    }

    let mode = match workspace.mode {
        WorkspaceMode::Single => "single",
        WorkspaceMode::Multi => "multi",
    };
    println!("Segments ({}, {mode} mode):", summaries.len());
    for s in &summaries {
        let span = s.span.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "  - {} [rootfs: {}] [snapshot: {}] span={} dir={}",
            s.name,
            if s.extracted { "yes" } else { "no" },
            if s.snapshot { "yes" } else { "no" },
            span,
            s.directory
        );
    }
    Ok(())
}

/// Show the metadata of a segment.
pub fn metadata_command(workspace: &str, segment: Option<String>, json: bool) -> Result<()> {
    let workspace = open_workspace(workspace)?;
    let segment = select_segment(&workspace, segment.as_deref())?;
    if json {
        return print_json(&segment.metadata);
    }
    println!("[{}] Metadata:", segment.name);
    for line in segment.metadata.render() {
        println!("  {line}");
    }
    Ok(())
}
