//! Rebuild orchestration: budget gate, packaging, footer repair, output copy.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::estimate::{check_segment_budget, BudgetReport, BudgetStatus};
use crate::metadata::load_config_log;
use crate::tools::{BuildFlags, LogSink, Toolchain};
use crate::workspace::{Workspace, WorkspaceMode};

/// Prefix of the stable artifact name in the output directory.
pub const OUTPUT_PREFIX: &str = "rebuilt_";

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub flags: BuildFlags,
    /// Run vendor footer repair when the image qualifies.
    pub footer_fix: bool,
    /// Build even when a segment is predicted not to fit.
    pub allow_overflow: bool,
    /// Skip the pre-build estimate entirely.
    pub skip_budget: bool,
    /// Name of the source image; the artifact is `rebuilt_<name>`.
    pub firmware_name: Option<String>,
    pub output_dir: PathBuf,
    /// Packaging tool override for the estimate.
    pub packer: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentBudget {
    pub segment: String,
    /// `None` when the original span is unknown.
    pub report: Option<BudgetReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    /// `new-firmware.bin` inside the workspace.
    pub built: PathBuf,
    pub footer_repaired: bool,
    /// Copy in the output directory.
    pub artifact: PathBuf,
    pub budgets: Vec<SegmentBudget>,
}

/// Predict every extracted segment and refuse to continue on overflow
/// unless `allow_overflow` is set.
pub fn budget_gate(
    workspace: &Workspace,
    toolchain_root: Option<&Path>,
    options: &BuildOptions,
    log: LogSink<'_>,
) -> WorkbenchResult<Vec<SegmentBudget>> {
    let mut budgets = Vec::new();
    for segment in workspace.registry.list().iter().filter(|s| s.is_extracted()) {
        let report =
            check_segment_budget(segment, options.packer.as_deref(), toolchain_root, log)?;
        if let Some(report) = report {
            log(&format!("[build] {}: {report}", segment.name));
            match report.status {
                BudgetStatus::Overflow if !options.allow_overflow => {
                    return Err(WorkbenchError::BudgetExceeded { remaining: report.remaining });
                }
                BudgetStatus::Overflow => {
                    warn!("Segment {} exceeds its span; continuing as confirmed", segment.name)
                }
                BudgetStatus::LowHeadroom => {
                    warn!("Segment {} has low headroom ({} bytes)", segment.name, report.remaining)
                }
                BudgetStatus::Fits => {}
            }
        }
        budgets.push(SegmentBudget { segment: segment.name.clone(), report });
    }
    Ok(budgets)
}

/// Whether the rebuilt image should go through vendor footer repair.
///
/// A multi-segment top-level log only lists segment paths, so each segment's
/// own metadata is consulted instead; any candidate segment qualifies.
pub fn footer_repair_candidate(workspace: &Workspace) -> WorkbenchResult<bool> {
    match workspace.mode {
        WorkspaceMode::Single => {
            Ok(load_config_log(&workspace.layout.config_log)?.metadata.is_footer_repair_candidate())
        }
        WorkspaceMode::Multi => Ok(workspace
            .registry
            .list()
            .iter()
            .any(|s| s.metadata.is_footer_repair_candidate())),
    }
}

/// Rebuild the workspace image and copy it to the output directory.
pub fn rebuild(
    toolchain: &Toolchain,
    workspace: &Workspace,
    options: &BuildOptions,
    log: LogSink<'_>,
) -> WorkbenchResult<BuildOutcome> {
    let budgets = if options.skip_budget {
        Vec::new()
    } else {
        budget_gate(workspace, Some(&toolchain.root), options, log)?
    };

    let built = toolchain.build(workspace, options.flags, log)?;
    log(&format!("[build] Built {}", built.display()));

    let mut source = built.clone();
    let mut footer_repaired = false;
    if options.footer_fix {
        if footer_repair_candidate(workspace)? {
            if let Some(repaired) = toolchain.repair_footer(&built, log)? {
                log(&format!("[build] Footer repaired: {}", repaired.display()));
                source = repaired;
                footer_repaired = true;
            }
        } else {
            log("[build] Image is not a footer repair candidate, skipping.");
        }
    }

    let name = options.firmware_name.as_deref().unwrap_or("firmware.bin");
    fs::create_dir_all(&options.output_dir)?;
    let artifact = options.output_dir.join(format!("{OUTPUT_PREFIX}{name}"));
    fs::copy(&source, &artifact)?;
    info!("Rebuilt image copied to {}", artifact.display());

    Ok(BuildOutcome { built, footer_repaired, artifact, budgets })
}
