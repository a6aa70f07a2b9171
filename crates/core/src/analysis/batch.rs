use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::{FirmwareAnalyzer, Finding};
use crate::error::WorkbenchResult;
use crate::tools::LogSink;
use crate::workspace::Segment;

/// Message fragments that mark a finding as a consolidated risk even without a tag.
const RISK_KEYWORDS: [&str; 3] = ["no password", "telnet enabled", "ftp enabled"];

/// Findings for one segment of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentReport {
    pub segment: String,
    pub findings: Vec<Finding>,
}

/// A risk finding lifted out of a segment report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidatedRisk {
    pub segment: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// One report per segment, in registry order.
    pub segments: Vec<SegmentReport>,
    pub risks: Vec<ConsolidatedRisk>,
}

impl BatchReport {
    pub fn risk_lines(&self) -> Vec<String> {
        self.risks.iter().map(|r| format!("[{}] {}", r.segment, r.message)).collect()
    }
}

/// Whether a finding belongs in the consolidated risk list.
pub fn is_consolidated_risk(finding: &Finding) -> bool {
    if finding.risk.is_some_and(|k| k.is_consolidated()) {
        return true;
    }
    let message = finding.message.to_lowercase();
    RISK_KEYWORDS.iter().any(|k| message.contains(k))
}

/// Analyze one extracted segment of `firmware`.
///
/// Fails with `NotExtracted` when the segment has no `rootfs` and with a
/// metadata error when its span cannot be derived.
pub fn analyze_segment(
    analyzer: &FirmwareAnalyzer,
    segment: &Segment,
    firmware: &Path,
    log: LogSink<'_>,
) -> WorkbenchResult<Vec<Finding>> {
    segment.require_rootfs()?;
    let span = segment.metadata.rootfs_span()?;
    let offset = segment.metadata.fs_offset.unwrap_or_default();
    analyzer.analyze(firmware, offset, span, log)
}

/// Analyze every segment concurrently.
///
/// A segment whose span is invalid gets a single "cannot compute" finding and
/// is not unpacked; any other failure becomes a finding for that segment only.
pub fn analyze_segments(
    analyzer: &FirmwareAnalyzer,
    segments: &[Segment],
    firmware: &Path,
    log: LogSink<'_>,
) -> BatchReport {
    let reports: Vec<SegmentReport> = segments
        .par_iter()
        .map(|segment| {
            let prefixed = |line: &str| log(&format!("[{}] {line}", segment.name));
            let findings = run_isolated(analyzer, segment, firmware, &prefixed);
            SegmentReport { segment: segment.name.clone(), findings }
        })
        .collect();

    let report = consolidate(reports);
    info!(
        "Batch analysis finished: {} segment(s), {} risk(s)",
        report.segments.len(),
        report.risks.len()
    );
    report
}

/// Collect the consolidated risk list across segment reports.
pub fn consolidate(reports: Vec<SegmentReport>) -> BatchReport {
    let risks = reports
        .iter()
        .flat_map(|r| {
            r.findings.iter().filter(|f| is_consolidated_risk(f)).map(|f| ConsolidatedRisk {
                segment: r.segment.clone(),
                message: f.message.clone(),
            })
        })
        .collect();
    BatchReport { segments: reports, risks }
}

fn run_isolated(
    analyzer: &FirmwareAnalyzer,
    segment: &Segment,
    firmware: &Path,
    log: LogSink<'_>,
) -> Vec<Finding> {
    if let Err(e) = segment.metadata.rootfs_span() {
        log(&format!("Skipping: {e}"));
        return vec![Finding::info(format!("Cannot compute rootfs span: {e}"))];
    }

    let outcome =
        panic::catch_unwind(AssertUnwindSafe(|| analyze_segment(analyzer, segment, firmware, log)));
    match outcome {
        Ok(Ok(findings)) => findings,
        Ok(Err(e)) => {
            warn!("Analysis of segment {} failed: {}", segment.name, e);
            log(&format!("Analysis failed: {e}"));
            vec![Finding::info(format!("Analysis failed [{}]: {e}", e.classification()))]
        }
        Err(_) => {
            warn!("Analysis of segment {} panicked", segment.name);
            vec![Finding::info("Analysis failed [internal]: worker panicked")]
        }
    }
}
