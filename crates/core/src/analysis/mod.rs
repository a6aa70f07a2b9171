//! Heuristic security analysis of firmware segments.
//!
//! A run over one segment reads the boot-delay byte, carves the segment's
//! filesystem out of the image, unpacks it with the external unpacker into a
//! scratch directory, inspects a handful of well-known configuration files and
//! finally samples the entropy of the whole image. Failures along the way turn
//! into findings instead of aborting the run.

mod batch;
pub mod checks;
pub mod entropy;

pub use batch::*;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AnalysisConfig, ToolPaths};
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::tools::{run_tool, LogSink, ToolCommand};

use checks::{inspect_tree, BootDelay, BOOT_DELAY_OFFSET};
use entropy::sample_entropy;

/// Risk tag attached to a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    RootNoPassword,
    TelnetEnabled,
    FtpEnabled,
    SerialConsole,
    AnomalousBootDelay,
}

impl RiskKind {
    /// Risks that are consolidated across segments after a batch run.
    pub fn is_consolidated(self) -> bool {
        matches!(self, RiskKind::RootNoPassword | RiskKind::TelnetEnabled | RiskKind::FtpEnabled)
    }
}

/// One analysis observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskKind>,
}

impl Finding {
    pub fn info(message: impl Into<String>) -> Self {
        Self { message: message.into(), risk: None }
    }

    pub fn risk(kind: RiskKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), risk: Some(kind) }
    }

    pub fn is_risk(&self) -> bool {
        self.risk.is_some()
    }
}

/// Runs the per-segment check sequence.
#[derive(Debug, Clone)]
pub struct FirmwareAnalyzer {
    /// Filesystem unpacker, invoked as `<unsquashfs> -d <dest> <image>`.
    pub unsquashfs: PathBuf,
    pub unpack_timeout: Duration,
    pub entropy_samples: usize,
    pub entropy_window: usize,
}

impl Default for FirmwareAnalyzer {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default(), &ToolPaths::default())
    }
}

impl FirmwareAnalyzer {
    pub fn from_config(analysis: &AnalysisConfig, tools: &ToolPaths) -> Self {
        Self {
            unsquashfs: tools.unsquashfs.clone().unwrap_or_else(|| PathBuf::from("unsquashfs")),
            unpack_timeout: analysis.unpack_timeout(),
            entropy_samples: analysis.entropy_samples,
            entropy_window: analysis.entropy_window,
        }
    }

    /// Analyze the filesystem stored at `offset..offset + size` of `firmware`.
    ///
    /// Only a missing firmware file is an error; every other failure is
    /// reported as a finding. The scratch directory is always removed.
    pub fn analyze(
        &self,
        firmware: &Path,
        offset: u64,
        size: u64,
        log: LogSink<'_>,
    ) -> WorkbenchResult<Vec<Finding>> {
        if !firmware.is_file() {
            return Err(WorkbenchError::MissingPrerequisite(format!(
                "firmware not found: {}",
                firmware.display()
            )));
        }
        let mut findings = Vec::new();

        log(">> Checking boot delay ...");
        findings.push(match read_boot_delay(firmware) {
            Ok(Some(value)) => BootDelay::classify(value).finding(),
            Ok(None) => Finding::info(format!(
                "Boot delay byte not present (image shorter than 0x{:X} bytes)",
                BOOT_DELAY_OFFSET + 1
            )),
            Err(e) => Finding::info(format!("Boot delay unreadable: {e}")),
        });

        log(&format!(">> Unpacking filesystem at 0x{offset:X} ({size} bytes) ..."));
        findings.extend(self.unpack_and_inspect(firmware, offset, size, log));

        findings.push(self.entropy_finding(firmware));
        info!(
            "Analysis of {} at 0x{:X}: {} finding(s)",
            firmware.display(),
            offset,
            findings.len()
        );
        Ok(findings)
    }

    fn unpack_and_inspect(
        &self,
        firmware: &Path,
        offset: u64,
        size: u64,
        log: LogSink<'_>,
    ) -> Vec<Finding> {
        let scratch = match tempfile::Builder::new().prefix("fw-rootfs-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return vec![Finding::info(format!("Scratch directory unavailable: {e}"))],
        };

        let image = scratch.path().join("rootfs.bin");
        let unpacked = scratch.path().join("unpacked");
        let findings = match carve(firmware, offset, size, &image) {
            Err(e) => vec![Finding::info(format!("Filesystem carve failed: {e}"))],
            Ok(_) => {
                let cmd = ToolCommand::new(&self.unsquashfs)
                    .arg("-d")
                    .arg(&unpacked)
                    .arg(&image)
                    .timeout(self.unpack_timeout);
                match run_tool(&cmd, log) {
                    Ok(_) => inspect_tree(&unpacked),
                    Err(e) => {
                        warn!("Unpack failed: {}", e);
                        vec![Finding::info(format!(
                            "Filesystem unpack failed [{}]: {e}",
                            e.classification()
                        ))]
                    }
                }
            }
        };

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch dir {}: {}", scratch_path.display(), e);
            log(&format!("[analysis] failed to remove {}: {e}", scratch_path.display()));
        }
        findings
    }

    fn entropy_finding(&self, firmware: &Path) -> Finding {
        let mut rng = rand::thread_rng();
        match sample_entropy(firmware, self.entropy_window, self.entropy_samples, &mut rng) {
            Ok(Some(stats)) => Finding::info(format!("Firmware entropy: {stats}")),
            Ok(None) => Finding::info("Firmware entropy: -"),
            Err(e) => Finding::info(format!("Firmware entropy unavailable: {e}")),
        }
    }
}

/// Read the boot-delay byte; `None` when the image is too short.
pub fn read_boot_delay(firmware: &Path) -> io::Result<Option<u8>> {
    let mut file = File::open(firmware)?;
    file.seek(SeekFrom::Start(BOOT_DELAY_OFFSET))?;
    let mut byte = [0u8; 1];
    match file.read(&mut byte)? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

/// Copy `size` bytes starting at `offset` of `firmware` into `dest`.
///
/// Images truncated before `offset + size` yield a shorter carve.
pub fn carve(firmware: &Path, offset: u64, size: u64, dest: &Path) -> io::Result<u64> {
    let mut src = File::open(firmware)?;
    src.seek(SeekFrom::Start(offset))?;
    let mut out = File::create(dest)?;
    io::copy(&mut src.take(size), &mut out)
}
