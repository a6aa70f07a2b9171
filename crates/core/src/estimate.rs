//! Packaged-size prediction and flash budget accounting.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::WorkbenchResult;
use crate::metadata::Metadata;
use crate::tools::{ensure_executable, resolve_tool, run_tool, LogSink, ToolCommand};
use crate::workspace::Segment;

/// Remaining bytes below which a rebuild is flagged as low headroom.
pub const LOW_HEADROOM: i64 = 65536;

const DEFAULT_PACKER: &str = "mksquashfs";
const KNOWN_COMPRESSORS: [&str; 3] = ["lzma", "xz", "gzip"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMethod {
    /// Size of a throwaway image produced by the packaging tool.
    Packaged,
    /// Plain sum of file sizes; used when packaging is unavailable or fails.
    FolderSum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Estimate {
    pub bytes: u64,
    pub method: EstimateMethod,
}

/// Pick the packaging tool: explicit override, metadata `MKFS`, then `PATH`.
///
/// A relative `MKFS` is resolved against `toolchain_root` when given.
pub fn resolve_packer(
    metadata: &Metadata,
    explicit: Option<&Path>,
    toolchain_root: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return resolve_tool(p);
    }
    if let Some(mkfs) = metadata.mkfs.as_deref() {
        let mkfs = Path::new(mkfs);
        let candidate = match toolchain_root {
            Some(root) if mkfs.is_relative() => root.join(mkfs),
            _ => mkfs.to_path_buf(),
        };
        if candidate.is_file() {
            return Some(candidate);
        }
        warn!("MKFS {} not found, falling back to PATH", candidate.display());
    }
    resolve_tool(Path::new(DEFAULT_PACKER))
}

/// Arguments after `<tree> <output>` for a prediction run.
pub fn packer_args(metadata: &Metadata) -> Vec<String> {
    let mut args = vec!["-noappend".to_string()];
    if let Some(bs) = metadata.fs_blocksize {
        args.push("-b".to_string());
        args.push(bs.to_string());
    }
    if let Some(comp) = metadata.fs_compression.as_deref() {
        if KNOWN_COMPRESSORS.contains(&comp) {
            args.push("-comp".to_string());
            args.push(comp.to_string());
        }
    }
    if let Some(extra) = metadata.fs_args.as_deref() {
        args.extend(extra.split_whitespace().map(str::to_string));
    }
    if !args.iter().any(|a| a == "-all-root") {
        args.push("-all-root".to_string());
    }
    args
}

/// Predict the packaged size of `tree`.
///
/// Never fails because of the packaging tool: a missing or failing tool
/// falls back to [`folder_size`]. The throwaway image is always removed.
pub fn estimate(
    tree: &Path,
    metadata: &Metadata,
    packer: Option<&Path>,
    log: LogSink<'_>,
) -> WorkbenchResult<Estimate> {
    let fallback = |reason: &str| -> Estimate {
        log(&format!("[estimate] {reason}, falling back to raw folder size"));
        warn!("Size prediction for {}: {}", tree.display(), reason);
        Estimate { bytes: folder_size(tree), method: EstimateMethod::FolderSum }
    };

    let Some(packer) = packer else {
        return Ok(fallback("packaging tool not found"));
    };
    ensure_executable(packer);

    let output = tempfile::Builder::new().prefix("sqfs-est-").suffix(".img").tempfile()?;
    let output = output.into_temp_path();
    let cmd =
        ToolCommand::new(packer).arg(tree).arg(output.as_os_str()).args(packer_args(metadata));
    let estimate = match run_tool(&cmd, log) {
        Ok(_) => match std::fs::metadata(&output) {
            Ok(meta) => Estimate { bytes: meta.len(), method: EstimateMethod::Packaged },
            Err(e) => fallback(&format!("prediction output unreadable ({e})")),
        },
        Err(e) => fallback(&format!("prediction failed ({})", e.classification())),
    };
    if let Err(e) = output.close() {
        warn!("Failed to remove prediction output: {}", e);
    }
    info!("Estimated {} at {} bytes ({:?})", tree.display(), estimate.bytes, estimate.method);
    Ok(estimate)
}

/// Sum of regular file sizes below `dir`; unreadable entries are skipped.
pub fn folder_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Fits,
    /// Fits with less than [`LOW_HEADROOM`] bytes to spare. Not blocking.
    LowHeadroom,
    /// Does not fit; a rebuild needs explicit confirmation.
    Overflow,
}

/// Comparison of an estimate against the original span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetReport {
    pub span: i64,
    pub estimate: u64,
    pub remaining: i64,
    pub status: BudgetStatus,
}

impl BudgetReport {
    pub fn compare(span: i64, estimate: u64) -> Self {
        let remaining = span - estimate as i64;
        let status = if remaining < 0 {
            BudgetStatus::Overflow
        } else if remaining < LOW_HEADROOM {
            BudgetStatus::LowHeadroom
        } else {
            BudgetStatus::Fits
        };
        Self { span, estimate, remaining, status }
    }
}

impl fmt::Display for BudgetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "span={} estimate={} free={}", self.span, self.estimate, self.remaining)?;
        match self.status {
            BudgetStatus::Fits => Ok(()),
            BudgetStatus::LowHeadroom => write!(f, " (low headroom)"),
            BudgetStatus::Overflow => write!(f, " (exceeds original rootfs span)"),
        }
    }
}

/// Estimate a segment's live tree and compare it with its span.
///
/// `Ok(None)` means the span is unknown; that is never reported as fitting.
pub fn check_segment_budget(
    segment: &Segment,
    packer_override: Option<&Path>,
    toolchain_root: Option<&Path>,
    log: LogSink<'_>,
) -> WorkbenchResult<Option<BudgetReport>> {
    let rootfs = segment.require_rootfs()?;
    let Some(span) = segment.metadata.original_span() else {
        log(&format!("[estimate] {}: original span unknown", segment.name));
        return Ok(None);
    };
    let packer = resolve_packer(&segment.metadata, packer_override, toolchain_root);
    let estimate = estimate(&rootfs, &segment.metadata, packer.as_deref(), log)?;
    Ok(Some(BudgetReport::compare(span, estimate.bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::parse_config_log;
    use crate::tools::null_sink;

    #[test]
    fn budget_thresholds() {
        let meta = parse_config_log("FS_OFFSET=0x240000\nFOOTER_OFFSET=0x1000000\nFOOTER_SIZE=0\n")
            .metadata;
        let span = meta.original_span().unwrap();
        assert_eq!(span, 0xDC0000);

        let fits = BudgetReport::compare(span, 0xD00000);
        assert_eq!(fits.remaining, 0xC0000);
        assert_eq!(fits.status, BudgetStatus::Fits);

        let over = BudgetReport::compare(span, 0xDC1000);
        assert_eq!(over.remaining, -0x1000);
        assert_eq!(over.status, BudgetStatus::Overflow);

        assert_eq!(BudgetReport::compare(span, 0xDC0000 - 100).status, BudgetStatus::LowHeadroom);
        assert_eq!(BudgetReport::compare(span, 0xDC0000).status, BudgetStatus::LowHeadroom);
    }

    #[test]
    fn packer_args_follow_metadata() {
        let meta = parse_config_log(
            "FS_BLOCKSIZE=131072\nFS_COMPRESSION='xz'\nFS_ARGS='-no-xattrs -all-root'\n",
        )
        .metadata;
        assert_eq!(
            packer_args(&meta),
            vec!["-noappend", "-b", "131072", "-comp", "xz", "-no-xattrs", "-all-root"]
        );

        let odd = parse_config_log("FS_COMPRESSION=zstd\n").metadata;
        assert_eq!(packer_args(&odd), vec!["-noappend", "-all-root"]);
    }

    #[test]
    fn missing_packer_falls_back_to_folder_sum() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join("etc/a"), [0u8; 100]).unwrap();
        std::fs::write(dir.path().join("b"), [0u8; 28]).unwrap();

        let est = estimate(dir.path(), &Metadata::default(), None, &null_sink).unwrap();
        assert_eq!(est, Estimate { bytes: 128, method: EstimateMethod::FolderSum });
    }

    #[cfg(unix)]
    #[test]
    fn failing_packer_falls_back_and_working_packer_is_measured() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("rootfs");
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(tree.join("f"), [0u8; 10]).unwrap();

        let failing = dir.path().join("fail.sh");
        std::fs::write(&failing, "#!/bin/sh\necho nope\nexit 1\n").unwrap();
        let working = dir.path().join("pack.sh");
        std::fs::write(&working, "#!/bin/sh\nhead -c 4096 /dev/zero > \"$2\"\n").unwrap();
        for p in [&failing, &working] {
            std::fs::set_permissions(p, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let meta = Metadata::default();
        let est = estimate(&tree, &meta, Some(&failing), &null_sink).unwrap();
        assert_eq!(est.method, EstimateMethod::FolderSum);
        assert_eq!(est.bytes, 10);

        let est = estimate(&tree, &meta, Some(&working), &null_sink).unwrap();
        assert_eq!(est, Estimate { bytes: 4096, method: EstimateMethod::Packaged });
    }
}
