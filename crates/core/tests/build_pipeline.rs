#![cfg(unix)]

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{fake_toolchain, make_firmware, write_script};
use fwbench_core::build::{
    budget_gate, footer_repair_candidate, rebuild, BuildOptions, OUTPUT_PREFIX,
};
use fwbench_core::estimate::BudgetStatus;
use fwbench_core::tools::{null_sink, Toolchain, FOOTER_OUTPUT, FOOTER_SCRIPT};
use fwbench_core::workspace::Workspace;
use fwbench_core::WorkbenchError;
use tempfile::tempdir;

/// Span is 0x4000 - 0x1000 - 8 = 12280 bytes.
const TRX_LOG: &str =
    "FW_SIZE=0x4000\nFS_OFFSET=0x1000\nFOOTER_SIZE=8\nHEADER_TYPE=trx\nFS_COMPRESSION=xz\n";

struct Fixture {
    _dir: tempfile::TempDir,
    toolchain: Toolchain,
    workspace: Workspace,
    output_dir: PathBuf,
    small_packer: PathBuf,
    large_packer: PathBuf,
}

fn packer(dir: &Path, name: &str, bytes: u64) -> PathBuf {
    let path = dir.join(name);
    write_script(&path, &format!("head -c {bytes} /dev/zero > \"$2\"\n"));
    path
}

fn fixture(config_log: &str) -> Fixture {
    let dir = tempdir().expect("tempdir");
    let fmk = fake_toolchain(dir.path(), config_log);
    let firmware = dir.path().join("fw.bin");
    make_firmware(&firmware, 3);

    let toolchain = Toolchain::new(&fmk).expect("toolchain");
    let workspace = toolchain
        .extract_single(&firmware, &dir.path().join("ws"), &null_sink)
        .expect("extract");
    let output_dir = dir.path().join("output");
    let small_packer = packer(dir.path(), "pack-small.sh", 4096);
    let large_packer = packer(dir.path(), "pack-large.sh", 0x4000);
    Fixture { _dir: dir, toolchain, workspace, output_dir, small_packer, large_packer }
}

fn options(fx: &Fixture, packer: &Path) -> BuildOptions {
    BuildOptions {
        firmware_name: Some("fw.bin".to_string()),
        output_dir: fx.output_dir.clone(),
        packer: Some(packer.to_path_buf()),
        ..BuildOptions::default()
    }
}

#[test]
fn rebuild_repairs_footer_and_copies_artifact() {
    let fx = fixture(TRX_LOG);
    let opts = BuildOptions { footer_fix: true, ..options(&fx, &fx.small_packer) };

    let outcome = rebuild(&fx.toolchain, &fx.workspace, &opts, &null_sink).expect("rebuild");

    assert!(outcome.footer_repaired);
    assert_eq!(outcome.built, fx.workspace.layout.build_output);
    assert_eq!(outcome.artifact, fx.output_dir.join(format!("{OUTPUT_PREFIX}fw.bin")));
    assert_eq!(fs::read(&outcome.artifact).expect("artifact"), b"IMAGEFOOTER");

    assert_eq!(outcome.budgets.len(), 1);
    let report = outcome.budgets[0].report.as_ref().expect("span known");
    assert_eq!(report.span, 12280);
    assert_eq!(report.remaining, 12280 - 4096);
    assert_eq!(report.status, BudgetStatus::LowHeadroom);
}

#[test]
fn non_candidate_image_skips_footer_repair() {
    let fx = fixture("FW_SIZE=0x4000\nFS_OFFSET=0x1000\nFOOTER_SIZE=0\n");
    let opts = BuildOptions { footer_fix: true, ..options(&fx, &fx.small_packer) };

    let lines = std::sync::Mutex::new(Vec::new());
    let sink = |line: &str| lines.lock().expect("lock").push(line.to_string());
    let outcome = rebuild(&fx.toolchain, &fx.workspace, &opts, &sink).expect("rebuild");

    assert!(!outcome.footer_repaired);
    assert_eq!(fs::read(&outcome.artifact).expect("artifact"), b"IMAGE");
    let lines = lines.into_inner().expect("lines");
    assert!(lines.iter().any(|l| l.contains("not a footer repair candidate")));
}

#[test]
fn overflow_blocks_build_until_confirmed() {
    let fx = fixture(TRX_LOG);
    let opts = options(&fx, &fx.large_packer);

    let err = rebuild(&fx.toolchain, &fx.workspace, &opts, &null_sink).unwrap_err();
    assert!(matches!(
        err,
        WorkbenchError::BudgetExceeded { remaining } if remaining == 12280 - 0x4000
    ));
    assert_eq!(err.classification(), "budget-exceeded");
    assert!(!fx.workspace.layout.build_output.exists());

    let confirmed = BuildOptions { allow_overflow: true, ..options(&fx, &fx.large_packer) };
    let outcome = rebuild(&fx.toolchain, &fx.workspace, &confirmed, &null_sink).expect("rebuild");
    let report = outcome.budgets[0].report.as_ref().expect("report");
    assert_eq!(report.status, BudgetStatus::Overflow);
    assert!(outcome.artifact.is_file());
}

#[test]
fn skipping_the_estimate_builds_without_budgets() {
    let fx = fixture(TRX_LOG);
    let opts = BuildOptions { skip_budget: true, ..options(&fx, &fx.large_packer) };

    let outcome = rebuild(&fx.toolchain, &fx.workspace, &opts, &null_sink).expect("rebuild");
    assert!(outcome.budgets.is_empty());
    assert!(!outcome.footer_repaired);
}

#[test]
fn unknown_span_is_reported_as_unknown() {
    let fx = fixture("FS_TYPE=squashfs\n");
    let opts = options(&fx, &fx.large_packer);

    let budgets = budget_gate(&fx.workspace, None, &opts, &null_sink).expect("gate");
    assert_eq!(budgets.len(), 1);
    assert!(budgets[0].report.is_none());
}

#[test]
fn multi_workspace_uses_multi_build_script() {
    let dir = tempdir().expect("tempdir");
    let fmk = fake_toolchain(dir.path(), TRX_LOG);
    let firmware = dir.path().join("fw.bin");
    make_firmware(&firmware, 3);
    let toolchain = Toolchain::new(&fmk).expect("toolchain");
    let workspace = toolchain
        .extract_multi(&firmware, &dir.path().join("ws"), &null_sink)
        .expect("extract");

    let lines = std::sync::Mutex::new(Vec::new());
    let sink = |line: &str| lines.lock().expect("lock").push(line.to_string());
    let opts = BuildOptions {
        footer_fix: true,
        output_dir: dir.path().join("out"),
        packer: Some(packer(dir.path(), "pack.sh", 1024)),
        ..BuildOptions::default()
    };
    let outcome = rebuild(&toolchain, &workspace, &opts, &sink).expect("rebuild");

    let names: Vec<&str> = outcome.budgets.iter().map(|b| b.segment.as_str()).collect();
    assert_eq!(names, vec!["fs_1", "fs_2"]);
    // Eligibility comes from the segments' metadata, not the path-only top-level log.
    assert!(outcome.footer_repaired);
    assert_eq!(outcome.artifact, dir.path().join("out/rebuilt_firmware.bin"));
    assert_eq!(fs::read(&outcome.artifact).expect("artifact"), b"IMAGEFOOTER");
    let lines = lines.into_inner().expect("lines");
    assert!(lines.iter().any(|l| l.starts_with("built build-multisquashfs-firmware.sh")));
}

#[test]
fn stale_footer_output_is_not_reused() {
    let fx = fixture(TRX_LOG);
    let stale = fx.toolchain.root.join(FOOTER_OUTPUT);
    fs::write(&stale, "STALE-FROM-OLD-BUILD").expect("stale image");
    write_script(&fx.toolchain.root.join(FOOTER_SCRIPT), "echo footer script did nothing\n");

    let opts = BuildOptions { footer_fix: true, ..options(&fx, &fx.small_packer) };
    let outcome = rebuild(&fx.toolchain, &fx.workspace, &opts, &null_sink).expect("rebuild");

    assert!(!outcome.footer_repaired);
    assert!(!stale.exists());
    assert_eq!(fs::read(&outcome.artifact).expect("artifact"), b"IMAGE");
}

#[test]
fn multi_footer_candidate_follows_segment_metadata() {
    let dir = tempdir().expect("tempdir");
    let firmware = dir.path().join("fw.bin");
    make_firmware(&firmware, 3);

    let plain = fake_toolchain(&dir.path().join("plain"), "FW_SIZE=0x4000\nFS_OFFSET=0x1000\n");
    let workspace = Toolchain::new(&plain)
        .expect("toolchain")
        .extract_multi(&firmware, &dir.path().join("ws-plain"), &null_sink)
        .expect("extract");
    assert!(!footer_repair_candidate(&workspace).expect("candidate"));

    let trx = fake_toolchain(&dir.path().join("trx"), TRX_LOG);
    let workspace = Toolchain::new(&trx)
        .expect("toolchain")
        .extract_multi(&firmware, &dir.path().join("ws-trx"), &null_sink)
        .expect("extract");
    assert!(footer_repair_candidate(&workspace).expect("candidate"));
}
