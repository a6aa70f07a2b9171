use std::fs;

use anyhow::Context;
use fwbench::{canonicalize_or_current, describe_error, GlobalOpts};
use fwbench_core::WorkbenchError;
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_resolves_existing_relative_path() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    fs::create_dir_all(&subdir).expect("create nested");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let result = canonicalize_or_current("nested").expect("canonicalize nested");
    assert_eq!(result, subdir.canonicalize().expect("canonicalize subdir"));

    std::env::set_current_dir(original).expect("restore cwd");
}

#[test]
fn describe_error_uses_first_workbench_classification() {
    let err = Err::<(), _>(WorkbenchError::MetadataIncomplete { field: "FS_OFFSET" })
        .context("Failed to estimate segment 'main'")
        .unwrap_err();
    let text = describe_error(&err);
    assert!(text.starts_with("[metadata-incomplete] Failed to estimate segment 'main'"));
    assert!(text.contains("FS_OFFSET"));

    let plain = anyhow::anyhow!("something else");
    assert_eq!(describe_error(&plain), "[error] something else");
}

#[test]
fn explicit_config_must_exist() {
    let tmp = tempdir().expect("tempdir");
    let globals = GlobalOpts {
        config: Some(tmp.path().join("missing.yaml").display().to_string()),
        fmk: None,
    };
    let err = globals.load_config().unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn explicit_config_is_parsed() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("config.yaml");
    fs::write(
        &path,
        "workspaces_dir: /srv/ws\n\
         analysis:\n  unpack_timeout_secs: 5\n\
         tools:\n  mksquashfs: /opt/mksquashfs\n",
    )
    .expect("write config");

    let globals = GlobalOpts { config: Some(path.display().to_string()), fmk: None };
    let config = globals.load_config().expect("load");
    assert_eq!(config.workspaces_dir, std::path::PathBuf::from("/srv/ws"));
    assert_eq!(config.analysis.unpack_timeout_secs, 5);
    assert_eq!(config.analysis.entropy_samples, 4);
    assert_eq!(config.tools.mksquashfs, Some("/opt/mksquashfs".into()));
}
