use anyhow::{anyhow, Result};
use fwbench_core::patch::{apply_services, set_root_password, ServiceToggles};

use crate::commands::{open_workspace, select_segment};

/// Patch a segment's live tree: root password and/or service toggles.
///
/// The two steps are independent; each is reported on its own and a failure
/// in one does not undo or skip the other.
pub fn patch_command(
    workspace: &str,
    segment: Option<String>,
    password: Option<String>,
    toggles: ServiceToggles,
) -> Result<()> {
    let workspace = open_workspace(workspace)?;
    let segment = select_segment(&workspace, segment.as_deref())?;
    let rootfs = segment.require_rootfs()?;
    segment.ensure_snapshot()?;

    let mut failures = 0;

    if let Some(password) = password {
        match set_root_password(&rootfs, &password) {
            Ok(()) if password.is_empty() => println!("[patch] Root account locked"),
            Ok(()) => println!("[patch] Root password updated"),
            Err(e) => {
                failures += 1;
                eprintln!("[patch] Root password failed [{}]: {e}", e.classification());
            }
        }
    }

    if toggles != ServiceToggles::default() {
        match apply_services(&rootfs, toggles) {
            Ok(actions) if actions.is_empty() => {
                println!("[patch] Services already in the requested state")
            }
            Ok(actions) => println!("[patch] Service actions: {}", actions.join(", ")),
            Err(e) => {
                failures += 1;
                eprintln!("[patch] Service toggles failed [{}]: {e}", e.classification());
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{failures} patch step(s) failed on segment '{}'", segment.name));
    }
    Ok(())
}
