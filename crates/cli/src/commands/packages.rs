use anyhow::{Context, Result};

use crate::commands::{open_workspace, resolve_toolchain};
use crate::{canonicalize_or_current, stderr_sink, GlobalOpts};

/// Install an `.ipk` package into the workspace tree.
pub fn ipk_install_command(globals: &GlobalOpts, workspace: &str, ipk: &str) -> Result<()> {
    let config = globals.load_config()?;
    let toolchain = resolve_toolchain(globals, &config)?;
    let workspace = open_workspace(workspace)?;
    let ipk_path = canonicalize_or_current(ipk)?;

    toolchain
        .install_ipk(&workspace, &ipk_path, &stderr_sink)
        .with_context(|| format!("Failed to install {}", ipk_path.display()))?;
    println!("Installed {} into {}", ipk_path.display(), workspace.layout.root.display());
    Ok(())
}

/// Remove the files of an `.ipk` package from the workspace tree.
pub fn ipk_remove_command(globals: &GlobalOpts, workspace: &str, ipk: &str) -> Result<()> {
    let config = globals.load_config()?;
    let toolchain = resolve_toolchain(globals, &config)?;
    let workspace = open_workspace(workspace)?;
    let ipk_path = canonicalize_or_current(ipk)?;

    toolchain
        .remove_ipk(&workspace, &ipk_path, &stderr_sink)
        .with_context(|| format!("Failed to remove {}", ipk_path.display()))?;
    println!("Removed {} from {}", ipk_path.display(), workspace.layout.root.display());
    Ok(())
}
