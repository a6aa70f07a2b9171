use std::path::{Path, PathBuf};

use anyhow::Result;
use fwbench_core::tools::{
    resolve_tool, Toolchain, BUILD_MULTI_SCRIPT, BUILD_SCRIPT, EXTRACT_MULTI_SCRIPT,
    EXTRACT_SCRIPT, FOOTER_SCRIPT, IPK_INSTALL_SCRIPT, IPK_REMOVE_SCRIPT,
};

use crate::GlobalOpts;

const SCRIPTS: [&str; 7] = [
    EXTRACT_SCRIPT,
    BUILD_SCRIPT,
    EXTRACT_MULTI_SCRIPT,
    BUILD_MULTI_SCRIPT,
    IPK_INSTALL_SCRIPT,
    IPK_REMOVE_SCRIPT,
    FOOTER_SCRIPT,
];

/// Report which external tools the workbench can find.
///
/// Fails only when the toolchain itself cannot be located.
pub fn tools_command(globals: &GlobalOpts) -> Result<()> {
    let config = globals.load_config()?;

    let explicit = globals.fmk.as_deref().map(Path::new);
    let toolchain = Toolchain::from_config(explicit, &config.fmk);

    println!("Toolchain:");
    match &toolchain {
        Ok(t) => {
            println!("  Root: {}", t.root.display());
            println!("  Sudo (extract): {:?}", t.sudo_extract);
            println!("  Sudo (build): {:?}", t.sudo_build);
            for script in SCRIPTS {
                print_tool_status(script, t.script(script).is_file().then(|| t.script(script)));
            }
        }
        Err(e) => println!("  MISSING ({e})"),
    }

    println!("Filesystem tools:");
    let unsquashfs = config.tools.unsquashfs.clone().unwrap_or_else(|| PathBuf::from("unsquashfs"));
    print_tool_status("unsquashfs", resolve_tool(&unsquashfs));
    let mksquashfs = config.tools.mksquashfs.clone().unwrap_or_else(|| PathBuf::from("mksquashfs"));
    print_tool_status("mksquashfs", resolve_tool(&mksquashfs));

    toolchain?;
    Ok(())
}

fn print_tool_status(label: &str, found: Option<PathBuf>) {
    match found {
        Some(path) => println!("- {label}: OK ({})", path.display()),
        None => println!("- {label}: MISSING"),
    }
}
