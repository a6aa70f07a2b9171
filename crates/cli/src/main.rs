use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fwbench::commands::{
    analyze_command, audit_command, build_command, diff_list_command, diff_show_command,
    estimate_command, extract_command, ipk_install_command, ipk_remove_command, metadata_command,
    patch_command, segments_command, tools_command,
};
use fwbench::{describe_error, GlobalOpts};
use fwbench_core::patch::ServiceToggles;
use fwbench_core::tools::BuildFlags;
use tracing_subscriber::EnvFilter;

/// Firmware workbench CLI.
///
/// This CLI is a thin wrapper around `fwbench-core` (exposed in code as `fwbench_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "fwbench",
    version,
    about = "Extract, audit, patch and rebuild embedded firmware filesystems",
    long_about = None
)]
struct Cli {
    /// Path to config.yaml. Defaults to ./config.yaml when present.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Firmware toolchain root (directory containing extract-firmware.sh).
    #[arg(long, global = true)]
    fmk: Option<String>,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(toggle: Option<Toggle>) -> Option<bool> {
        toggle.map(|t| t == Toggle::On)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a firmware image into a new workspace.
    ///
    /// The workspace is created under `workspaces_dir` (config) and named
    /// `ws_<timestamp>` unless `--name` is given. Every extracted segment is
    /// snapshotted to `rootfs_original` right away.
    Extract {
        /// Firmware image to extract.
        #[arg(long)]
        firmware: String,

        /// Workspace directory name.
        #[arg(long)]
        name: Option<String>,

        /// Extract every filesystem segment (multi-segment mode).
        #[arg(long, default_value_t = false)]
        multi: bool,

        /// Analyze all segments after extraction.
        #[arg(long, default_value_t = false)]
        analyze: bool,
    },

    /// List the segments of a workspace.
    Segments {
        /// Workspace directory. Defaults to the current working directory.
        #[arg(long, default_value = ".")]
        workspace: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show a segment's metadata.
    Metadata {
        #[arg(long, default_value = ".")]
        workspace: String,

        /// Segment name. Defaults to the first segment.
        #[arg(long)]
        segment: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run the security heuristics against one segment or all segments.
    Analyze {
        #[arg(long, default_value = ".")]
        workspace: String,

        /// Source firmware image the workspace was extracted from.
        #[arg(long)]
        firmware: String,

        #[arg(long, conflicts_with = "all")]
        segment: Option<String>,

        /// Analyze every segment concurrently.
        #[arg(long, default_value_t = false)]
        all: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run the filesystem-content checks against a segment's live tree.
    Audit {
        #[arg(long, default_value = ".")]
        workspace: String,

        #[arg(long)]
        segment: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Patch a segment's live tree (root password, services).
    Patch {
        #[arg(long, default_value = ".")]
        workspace: String,

        #[arg(long)]
        segment: Option<String>,

        /// New root password. An empty string locks the account.
        #[arg(long, conflicts_with = "lock")]
        password: Option<String>,

        /// Lock the root account.
        #[arg(long, default_value_t = false)]
        lock: bool,

        /// Serial console getty in etc/inittab.
        #[arg(long, value_enum)]
        serial: Option<Toggle>,

        /// Telnet entry in etc/inetd.conf.
        #[arg(long, value_enum)]
        telnet: Option<Toggle>,

        /// FTP entry in etc/inetd.conf.
        #[arg(long, value_enum)]
        ftp: Option<Toggle>,
    },

    /// List changes against the pristine snapshot, or diff a single file.
    Diff {
        #[arg(long, default_value = ".")]
        workspace: String,

        #[arg(long)]
        segment: Option<String>,

        /// Relative path inside rootfs to diff. Lists all changes when omitted.
        #[arg(long)]
        path: Option<String>,

        /// Also write the diff to a file (default: <path with / as _>.diff).
        #[arg(long, requires = "path")]
        export: Option<Option<String>>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Predict the packaged size of a segment against its original span.
    Estimate {
        #[arg(long, default_value = ".")]
        workspace: String,

        #[arg(long)]
        segment: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Rebuild a firmware image from the workspace.
    Build {
        #[arg(long, default_value = ".")]
        workspace: String,

        /// Do not pad the image to its original size.
        #[arg(long, default_value_t = false)]
        nopad: bool,

        /// Use the minimum block size.
        #[arg(long = "min", default_value_t = false)]
        min_block: bool,

        /// Run the vendor footer repair when the image qualifies.
        #[arg(long, default_value_t = false)]
        footer_fix: bool,

        /// Build even when a segment is predicted not to fit its span.
        #[arg(long, default_value_t = false)]
        allow_overflow: bool,

        /// Skip the pre-build size estimate.
        #[arg(long, default_value_t = false)]
        skip_estimate: bool,

        /// Source image name used for the output file (`rebuilt_<name>`).
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Install or remove `.ipk` packages.
    Ipk {
        #[command(subcommand)]
        command: IpkCommand,
    },

    /// Show which external tools were found.
    Tools,
}

#[derive(Subcommand, Debug)]
enum IpkCommand {
    /// Install a package into the workspace.
    Install {
        #[arg(long, default_value = ".")]
        workspace: String,

        #[arg(long)]
        ipk: String,
    },

    /// Remove a package's files from the workspace.
    Remove {
        #[arg(long, default_value = ".")]
        workspace: String,

        #[arg(long)]
        ipk: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", describe_error(&err));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let globals = GlobalOpts { config: cli.config, fmk: cli.fmk };

    match cli.command {
        Command::Extract { firmware, name, multi, analyze } => {
            extract_command(&globals, &firmware, name, multi, analyze)?
        }
        Command::Segments { workspace, json } => segments_command(&workspace, json)?,
        Command::Metadata { workspace, segment, json } => {
            metadata_command(&workspace, segment, json)?
        }
        Command::Analyze { workspace, firmware, segment, all, json } => {
            analyze_command(&globals, &workspace, &firmware, segment, all, json)?
        }
        Command::Audit { workspace, segment, json } => audit_command(&workspace, segment, json)?,
        Command::Patch { workspace, segment, password, lock, serial, telnet, ftp } => {
            let password = if lock { Some(String::new()) } else { password };
            let toggles = ServiceToggles {
                serial: Toggle::enabled(serial),
                telnet: Toggle::enabled(telnet),
                ftp: Toggle::enabled(ftp),
            };
            patch_command(&workspace, segment, password, toggles)?
        }
        Command::Diff { workspace, segment, path, export, json } => match path {
            Some(path) => diff_show_command(&workspace, segment, &path, export)?,
            None => diff_list_command(&workspace, segment, json)?,
        },
        Command::Estimate { workspace, segment, json } => {
            estimate_command(&globals, &workspace, segment, json)?
        }
        Command::Build {
            workspace,
            nopad,
            min_block,
            footer_fix,
            allow_overflow,
            skip_estimate,
            name,
            json,
        } => build_command(
            &globals,
            &workspace,
            BuildFlags { nopad, min_block },
            footer_fix,
            allow_overflow,
            skip_estimate,
            name,
            json,
        )?,
        Command::Ipk { command } => match command {
            IpkCommand::Install { workspace, ipk } => {
                ipk_install_command(&globals, &workspace, &ipk)?
            }
            IpkCommand::Remove { workspace, ipk } => {
                ipk_remove_command(&globals, &workspace, &ipk)?
            }
        },
        Command::Tools => tools_command(&globals)?,
    }

    Ok(())
}
