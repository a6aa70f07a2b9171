//! External process plumbing.
//!
//! Every external tool (toolchain scripts, unpack/pack tools) is run through
//! [`run_tool`], which merges stdout/stderr, streams each line to a log sink,
//! captures the output for error reports and optionally enforces a timeout.

mod toolchain;

pub use toolchain::*;

use std::env;
use std::ffi::{OsStr, OsString};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use wait_timeout::ChildExt;

use crate::config::SudoMode;
use crate::error::{WorkbenchError, WorkbenchResult};

/// Receives progress lines from long-running operations.
pub type LogSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// A sink that drops everything.
pub fn null_sink(_line: &str) {}

/// Description of one external process invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub sudo: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new(), cwd: None, timeout: None, sudo: false }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Short name used in log lines and errors.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Shell-like rendering for `RUN:` log lines.
    pub fn display_line(&self) -> String {
        let mut parts = Vec::new();
        if self.sudo {
            parts.push("sudo".to_string());
        }
        parts.push(self.program.display().to_string());
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// Exit status and merged output of a finished process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub status: String,
    pub lines: Vec<String>,
}

impl ToolOutput {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Run a command, failing with `ToolInvocation` on a non-zero exit.
pub fn run_tool(cmd: &ToolCommand, log: LogSink<'_>) -> WorkbenchResult<ToolOutput> {
    let output = run_tool_unchecked(cmd, log)?;
    if !output.success {
        return Err(WorkbenchError::ToolInvocation {
            tool: cmd.tool_name(),
            status: output.status.clone(),
            output: output.text(),
        });
    }
    Ok(output)
}

/// Run a command and return its output whatever the exit status.
///
/// Spawn failures and timeouts are still errors; a timed-out process is killed.
pub fn run_tool_unchecked(cmd: &ToolCommand, log: LogSink<'_>) -> WorkbenchResult<ToolOutput> {
    log(&format!("[tool] RUN: {}", cmd.display_line()));
    info!("Running {}", cmd.display_line());

    let mut command = if cmd.sudo {
        let mut c = Command::new("sudo");
        c.arg(&cmd.program);
        c
    } else {
        Command::new(&cmd.program)
    };
    command.args(&cmd.args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = &cmd.cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => WorkbenchError::ToolNotFound(cmd.program.display().to_string()),
        _ => WorkbenchError::Io(e),
    })?;

    let (tx, rx) = mpsc::channel::<String>();
    let pipes: Vec<Box<dyn Read + Send>> = [
        child.stdout.take().map(|p| Box::new(p) as Box<dyn Read + Send>),
        child.stderr.take().map(|p| Box::new(p) as Box<dyn Read + Send>),
    ]
    .into_iter()
    .flatten()
    .collect();
    for pipe in pipes {
        let tx = tx.clone();
        thread::spawn(move || {
            for chunk in BufReader::new(pipe).split(b'\n') {
                let Ok(chunk) = chunk else { break };
                let line = String::from_utf8_lossy(&chunk).trim_end_matches('\r').to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let deadline = cmd.timeout.map(|t| Instant::now() + t);
    let mut lines = Vec::new();
    let mut timed_out = false;
    loop {
        let next = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    timed_out = true;
                    break;
                }
                rx.recv_timeout(deadline - now)
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(line) => {
                log(&line);
                lines.push(line);
            }
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = if timed_out {
        None
    } else {
        match deadline {
            Some(deadline) => {
                child.wait_timeout(deadline.saturating_duration_since(Instant::now()))?
            }
            None => Some(child.wait()?),
        }
    };

    let Some(status) = status else {
        let _ = child.kill();
        let _ = child.wait();
        let timeout = cmd.timeout.unwrap_or_default();
        log(&format!("[tool] {} timed out after {:?}", cmd.tool_name(), timeout));
        return Err(WorkbenchError::ToolTimeout {
            tool: cmd.tool_name(),
            timeout,
            output: lines.join("\n"),
        });
    };

    debug!("{} exited with {}", cmd.tool_name(), status);
    Ok(ToolOutput { success: status.success(), status: status.to_string(), lines })
}

/// Find an executable on `PATH`.
pub fn find_in_path(executable: &str) -> Option<PathBuf> {
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths).find_map(|p| {
            let candidate = p.join(executable);
            if candidate.is_file() {
                Some(candidate)
            } else {
                None
            }
        })
    })
}

/// Resolve a tool given as a bare name (looked up on `PATH`) or a path.
pub fn resolve_tool(tool: &Path) -> Option<PathBuf> {
    if tool.components().count() > 1 || tool.is_absolute() {
        return tool.is_file().then(|| tool.to_path_buf());
    }
    find_in_path(&tool.to_string_lossy())
}

/// Best-effort `chmod 755`; scripts shipped in archives often lose their mode bits.
pub fn ensure_executable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.is_file() {
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)) {
                debug!("Could not chmod {}: {}", path.display(), e);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Decide whether a toolchain invocation should be escalated.
///
/// `Auto` never escalates; no extraction step has been shown to need root yet.
pub fn should_escalate(mode: SudoMode) -> bool {
    match mode {
        SudoMode::Auto | SudoMode::Never => false,
        SudoMode::Always => !is_root() && find_in_path("sudo").is_some(),
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}
