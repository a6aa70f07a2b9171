//! Session state and background jobs.
//!
//! A [`Session`] carries what an interactive frontend keeps between commands:
//! configuration, the open workspace, the selected segment and the firmware
//! image. Analysis runs are submitted as background jobs that stream progress
//! lines over a channel; at most one job of each [`JobKind`] may be in flight.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use crate::analysis::{analyze_segment, analyze_segments, BatchReport, FirmwareAnalyzer, Finding};
use crate::config::WorkbenchConfig;
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::tools::LogSink;
use crate::workspace::{Segment, Workspace};

/// Throttled job categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    SingleAnalysis,
    AllSegmentsAnalysis,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::SingleAnalysis => write!(f, "single-segment analysis"),
            JobKind::AllSegmentsAnalysis => write!(f, "all-segments analysis"),
        }
    }
}

/// One busy flag per job kind.
#[derive(Debug, Default)]
struct JobGate {
    single: Arc<AtomicBool>,
    all: Arc<AtomicBool>,
}

impl JobGate {
    fn flag(&self, kind: JobKind) -> &Arc<AtomicBool> {
        match kind {
            JobKind::SingleAnalysis => &self.single,
            JobKind::AllSegmentsAnalysis => &self.all,
        }
    }

    fn acquire(&self, kind: JobKind) -> WorkbenchResult<BusyGuard> {
        let flag = self.flag(kind);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| WorkbenchError::Busy(kind))?;
        Ok(BusyGuard { flag: Arc::clone(flag) })
    }
}

/// Clears the busy flag when the job ends, including by panic.
struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Handle to a running job and its progress channel.
pub struct JobHandle<T> {
    pub kind: JobKind,
    messages: Receiver<String>,
    handle: JoinHandle<T>,
}

impl<T> JobHandle<T> {
    /// Progress lines produced so far, without blocking.
    pub fn drain(&self) -> Vec<String> {
        self.messages.try_iter().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job, forwarding every progress line to `on_line`.
    pub fn wait_with(self, mut on_line: impl FnMut(&str)) -> WorkbenchResult<T> {
        for line in self.messages.iter() {
            on_line(&line);
        }
        self.handle.join().map_err(|_| WorkbenchError::JobPanicked(self.kind))
    }

    /// Wait for the job, discarding unread progress lines.
    pub fn join(self) -> WorkbenchResult<T> {
        self.wait_with(|_| {})
    }
}

/// Explicit per-frontend context passed to every operation.
#[derive(Debug, Default)]
pub struct Session {
    pub config: WorkbenchConfig,
    pub workspace: Option<Workspace>,
    pub selected: Option<String>,
    pub firmware: Option<PathBuf>,
    gate: JobGate,
}

impl Session {
    pub fn new(config: WorkbenchConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Open a workspace from disk and select its first segment.
    pub fn open_workspace(&mut self, root: &Path) -> WorkbenchResult<&Workspace> {
        let workspace = Workspace::open(root)?;
        self.selected = workspace.registry.list().first().map(|s| s.name.clone());
        Ok(self.workspace.insert(workspace))
    }

    pub fn select_segment(&mut self, name: &str) -> WorkbenchResult<()> {
        self.require_workspace()?.registry.require(name)?;
        self.selected = Some(name.to_string());
        Ok(())
    }

    pub fn set_firmware(&mut self, firmware: impl Into<PathBuf>) {
        self.firmware = Some(firmware.into());
    }

    pub fn require_workspace(&self) -> WorkbenchResult<&Workspace> {
        self.workspace
            .as_ref()
            .ok_or_else(|| WorkbenchError::MissingPrerequisite("no workspace open".to_string()))
    }

    pub fn selected_segment(&self) -> WorkbenchResult<&Segment> {
        self.require_workspace()?.select(self.selected.as_deref())
    }

    pub fn require_firmware(&self) -> WorkbenchResult<&Path> {
        self.firmware
            .as_deref()
            .ok_or_else(|| WorkbenchError::MissingPrerequisite("no firmware selected".to_string()))
    }

    pub fn analyzer(&self) -> FirmwareAnalyzer {
        FirmwareAnalyzer::from_config(&self.config.analysis, &self.config.tools)
    }

    pub fn is_busy(&self, kind: JobKind) -> bool {
        self.gate.flag(kind).load(Ordering::Acquire)
    }

    /// Run `job` on a background thread.
    ///
    /// Rejected with `Busy` while another job of the same kind runs; the
    /// request is not queued.
    pub fn submit<T, F>(&self, kind: JobKind, job: F) -> WorkbenchResult<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(LogSink<'_>) -> T + Send + 'static,
    {
        let guard = self.gate.acquire(kind)?;
        let (tx, rx) = mpsc::channel::<String>();
        let handle = thread::Builder::new().name(format!("fwbench-{kind:?}")).spawn(move || {
            let _guard = guard;
            let tx = Mutex::new(tx);
            let sink = |line: &str| {
                if let Ok(tx) = tx.lock() {
                    let _ = tx.send(line.to_string());
                }
            };
            job(&sink)
        })?;
        debug!("Submitted {} job", kind);
        Ok(JobHandle { kind, messages: rx, handle })
    }

    /// Analyze the selected segment in the background.
    pub fn analyze_selected(&self) -> WorkbenchResult<JobHandle<WorkbenchResult<Vec<Finding>>>> {
        let segment = self.selected_segment()?.clone();
        let firmware = self.require_firmware()?.to_path_buf();
        let analyzer = self.analyzer();
        info!("Queueing analysis of segment {}", segment.name);
        self.submit(JobKind::SingleAnalysis, move |log| {
            analyze_segment(&analyzer, &segment, &firmware, log)
        })
    }

    /// Analyze every segment of the open workspace in the background.
    pub fn analyze_all(&self) -> WorkbenchResult<JobHandle<BatchReport>> {
        let segments = self.require_workspace()?.registry.list().to_vec();
        let firmware = self.require_firmware()?.to_path_buf();
        let analyzer = self.analyzer();
        info!("Queueing analysis of {} segment(s)", segments.len());
        self.submit(JobKind::AllSegmentsAnalysis, move |log| {
            analyze_segments(&analyzer, &segments, &firmware, log)
        })
    }
}
