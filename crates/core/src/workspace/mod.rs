//! Workspaces, segments and the segment registry.
//!
//! A workspace is one extraction session on disk. It owns either a single
//! implicit segment (the workspace root itself) or several segment workspaces
//! listed by path in the top-level config log.

mod layout;

pub use layout::*;

use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::debug;

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::metadata::{load_config_log, Metadata};
use crate::snapshot;

/// One extracted filesystem region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub name: String,
    /// Directory containing `rootfs` and, once snapshotted, `rootfs_original`.
    pub directory: PathBuf,
    pub metadata: Metadata,
}

impl Segment {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>, metadata: Metadata) -> Self {
        Self { name: name.into(), directory: directory.into(), metadata }
    }

    /// Load a segment from its directory, reading `logs/config.log`.
    pub fn load(directory: impl AsRef<Path>) -> WorkbenchResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        let layout = WorkspaceLayout::new(&directory);
        let log = load_config_log(&layout.config_log)?;
        let name = directory
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("segment")
            .to_string();
        Ok(Self::new(name, directory, log.metadata))
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(&self.directory)
    }

    pub fn rootfs_dir(&self) -> PathBuf {
        self.layout().rootfs_dir
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.layout().snapshot_dir
    }

    pub fn is_extracted(&self) -> bool {
        self.rootfs_dir().is_dir()
    }

    /// The live tree, or `NotExtracted` when it does not exist yet.
    pub fn require_rootfs(&self) -> WorkbenchResult<PathBuf> {
        let rootfs = self.rootfs_dir();
        if rootfs.is_dir() {
            Ok(rootfs)
        } else {
            Err(WorkbenchError::NotExtracted(self.name.clone(), rootfs))
        }
    }

    /// Take the pristine snapshot if it does not exist yet.
    pub fn ensure_snapshot(&self) -> WorkbenchResult<PathBuf> {
        self.require_rootfs()?;
        snapshot::snapshot(&self.directory)
    }
}

/// Ordered set of segments; the shared read model for every other component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentRegistry {
    segments: Vec<Segment>,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self { segments: Vec::new() }
    }

    /// Add a segment, replacing any existing segment with the same name in place.
    pub fn register(&mut self, segment: Segment) -> &mut Self {
        match self.segments.iter_mut().find(|s| s.name == segment.name) {
            Some(existing) => *existing = segment,
            None => self.segments.push(segment),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn require(&self, name: &str) -> WorkbenchResult<&Segment> {
        self.get(name).ok_or_else(|| WorkbenchError::UnknownSegment(name.to_string()))
    }

    /// Segments in registration order.
    pub fn list(&self) -> &[Segment] {
        &self.segments
    }

    pub fn names(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceMode {
    Single,
    Multi,
}

/// An extraction session and the segments it produced.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub layout: WorkspaceLayout,
    pub mode: WorkspaceMode,
    pub registry: SegmentRegistry,
}

impl Workspace {
    /// Reopen a workspace from disk.
    ///
    /// Bare lines in the top-level config log that name existing directories
    /// switch the workspace to multi-segment mode.
    pub fn open(root: impl AsRef<Path>) -> WorkbenchResult<Self> {
        let layout = WorkspaceLayout::new(root);
        if !layout.root.is_dir() {
            return Err(WorkbenchError::MissingPrerequisite(format!(
                "workspace not found: {}",
                layout.root.display()
            )));
        }

        let top = load_config_log(&layout.config_log)?;
        if top.extra_lines.is_empty() {
            let name = layout
                .root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("main")
                .to_string();
            let mut registry = SegmentRegistry::new();
            registry.register(Segment::new(name, &layout.root, top.metadata));
            return Ok(Self { layout, mode: WorkspaceMode::Single, registry });
        }

        let mut registry = SegmentRegistry::new();
        for line in &top.extra_lines {
            let dir = layout.resolve_segment_path(line);
            if !dir.is_dir() {
                debug!("Skipping non-directory segment line: {}", line);
                continue;
            }
            registry.register(Segment::load(&dir)?);
        }
        if registry.is_empty() {
            return Err(WorkbenchError::MissingPrerequisite(
                "no filesystem segments detected in multi-segment workspace".to_string(),
            ));
        }
        Ok(Self { layout, mode: WorkspaceMode::Multi, registry })
    }

    /// Pick a segment by name, or the first one when no name is given.
    pub fn select(&self, name: Option<&str>) -> WorkbenchResult<&Segment> {
        match name {
            Some(name) => self.registry.require(name),
            None => self.registry.list().first().ok_or_else(|| {
                WorkbenchError::MissingPrerequisite("workspace has no segments".to_string())
            }),
        }
    }

    /// Snapshot every extracted segment; segments without `rootfs` are skipped.
    pub fn snapshot_all(&self) -> WorkbenchResult<Vec<PathBuf>> {
        let mut out = Vec::new();
        for segment in self.registry.list() {
            if segment.is_extracted() {
                out.push(segment.ensure_snapshot()?);
            }
        }
        Ok(out)
    }
}

/// Timestamped default workspace name, e.g. `ws_20240131_235959`.
pub fn default_workspace_name() -> String {
    format!("ws_{}", Local::now().format("%Y%m%d_%H%M%S"))
}
