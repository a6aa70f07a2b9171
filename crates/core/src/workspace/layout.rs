use std::path::{Path, PathBuf};

/// Directory holding the toolchain's logs inside a workspace or segment.
pub const LOGS_DIR: &str = "logs";
/// Config log written by the extraction toolchain.
pub const CONFIG_LOG: &str = "config.log";
/// Live filesystem tree of a segment.
pub const ROOTFS_DIR: &str = "rootfs";
/// Pristine copy of `rootfs` taken right after extraction.
pub const SNAPSHOT_DIR: &str = "rootfs_original";
/// Image produced by the build scripts on success.
pub const BUILD_OUTPUT: &str = "new-firmware.bin";

/// Logical layout of a workspace (or a segment workspace) on disk.
///
/// This is derived from a chosen root path. It does *not* perform any IO itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    /// Root directory of the workspace.
    pub root: PathBuf,
    pub logs_dir: PathBuf,
    /// `logs/config.log`, the metadata emitted by the extractor.
    pub config_log: PathBuf,
    pub rootfs_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    /// `new-firmware.bin`, expected after a successful build.
    pub build_output: PathBuf,
}

impl WorkspaceLayout {
    /// Compute the layout for a workspace rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let logs_dir = root.join(LOGS_DIR);
        let config_log = logs_dir.join(CONFIG_LOG);
        let rootfs_dir = root.join(ROOTFS_DIR);
        let snapshot_dir = root.join(SNAPSHOT_DIR);
        let build_output = root.join(BUILD_OUTPUT);

        Self { root, logs_dir, config_log, rootfs_dir, snapshot_dir, build_output }
    }

    /// Resolve a segment path listed in the top-level config log.
    ///
    /// The extractor writes absolute paths; relative ones are taken from the root.
    pub fn resolve_segment_path(&self, line: &str) -> PathBuf {
        let path = Path::new(line.trim());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_relative_to_root() {
        let layout = WorkspaceLayout::new("/tmp/ws_1");
        assert_eq!(layout.config_log, PathBuf::from("/tmp/ws_1/logs/config.log"));
        assert_eq!(layout.rootfs_dir, PathBuf::from("/tmp/ws_1/rootfs"));
        assert_eq!(layout.snapshot_dir, PathBuf::from("/tmp/ws_1/rootfs_original"));
        assert_eq!(layout.build_output, PathBuf::from("/tmp/ws_1/new-firmware.bin"));
    }

    #[test]
    fn relative_segment_paths_join_root() {
        let layout = WorkspaceLayout::new("/tmp/ws_1");
        assert_eq!(layout.resolve_segment_path("seg2"), PathBuf::from("/tmp/ws_1/seg2"));
        assert_eq!(layout.resolve_segment_path("/abs/seg"), PathBuf::from("/abs/seg"));
    }
}
