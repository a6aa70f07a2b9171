//! fwbench-core
//!
//! Core library for extracting, auditing, patching and rebuilding the
//! filesystem segments of embedded firmware images.
//!
//! The extraction/build toolchain and the filesystem pack/unpack tools are
//! external processes; this crate drives them, keeps track of the workspaces
//! they produce and implements the analysis, diff and budget logic around them.
//!
//! All substantive logic lives here so it is testable and reusable from
//! multiple frontends.

pub mod error;
pub mod config;
pub mod metadata;
pub mod workspace;
pub mod tools;
pub mod snapshot;
pub mod analysis;
pub mod jobs;
pub mod patch;
pub mod estimate;
pub mod build;

pub use error::{WorkbenchError, WorkbenchResult};

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
