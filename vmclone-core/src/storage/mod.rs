//! Disk image and storage pool access.
//!
//! - **Image tool**: the [`ImageTool`] trait wraps the external image
//!   utility (`qemu-img`) with typed inputs and explicit exit status.
//! - **Pools**: storage-pool volume references are resolved to filesystem
//!   paths; nothing beyond path resolution is managed here.

mod pool;
mod qemu_img;

pub use pool::*;
pub use qemu_img::*;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// The only image format the clone engine reads and writes.
pub const QCOW2: &str = "qcow2";

/// Completion status of an image tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    /// Process exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured diagnostics, if any.
    pub stderr: String,
}

impl ToolStatus {
    pub fn ok() -> Self {
        Self { code: Some(0), stderr: String::new() }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), stderr: stderr.into() }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {}", code)?,
            None => write!(f, "terminated by signal")?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {}", stderr)?;
        }
        Ok(())
    }
}

/// Disk image tool used for snapshot probing and disk duplication.
///
/// All paths passed in are absolute. `Err` means the tool could not be run
/// at all; a tool that ran and failed reports it through [`ToolStatus`].
#[async_trait]
pub trait ImageTool: Send + Sync {
    /// Number of snapshots embedded inside the image file.
    async fn embedded_snapshot_count(&self, path: &Path) -> Result<usize>;

    /// Create a copy-on-write overlay at `dest` backed by `backing`.
    async fn create_overlay(&self, dest: &Path, backing: &Path, backing_format: &str)
        -> Result<ToolStatus>;

    /// Full, independent copy of `src` into `dest`.
    async fn convert_full(&self, src: &Path, dest: &Path, format: &str) -> Result<ToolStatus>;

    /// Copy of `src` as of the internal snapshot `snapshot` into `dest`.
    async fn convert_from_snapshot(
        &self,
        src: &Path,
        dest: &Path,
        snapshot: &str,
        format: &str,
    ) -> Result<ToolStatus>;
}
