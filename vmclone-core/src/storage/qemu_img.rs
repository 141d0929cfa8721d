//! `qemu-img` backed image tool.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::{ImageTool, ToolStatus};
use crate::error::{CloneError, Result};

/// Default qemu-img binary.
pub const DEFAULT_QEMU_IMG: &str = "qemu-img";

/// Subset of `qemu-img info --output=json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QemuImgInfo {
    pub format: String,
    pub backing_filename: Option<String>,
    #[serde(default)]
    pub snapshots: Vec<QemuImgSnapshot>,
}

/// An internal snapshot entry from `qemu-img info`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QemuImgSnapshot {
    pub name: String,
}

/// Image tool driving the `qemu-img` binary.
pub struct QemuImg {
    binary: String,
    /// Show `qemu-img convert -p` progress on the terminal.
    progress: bool,
}

impl QemuImg {
    pub fn new() -> Self {
        Self {
            binary: DEFAULT_QEMU_IMG.to_string(),
            progress: true,
        }
    }

    /// Set the qemu-img binary path.
    pub fn with_binary(mut self, path: impl Into<String>) -> Self {
        self.binary = path.into();
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Check if qemu-img is available and return its version line.
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| CloneError::ImageTool(format!(
                "{} not found or not executable: {}", self.binary, e
            )))?;

        if !output.status.success() {
            return Err(CloneError::ImageTool(format!("{} --version failed", self.binary)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("unknown").to_string())
    }

    /// Run `qemu-img info` on an image.
    ///
    /// `--force-share` lets this read images held open by a running VM.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn info(&self, path: &Path) -> Result<QemuImgInfo> {
        let output = Command::new(&self.binary)
            .args(["info", "--force-share", "--output=json"])
            .arg(path)
            .output()
            .await
            .map_err(|e| CloneError::ImageTool(format!("Failed to run {} info: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloneError::ImageTool(format!(
                "{} info failed for {}: {}",
                self.binary,
                path.display(),
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            CloneError::ImageTool(format!(
                "Failed to parse {} info output for {}: {}",
                self.binary,
                path.display(),
                e
            ))
        })
    }

    /// Command preconfigured with the stdio layout used for disk operations.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null()).stderr(Stdio::piped());
        if self.progress {
            cmd.stdout(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null());
        }
        cmd
    }

    async fn execute(&self, mut cmd: Command) -> Result<ToolStatus> {
        debug!(command = ?cmd.as_std(), "Running image tool");

        // spawn() keeps the configured stdout; output() would capture it.
        let output = cmd
            .spawn()
            .map_err(|e| CloneError::ImageTool(format!("Failed to run {}: {}", self.binary, e)))?
            .wait_with_output()
            .await
            .map_err(|e| CloneError::ImageTool(format!("Failed to wait for {}: {}", self.binary, e)))?;

        Ok(ToolStatus {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Default for QemuImg {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageTool for QemuImg {
    async fn embedded_snapshot_count(&self, path: &Path) -> Result<usize> {
        let info = self.info(path).await?;
        debug!(
            path = %path.display(),
            format = %info.format,
            backing = info.backing_filename.as_deref().unwrap_or("-"),
            snapshots = ?info.snapshots.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "Probed image for internal snapshots"
        );
        Ok(info.snapshots.len())
    }

    #[instrument(skip(self), fields(dest = %dest.display(), backing = %backing.display()))]
    async fn create_overlay(
        &self,
        dest: &Path,
        backing: &Path,
        backing_format: &str,
    ) -> Result<ToolStatus> {
        info!("Creating QCOW2 overlay");
        let mut cmd = self.command();
        cmd.args(["create", "-f", "qcow2", "-F", backing_format, "-b"])
            .arg(backing)
            .arg(dest);
        self.execute(cmd).await
    }

    #[instrument(skip(self), fields(src = %src.display(), dest = %dest.display()))]
    async fn convert_full(&self, src: &Path, dest: &Path, format: &str) -> Result<ToolStatus> {
        info!("Converting image");
        let mut cmd = self.command();
        cmd.arg("convert");
        if self.progress {
            cmd.arg("-p");
        }
        cmd.args(["-O", format]).arg(src).arg(dest);
        self.execute(cmd).await
    }

    #[instrument(skip(self), fields(src = %src.display(), dest = %dest.display(), snapshot = %snapshot))]
    async fn convert_from_snapshot(
        &self,
        src: &Path,
        dest: &Path,
        snapshot: &str,
        format: &str,
    ) -> Result<ToolStatus> {
        info!("Converting image from internal snapshot");
        let mut cmd = self.command();
        cmd.arg("convert");
        if self.progress {
            cmd.arg("-p");
        }
        cmd.args(["-O", format, "-l"])
            .arg(format!("snapshot.name={}", snapshot))
            .arg(src)
            .arg(dest);
        self.execute(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info_with_snapshots() {
        let json = r#"{
            "snapshots": [
                {"icount": 0, "vm-state-size": 0, "date-sec": 1700000000, "date-nsec": 0,
                 "vm-clock-sec": 0, "vm-clock-nsec": 0, "id": "1", "name": "before-upgrade"}
            ],
            "virtual-size": 21474836480,
            "filename": "/var/lib/libvirt/images/db01.qcow2",
            "cluster-size": 65536,
            "format": "qcow2",
            "actual-size": 1234567,
            "dirty-flag": false
        }"#;

        let info: QemuImgInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.format, "qcow2");
        assert_eq!(info.snapshots.len(), 1);
        assert_eq!(info.snapshots[0].name, "before-upgrade");
        assert!(info.backing_filename.is_none());
    }

    #[test]
    fn test_parse_info_without_snapshots() {
        let json = r#"{
            "virtual-size": 10737418240,
            "filename": "/var/lib/libvirt/images/web01_clone.qcow2",
            "format": "qcow2",
            "backing-filename": "/var/lib/libvirt/images/web01.qcow2"
        }"#;

        let info: QemuImgInfo = serde_json::from_str(json).unwrap();
        assert!(info.snapshots.is_empty());
        assert_eq!(
            info.backing_filename.as_deref(),
            Some("/var/lib/libvirt/images/web01.qcow2")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_error() {
        let tool = QemuImg::new().with_binary("/nonexistent/qemu-img");
        let err = tool.version().await.unwrap_err();
        assert!(matches!(err, CloneError::ImageTool(_)));

        let err = tool
            .convert_full(Path::new("/a.qcow2"), Path::new("/b.qcow2"), "qcow2")
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::ImageTool(_)));
    }
}
