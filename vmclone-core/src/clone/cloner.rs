//! Disk duplication.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::plan::DiskTask;
use super::strategy::CloneStrategy;
use crate::error::{CloneError, Result};
use crate::storage::{ImageTool, ToolStatus, QCOW2};

/// Produces the clone's disk images with the image tool.
pub struct DiskCloner {
    tool: Arc<dyn ImageTool>,
    cleanup_on_failure: bool,
}

impl DiskCloner {
    pub fn new(tool: Arc<dyn ImageTool>) -> Self {
        Self {
            tool,
            cleanup_on_failure: false,
        }
    }

    /// Remove images created by this run when a later disk fails.
    pub fn with_cleanup_on_failure(mut self, cleanup: bool) -> Self {
        self.cleanup_on_failure = cleanup;
        self
    }

    /// Refuse to start when any destination is already present.
    pub async fn check_destinations(&self, tasks: &[DiskTask]) -> Result<()> {
        for task in tasks {
            let exists = tokio::fs::try_exists(&task.dest).await.map_err(|e| {
                CloneError::DiskClone {
                    source_path: task.source.clone(),
                    dest_path: task.dest.clone(),
                    reason: format!("can't check destination: {}", e),
                }
            })?;
            if exists {
                return Err(CloneError::DestinationExists(task.dest.clone()));
            }
        }
        Ok(())
    }

    /// Duplicate every disk, in order, with the given strategy.
    ///
    /// Stops at the first failure. Images created before the failure are
    /// left in place unless cleanup was enabled.
    #[instrument(skip(self, tasks), fields(strategy = %strategy, disks = tasks.len()))]
    pub async fn clone_disks(&self, strategy: &CloneStrategy, tasks: &[DiskTask]) -> Result<()> {
        self.check_destinations(tasks).await?;

        let mut created: Vec<&Path> = Vec::with_capacity(tasks.len());
        for task in tasks {
            info!(
                source = %task.source.display(),
                dest = %task.dest.display(),
                "Cloning disk"
            );

            let result = self.clone_disk(strategy, task).await;
            let failure = match result {
                Ok(status) if status.success() => None,
                Ok(status) => Some(status.to_string()),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = failure {
                if self.cleanup_on_failure {
                    created.push(&task.dest);
                    remove_created(&created).await;
                } else if !created.is_empty() {
                    warn!(
                        left = created.len(),
                        "Disk clone failed, images created so far are left in place"
                    );
                }
                return Err(CloneError::DiskClone {
                    source_path: task.source.clone(),
                    dest_path: task.dest.clone(),
                    reason,
                });
            }

            created.push(&task.dest);
        }

        info!("All disks cloned");
        Ok(())
    }

    async fn clone_disk(&self, strategy: &CloneStrategy, task: &DiskTask) -> Result<ToolStatus> {
        match strategy {
            CloneStrategy::LinkedCreate => {
                self.tool.create_overlay(&task.dest, &task.source, QCOW2).await
            }
            CloneStrategy::SnapshotMergeConvert { snapshot } => {
                self.tool
                    .convert_from_snapshot(&task.source, &task.dest, snapshot, QCOW2)
                    .await
            }
            CloneStrategy::FullConvert => {
                self.tool.convert_full(&task.source, &task.dest, QCOW2).await
            }
        }
    }
}

/// Best-effort removal of images created in this run.
async fn remove_created(paths: &[&Path]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!(path = %path.display(), "Removed partial clone image"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove clone image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ImageOp, MockImageTool};
    use tempfile::TempDir;

    fn tasks(dir: &Path) -> Vec<DiskTask> {
        ["root.qcow2", "data.qcow2"]
            .iter()
            .map(|name| DiskTask {
                target: None,
                source: dir.join(name),
                dest: dir.join(format!("copy_{}", name)),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_operations_per_strategy() {
        let dir = TempDir::new().unwrap();
        let tasks = tasks(dir.path());

        let tool = Arc::new(MockImageTool::new());
        let cloner = DiskCloner::new(tool.clone());
        cloner.clone_disks(&CloneStrategy::LinkedCreate, &tasks).await.unwrap();
        assert_eq!(
            tool.ops()[0],
            ImageOp::CreateOverlay {
                dest: tasks[0].dest.clone(),
                backing: tasks[0].source.clone(),
                backing_format: "qcow2".into(),
            }
        );

        let tool = Arc::new(MockImageTool::new());
        let cloner = DiskCloner::new(tool.clone());
        let strategy = CloneStrategy::SnapshotMergeConvert { snapshot: "s1".into() };
        cloner.clone_disks(&strategy, &tasks).await.unwrap();
        assert_eq!(
            tool.ops()[1],
            ImageOp::ConvertFromSnapshot {
                src: tasks[1].source.clone(),
                dest: tasks[1].dest.clone(),
                snapshot: "s1".into(),
                format: "qcow2".into(),
            }
        );

        let tool = Arc::new(MockImageTool::new());
        let cloner = DiskCloner::new(tool.clone());
        cloner.clone_disks(&CloneStrategy::FullConvert, &tasks).await.unwrap();
        assert!(tool
            .ops()
            .iter()
            .all(|op| matches!(op, ImageOp::ConvertFull { .. })));
        assert_eq!(tool.ops().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_destination_rejected_before_copy() {
        let dir = TempDir::new().unwrap();
        let tasks = tasks(dir.path());
        std::fs::write(&tasks[1].dest, b"keep").unwrap();

        let tool = Arc::new(MockImageTool::new());
        let cloner = DiskCloner::new(tool.clone());
        let err = cloner
            .clone_disks(&CloneStrategy::FullConvert, &tasks)
            .await
            .unwrap_err();

        assert!(matches!(err, CloneError::DestinationExists(ref p) if *p == tasks[1].dest));
        assert!(tool.ops().is_empty());
        assert_eq!(std::fs::read(&tasks[1].dest).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_failure_stops_and_keeps_earlier_images() {
        let dir = TempDir::new().unwrap();
        let mut tasks = tasks(dir.path());
        tasks.push(DiskTask {
            target: None,
            source: dir.path().join("third.qcow2"),
            dest: dir.path().join("copy_third.qcow2"),
        });

        let tool = Arc::new(MockImageTool::materializing());
        tool.fail_on(tasks[1].dest.clone());
        let cloner = DiskCloner::new(tool.clone());

        let err = cloner
            .clone_disks(&CloneStrategy::FullConvert, &tasks)
            .await
            .unwrap_err();
        match err {
            CloneError::DiskClone { dest_path, reason, .. } => {
                assert_eq!(dest_path, tasks[1].dest);
                assert!(reason.contains("exit status 1"));
            }
            other => panic!("unexpected error: {}", other),
        }

        // The third disk is never attempted.
        assert_eq!(tool.write_ops().len(), 2);
        assert!(tasks[0].dest.exists());
        assert!(!tasks[2].dest.exists());
    }

    #[tokio::test]
    async fn test_cleanup_removes_created_images_only() {
        let dir = TempDir::new().unwrap();
        let tasks = tasks(dir.path());
        std::fs::write(&tasks[0].source, b"source").unwrap();

        let tool = Arc::new(MockImageTool::materializing());
        tool.fail_on(tasks[1].dest.clone());
        let cloner = DiskCloner::new(tool.clone()).with_cleanup_on_failure(true);

        assert!(cloner
            .clone_disks(&CloneStrategy::LinkedCreate, &tasks)
            .await
            .is_err());
        assert!(!tasks[0].dest.exists());
        assert!(!tasks[1].dest.exists());
        assert!(tasks[0].source.exists());
    }
}
