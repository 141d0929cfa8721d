//! Clone plan: what the cloner and publisher consume.

use std::path::PathBuf;

use serde::Serialize;

use super::strategy::CloneStrategy;
use crate::types::DomainDescription;

/// One disk to duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskTask {
    /// Target device of the disk (`vda`, ...), when declared.
    pub target: Option<String>,
    /// Resolved absolute path of the source image.
    pub source: PathBuf,
    /// Absolute path of the image to create.
    pub dest: PathBuf,
}

/// Everything needed to execute a clone. Derived once per run.
#[derive(Debug, Clone)]
pub struct ClonePlan {
    pub strategy: CloneStrategy,
    /// Final description registered for the clone.
    pub description: DomainDescription,
    /// Disk tasks in description order.
    pub tasks: Vec<DiskTask>,
}

impl ClonePlan {
    pub fn clone_name(&self) -> String {
        self.description.name().unwrap_or_default()
    }
}
