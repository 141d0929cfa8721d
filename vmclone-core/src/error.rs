//! Error types for the clone engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while planning or executing a clone.
#[derive(Error, Debug)]
pub enum CloneError {
    /// Failed to connect to the hypervisor.
    #[error("Failed to connect to hypervisor: {0}")]
    ConnectionFailed(String),

    /// Source VM was not found.
    #[error("VM {0} not found")]
    VmNotFound(String),

    /// Requested snapshot does not exist on the source VM.
    #[error("Snapshot {snapshot} not found on VM {vm}")]
    SnapshotNotFound { vm: String, snapshot: String },

    /// The clone name is already taken by another domain.
    #[error("Clone name {0} already exists")]
    CloneNameExists(String),

    /// Storage pool could not be resolved to a directory.
    #[error("Storage pool {pool} cannot be resolved: {reason}")]
    PoolLookup { pool: String, reason: String },

    /// The clone request itself is malformed.
    #[error("Invalid clone request: {0}")]
    InvalidRequest(String),

    /// A disk declaration cannot be cloned.
    #[error("Unsupported disk: {0}")]
    UnsupportedDisk(String),

    /// Linked clones over an internal named snapshot are not possible.
    #[error("Can't create a linked clone on internal snapshot {0}")]
    LinkedInternalSnapshot(String),

    /// An external snapshot can't be created next to internal ones.
    #[error("Can't create an external snapshot on VM {0} with internal snapshots")]
    InternalSnapshotsPresent(String),

    /// A disk path could not be resolved for snapshot probing.
    #[error("Snapshot inspection failed: {0}")]
    SnapshotInspection(String),

    /// The source VM could not be brought down.
    #[error("Failed to stop VM {vm}: {reason}")]
    Lifecycle { vm: String, reason: String },

    /// A clone destination file is already present.
    #[error("Destination {} already exists", .0.display())]
    DestinationExists(PathBuf),

    /// The image tool failed for a disk.
    #[error("Failed to clone disk {} to {}: {reason}", .source_path.display(), .dest_path.display())]
    DiskClone {
        source_path: PathBuf,
        dest_path: PathBuf,
        reason: String,
    },

    /// The image tool could not be run or its output could not be read.
    #[error("Image tool failed: {0}")]
    ImageTool(String),

    /// The hypervisor rejected the clone definition.
    #[error("Can't define clone {name}: {reason}")]
    Definition { name: String, reason: String },

    /// Snapshot creation was rejected by the hypervisor.
    #[error("Snapshot operation failed: {0}")]
    SnapshotFailed(String),

    /// XML parsing/serialization error.
    #[error("XML error: {0}")]
    XmlError(String),

    /// Hypervisor query failed.
    #[error("Failed to query hypervisor: {0}")]
    QueryFailed(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CloneError {
    /// Coarse error category, used for logging and exit reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::VmNotFound(_)
            | Self::SnapshotNotFound { .. }
            | Self::CloneNameExists(_)
            | Self::PoolLookup { .. } => ErrorKind::Lookup,
            Self::InvalidRequest(_)
            | Self::UnsupportedDisk(_)
            | Self::LinkedInternalSnapshot(_)
            | Self::InternalSnapshotsPresent(_)
            | Self::DestinationExists(_) => ErrorKind::Validation,
            Self::SnapshotInspection(_) => ErrorKind::SnapshotInspection,
            Self::Lifecycle { .. } => ErrorKind::Lifecycle,
            Self::DiskClone { .. } | Self::ImageTool(_) => ErrorKind::DiskClone,
            Self::Definition { .. } => ErrorKind::Definition,
            Self::ConnectionFailed(_)
            | Self::SnapshotFailed(_)
            | Self::XmlError(_)
            | Self::QueryFailed(_)
            | Self::Internal(_) => ErrorKind::Hypervisor,
        }
    }
}

/// Error categories reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lookup,
    Validation,
    SnapshotInspection,
    Lifecycle,
    DiskClone,
    Definition,
    Hypervisor,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Validation => "validation",
            Self::SnapshotInspection => "snapshot-inspection",
            Self::Lifecycle => "lifecycle",
            Self::DiskClone => "disk-clone",
            Self::Definition => "definition",
            Self::Hypervisor => "hypervisor",
        }
    }
}

impl From<quick_xml::Error> for CloneError {
    fn from(e: quick_xml::Error) -> Self {
        Self::XmlError(e.to_string())
    }
}

/// Result type alias for clone operations.
pub type Result<T> = std::result::Result<T, CloneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(CloneError::VmNotFound("web01".into()).kind(), ErrorKind::Lookup);
        assert_eq!(CloneError::CloneNameExists("web02".into()).kind(), ErrorKind::Lookup);
        assert_eq!(
            CloneError::LinkedInternalSnapshot("s1".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CloneError::Definition { name: "x".into(), reason: "bad".into() }.kind(),
            ErrorKind::Definition
        );
    }

    #[test]
    fn test_disk_clone_message_names_paths() {
        let err = CloneError::DiskClone {
            source_path: PathBuf::from("/var/lib/libvirt/images/a.qcow2"),
            dest_path: PathBuf::from("/var/lib/libvirt/images/b_a.qcow2"),
            reason: "exit status 1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/lib/libvirt/images/a.qcow2"));
        assert!(msg.contains("/var/lib/libvirt/images/b_a.qcow2"));
    }
}
