//! Internal snapshot detection.

use tracing::{debug, info, instrument};

use crate::error::{CloneError, Result};
use crate::storage::{resolve_disk_path, ImageTool};
use crate::traits::Hypervisor;
use crate::types::{DomainDescription, SnapshotDescription, SnapshotKind};

/// The state a clone is taken from.
#[derive(Debug, Clone)]
pub enum CloneSource {
    /// The VM's current disks.
    Live(DomainDescription),
    /// A named snapshot and the domain as it was at that time.
    Snapshot {
        name: String,
        snapshot: SnapshotDescription,
        domain: DomainDescription,
    },
}

impl CloneSource {
    /// Build a snapshot source from its `<domainsnapshot>` document.
    pub fn from_snapshot(name: impl Into<String>, snapshot: SnapshotDescription) -> Result<Self> {
        let domain = snapshot.domain()?;
        Ok(Self::Snapshot {
            name: name.into(),
            snapshot,
            domain,
        })
    }

    /// Domain description whose disks are cloned.
    pub fn domain(&self) -> &DomainDescription {
        match self {
            Self::Live(domain) => domain,
            Self::Snapshot { domain, .. } => domain,
        }
    }

    pub fn snapshot_name(&self) -> Option<&str> {
        match self {
            Self::Live(_) => None,
            Self::Snapshot { name, .. } => Some(name),
        }
    }
}

/// Whether the clone source relies on snapshots stored inside image files.
///
/// For a named snapshot this is read from its `<disks>` section. For the
/// live VM every `disk` image is probed with the image tool; the first one
/// carrying an embedded snapshot decides.
#[instrument(skip_all, fields(snapshot = source.snapshot_name().unwrap_or("<live>")))]
pub async fn is_internal(
    hypervisor: &dyn Hypervisor,
    image_tool: &dyn ImageTool,
    source: &CloneSource,
) -> Result<bool> {
    let domain = match source {
        CloneSource::Snapshot { snapshot, .. } => {
            let internal = snapshot.kind() == SnapshotKind::Internal;
            debug!(internal, "Classified named snapshot");
            return Ok(internal);
        }
        CloneSource::Live(domain) => domain,
    };

    for disk in domain.disks().into_iter().filter(|d| d.is_disk()) {
        let path = resolve_disk_path(hypervisor, &disk).await.map_err(|e| {
            CloneError::SnapshotInspection(format!(
                "Can't resolve path of disk {}: {}",
                disk.label(),
                e
            ))
        })?;

        let count = image_tool.embedded_snapshot_count(&path).await.map_err(|e| {
            CloneError::SnapshotInspection(format!(
                "Can't list snapshots of {}: {}",
                path.display(),
                e
            ))
        })?;

        if count > 0 {
            info!(path = %path.display(), count, "Disk image has internal snapshots");
            return Ok(true);
        }
    }

    Ok(false)
}
