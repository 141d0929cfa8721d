//! Storage pool path resolution.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CloneError, Result};
use crate::traits::Hypervisor;
use crate::types::{Disk, DiskSource, PoolDescription};

/// Resolve a pool volume to its file path.
///
/// Only directory pools are supported; the volume lives directly under the
/// pool's target path.
pub async fn resolve_volume_path(
    hypervisor: &dyn Hypervisor,
    pool: &str,
    volume: &str,
) -> Result<PathBuf> {
    let xml = hypervisor
        .lookup_pool_xml(pool)
        .await?
        .ok_or_else(|| CloneError::PoolLookup {
            pool: pool.to_string(),
            reason: "pool not found".to_string(),
        })?;

    let description = PoolDescription::parse(&xml)?;

    match description.pool_type() {
        Some("dir") => {}
        other => {
            return Err(CloneError::PoolLookup {
                pool: pool.to_string(),
                reason: format!("unsupported pool type {}", other.unwrap_or("<none>")),
            })
        }
    }

    let target = description.target_path().ok_or_else(|| CloneError::PoolLookup {
        pool: pool.to_string(),
        reason: "pool has no target path".to_string(),
    })?;

    let path = target.join(volume);
    debug!(pool = %pool, volume = %volume, path = %path.display(), "Resolved pool volume");
    Ok(path)
}

/// Resolve the absolute image path backing a disk declaration.
pub async fn resolve_disk_path(hypervisor: &dyn Hypervisor, disk: &Disk) -> Result<PathBuf> {
    let path = match &disk.source {
        DiskSource::File(path) => path.clone(),
        DiskSource::Volume { pool, volume } => resolve_volume_path(hypervisor, pool, volume).await?,
        DiskSource::Unsupported(kind) => {
            return Err(CloneError::UnsupportedDisk(format!(
                "Disk type {} not supported: {}",
                kind,
                disk.label()
            )))
        }
        DiskSource::Missing => {
            return Err(CloneError::UnsupportedDisk(format!(
                "Disk {} has no source",
                disk.label()
            )))
        }
    };

    ensure_absolute(&path)?;
    Ok(path)
}

fn ensure_absolute(path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(CloneError::UnsupportedDisk(format!(
            "Disk path {} is not absolute",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::xml::Element;

    fn disk(xml: &str) -> Disk {
        Disk::from_element(&Element::parse(xml).unwrap())
    }

    #[tokio::test]
    async fn test_resolve_dir_pool_volume() {
        let backend = MockBackend::new();
        backend.add_dir_pool("default", "/var/lib/libvirt/images");

        let path = resolve_volume_path(&backend, "default", "web01.qcow2").await.unwrap();
        assert_eq!(path, PathBuf::from("/var/lib/libvirt/images/web01.qcow2"));
    }

    #[tokio::test]
    async fn test_resolve_missing_pool() {
        let backend = MockBackend::new();
        let err = resolve_volume_path(&backend, "nope", "x.qcow2").await.unwrap_err();
        assert!(matches!(err, CloneError::PoolLookup { .. }));
    }

    #[tokio::test]
    async fn test_resolve_non_dir_pool() {
        let backend = MockBackend::new();
        backend.add_pool_xml(
            "lvm",
            "<pool type='logical'><name>lvm</name><target><path>/dev/vg0</path></target></pool>",
        );
        let err = resolve_volume_path(&backend, "lvm", "x").await.unwrap_err();
        assert!(err.to_string().contains("unsupported pool type logical"));
    }

    #[tokio::test]
    async fn test_resolve_disk_paths() {
        let backend = MockBackend::new();
        backend.add_dir_pool("default", "/pool");

        let file = disk("<disk type='file' device='disk'><source file='/images/a.qcow2'/></disk>");
        assert_eq!(
            resolve_disk_path(&backend, &file).await.unwrap(),
            PathBuf::from("/images/a.qcow2")
        );

        let volume = disk("<disk type='volume' device='disk'><source pool='default' volume='b.qcow2'/></disk>");
        assert_eq!(
            resolve_disk_path(&backend, &volume).await.unwrap(),
            PathBuf::from("/pool/b.qcow2")
        );

        let block = disk("<disk type='block' device='disk'><source dev='/dev/sdb'/></disk>");
        assert!(matches!(
            resolve_disk_path(&backend, &block).await.unwrap_err(),
            CloneError::UnsupportedDisk(_)
        ));

        let relative = disk("<disk type='file' device='disk'><source file='a.qcow2'/></disk>");
        assert!(resolve_disk_path(&backend, &relative).await.is_err());
    }
}
