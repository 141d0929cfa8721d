//! Disk topology gate.

use tracing::{debug, warn};

use crate::error::{CloneError, Result};
use crate::storage::QCOW2;
use crate::types::{DiskDevice, DomainDescription};

/// Check that every disk of the description can be cloned.
///
/// `cdrom` entries are skipped. A `disk` entry must use a `file` or
/// `volume` source and, when it declares a driver format, `qcow2`.
pub fn check_disks(description: &DomainDescription) -> Result<()> {
    for disk in description.disks() {
        match &disk.device {
            DiskDevice::Cdrom => continue,
            DiskDevice::Disk => {}
            DiskDevice::Other(device) => {
                return Err(CloneError::UnsupportedDisk(format!(
                    "Unsupported disk device type {} for {}",
                    device,
                    disk.label()
                )))
            }
        }

        if let Some(format) = &disk.driver_format {
            if format != QCOW2 {
                return Err(CloneError::UnsupportedDisk(format!(
                    "Disk {} has format {}, only qcow2 is supported",
                    disk.label(),
                    format
                )));
            }
        }

        if !matches!(disk.source_type.as_str(), "file" | "volume") {
            return Err(CloneError::UnsupportedDisk(format!(
                "Disk {} has type {}, only file and volume are supported",
                disk.label(),
                disk.source_type
            )));
        }

        debug!(disk = %disk.label(), "Disk supported");
    }

    Ok(())
}

/// Boolean form of [`check_disks`] that reports the offending disk.
pub fn validate(description: &DomainDescription) -> bool {
    match check_disks(description) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Not supported disks found");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(disks: &str) -> DomainDescription {
        DomainDescription::parse(&format!(
            "<domain type='kvm'><name>web01</name><devices>{}</devices></domain>",
            disks
        ))
        .unwrap()
    }

    #[test]
    fn test_accepts_qcow2_file_volume_and_cdrom() {
        let d = domain(
            "<disk type='file' device='disk'><driver name='qemu' type='qcow2'/><source file='/a.qcow2'/></disk>\
             <disk type='volume' device='disk'><driver name='qemu' type='qcow2'/><source pool='p' volume='b'/></disk>\
             <disk type='file' device='disk'><source file='/c.qcow2'/></disk>\
             <disk type='file' device='cdrom'><driver name='qemu' type='raw'/></disk>",
        );
        assert!(validate(&d));
        assert!(check_disks(&d).is_ok());
    }

    #[test]
    fn test_rejects_raw_driver() {
        let d = domain(
            "<disk type='file' device='disk'><driver name='qemu' type='raw'/><source file='/a.img'/></disk>",
        );
        assert!(!validate(&d));
        let err = check_disks(&d).unwrap_err();
        assert!(err.to_string().contains("/a.img"));
    }

    #[test]
    fn test_rejects_block_source() {
        let d = domain(
            "<disk type='block' device='disk'><driver name='qemu' type='qcow2'/><source dev='/dev/sdb'/></disk>",
        );
        assert!(!validate(&d));
    }

    #[test]
    fn test_rejects_unknown_device() {
        let d = domain("<disk type='file' device='floppy'><source file='/f.img'/></disk>");
        assert!(matches!(check_disks(&d), Err(CloneError::UnsupportedDisk(_))));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let good = domain("<disk type='file' device='disk'><source file='/a.qcow2'/></disk>");
        let bad = domain("<disk type='network' device='disk'><source protocol='rbd'/></disk>");
        assert_eq!(validate(&good), validate(&good));
        assert_eq!(validate(&bad), validate(&bad));
        assert!(validate(&good));
        assert!(!validate(&bad));
    }
}
