//! Type definitions for domain, snapshot and pool descriptions.
//!
//! These are typed read-only views over the [`Element`] trees libvirt hands
//! back. Nothing in here mutates a description in place; rewriting happens
//! in [`crate::clone::descriptor`], which builds new values.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CloneError, Result};
use crate::xml::Element;

// =============================================================================
// DOMAIN DESCRIPTION
// =============================================================================

/// A parsed `<domain>` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDescription {
    root: Element,
}

impl DomainDescription {
    /// Parse domain XML as returned by the hypervisor.
    pub fn parse(xml: &str) -> Result<Self> {
        Self::from_element(Element::parse(xml)?)
    }

    /// Wrap an already parsed `<domain>` element.
    pub fn from_element(root: Element) -> Result<Self> {
        if root.name != "domain" {
            return Err(CloneError::XmlError(format!(
                "Expected <domain> root element, found <{}>",
                root.name
            )));
        }
        Ok(Self { root })
    }

    pub fn element(&self) -> &Element {
        &self.root
    }

    pub fn into_element(self) -> Element {
        self.root
    }

    /// Domain name.
    pub fn name(&self) -> Option<String> {
        self.root.child("name").map(|n| n.text().trim().to_string())
    }

    /// Domain UUID, if the description carries one.
    pub fn uuid(&self) -> Option<String> {
        self.root.child("uuid").map(|n| n.text().trim().to_string())
    }

    /// Hardware addresses of all network interfaces.
    pub fn mac_addresses(&self) -> Vec<String> {
        self.root
            .find_all("devices/interface/mac")
            .into_iter()
            .filter_map(|m| m.attr("address").map(str::to_string))
            .collect()
    }

    /// All `<devices><disk>` declarations in document order.
    pub fn disks(&self) -> Vec<Disk> {
        self.root
            .find_all("devices/disk")
            .into_iter()
            .map(Disk::from_element)
            .collect()
    }

    pub fn to_xml(&self) -> Result<String> {
        self.root.to_xml()
    }
}

// =============================================================================
// DISKS
// =============================================================================

/// Device role of a `<disk>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskDevice {
    Disk,
    Cdrom,
    Other(String),
}

impl DiskDevice {
    fn parse(device: Option<&str>) -> Self {
        // libvirt defaults the device attribute to "disk"
        match device.unwrap_or("disk") {
            "disk" => Self::Disk,
            "cdrom" => Self::Cdrom,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DiskDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disk => f.write_str("disk"),
            Self::Cdrom => f.write_str("cdrom"),
            Self::Other(o) => f.write_str(o),
        }
    }
}

/// Where a disk's data comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskSource {
    /// `type='file'` with `<source file='...'/>`
    File(PathBuf),
    /// `type='volume'` with `<source pool='...' volume='...'/>`
    Volume { pool: String, volume: String },
    /// Any other source type (block, network, dir, ...).
    Unsupported(String),
    /// The declared type is supported but the `<source>` is incomplete.
    Missing,
}

/// Typed view of a `<disk>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub device: DiskDevice,
    /// Raw `type` attribute.
    pub source_type: String,
    /// Format from `<driver type='...'/>`, when declared.
    pub driver_format: Option<String>,
    pub source: DiskSource,
    /// Target device name (`vda`, `sdb`, ...).
    pub target: Option<String>,
    pub has_backing_store: bool,
}

impl Disk {
    pub fn from_element(el: &Element) -> Self {
        let source_type = el.attr("type").unwrap_or("file").to_string();
        let source_el = el.child("source");

        let source = match source_type.as_str() {
            "file" => source_el
                .and_then(|s| s.attr("file"))
                .map(|f| DiskSource::File(PathBuf::from(f)))
                .unwrap_or(DiskSource::Missing),
            "volume" => match source_el.map(|s| (s.attr("pool"), s.attr("volume"))) {
                Some((Some(pool), Some(volume))) => DiskSource::Volume {
                    pool: pool.to_string(),
                    volume: volume.to_string(),
                },
                _ => DiskSource::Missing,
            },
            other => DiskSource::Unsupported(other.to_string()),
        };

        Self {
            device: DiskDevice::parse(el.attr("device")),
            source_type,
            driver_format: el
                .child("driver")
                .and_then(|d| d.attr("type"))
                .map(str::to_string),
            source,
            target: el
                .child("target")
                .and_then(|t| t.attr("dev"))
                .map(str::to_string),
            has_backing_store: el.child("backingStore").is_some(),
        }
    }

    pub fn is_disk(&self) -> bool {
        self.device == DiskDevice::Disk
    }

    pub fn is_cdrom(&self) -> bool {
        self.device == DiskDevice::Cdrom
    }

    /// Human readable identification for diagnostics.
    pub fn label(&self) -> String {
        let source = match &self.source {
            DiskSource::File(p) => p.display().to_string(),
            DiskSource::Volume { pool, volume } => format!("{}/{}", pool, volume),
            DiskSource::Unsupported(kind) => format!("<{} source>", kind),
            DiskSource::Missing => "<no source>".to_string(),
        };
        match &self.target {
            Some(target) => format!("{} ({})", target, source),
            None => source,
        }
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Storage classification of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Internal,
    External,
}

/// A parsed `<domainsnapshot>` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDescription {
    root: Element,
}

impl SnapshotDescription {
    pub fn parse(xml: &str) -> Result<Self> {
        let root = Element::parse(xml)?;
        if root.name != "domainsnapshot" {
            return Err(CloneError::XmlError(format!(
                "Expected <domainsnapshot> root element, found <{}>",
                root.name
            )));
        }
        Ok(Self { root })
    }

    pub fn name(&self) -> Option<String> {
        self.root.child("name").map(|n| n.text().trim().to_string())
    }

    /// The domain as it was when the snapshot was taken.
    pub fn domain(&self) -> Result<DomainDescription> {
        let domain = self.root.child("domain").cloned().ok_or_else(|| {
            CloneError::XmlError("Snapshot description has no <domain> element".to_string())
        })?;
        DomainDescription::from_element(domain)
    }

    /// `snapshot` attribute of every entry in the `<disks>` section.
    pub fn disk_modes(&self) -> Vec<String> {
        self.root
            .find_all("disks/disk")
            .into_iter()
            .filter_map(|d| d.attr("snapshot").map(str::to_string))
            .collect()
    }

    /// Internal if any disk is stored inside its image file.
    pub fn kind(&self) -> SnapshotKind {
        if self.disk_modes().iter().any(|m| m == "internal") {
            SnapshotKind::Internal
        } else {
            SnapshotKind::External
        }
    }
}

/// Build the document for an external, disk-only snapshot of `domain`.
///
/// Every `disk` role entry is marked external; cdroms are excluded.
pub fn external_snapshot_xml(
    domain: &DomainDescription,
    name: &str,
    description: &str,
) -> Result<String> {
    let mut disks = Element::new("disks");
    for disk in domain.disks() {
        let Some(target) = disk.target.as_deref() else {
            return Err(CloneError::UnsupportedDisk(format!(
                "Disk {} has no target device",
                disk.label()
            )));
        };
        let mode = if disk.is_disk() { "external" } else { "no" };
        disks = disks.with_child(
            Element::new("disk")
                .with_attr("name", target)
                .with_attr("snapshot", mode),
        );
    }

    Element::new("domainsnapshot")
        .with_child(Element::new("name").with_text(name))
        .with_child(Element::new("description").with_text(description))
        .with_child(disks)
        .to_xml()
}

// =============================================================================
// STORAGE POOLS
// =============================================================================

/// A parsed `<pool>` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDescription {
    root: Element,
}

impl PoolDescription {
    pub fn parse(xml: &str) -> Result<Self> {
        let root = Element::parse(xml)?;
        if root.name != "pool" {
            return Err(CloneError::XmlError(format!(
                "Expected <pool> root element, found <{}>",
                root.name
            )));
        }
        Ok(Self { root })
    }

    /// Pool type (`dir`, `logical`, `netfs`, ...).
    pub fn pool_type(&self) -> Option<&str> {
        self.root.attr("type")
    }

    /// `<target><path>` of the pool.
    pub fn target_path(&self) -> Option<PathBuf> {
        self.root
            .find("target/path")
            .map(|p| p.text().trim().to_string())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

// =============================================================================
// HANDLES
// =============================================================================

/// Reference to a domain registered with the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRef {
    pub name: String,
    pub uuid: String,
}

/// Reference to a snapshot of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub domain: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = r#"<domain type='kvm'>
  <name>web01</name>
  <uuid>6c7d4a2e-1c1b-4b1e-9a55-0b8f2f1e0c11</uuid>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='/var/lib/libvirt/images/web01.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='volume' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source pool='default' volume='web01-data.qcow2'/>
      <target dev='vdb' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <target dev='sda' bus='sata'/>
    </disk>
    <interface type='network'>
      <mac address='52:54:00:12:34:56'/>
      <source network='default'/>
    </interface>
  </devices>
</domain>"#;

    #[test]
    fn test_domain_accessors() {
        let domain = DomainDescription::parse(DOMAIN).unwrap();
        assert_eq!(domain.name().as_deref(), Some("web01"));
        assert!(domain.uuid().is_some());
        assert_eq!(domain.mac_addresses(), vec!["52:54:00:12:34:56".to_string()]);

        let disks = domain.disks();
        assert_eq!(disks.len(), 3);
        assert_eq!(
            disks[0].source,
            DiskSource::File(PathBuf::from("/var/lib/libvirt/images/web01.qcow2"))
        );
        assert_eq!(
            disks[1].source,
            DiskSource::Volume {
                pool: "default".into(),
                volume: "web01-data.qcow2".into()
            }
        );
        assert!(disks[2].is_cdrom());
        assert_eq!(disks[2].source, DiskSource::Missing);
        assert_eq!(disks[0].target.as_deref(), Some("vda"));
    }

    #[test]
    fn test_rejects_wrong_root() {
        assert!(DomainDescription::parse("<pool type='dir'/>").is_err());
        assert!(SnapshotDescription::parse("<domain/>").is_err());
        assert!(PoolDescription::parse("<domain/>").is_err());
    }

    #[test]
    fn test_snapshot_kind() {
        let internal = SnapshotDescription::parse(
            "<domainsnapshot><name>s1</name><disks><disk name='vda' snapshot='internal'/></disks><domain><name>x</name></domain></domainsnapshot>",
        )
        .unwrap();
        assert_eq!(internal.kind(), SnapshotKind::Internal);
        assert_eq!(internal.name().as_deref(), Some("s1"));
        assert_eq!(internal.domain().unwrap().name().as_deref(), Some("x"));

        let external = SnapshotDescription::parse(
            "<domainsnapshot><name>s2</name><disks><disk name='vda' snapshot='external'/><disk name='sda' snapshot='no'/></disks></domainsnapshot>",
        )
        .unwrap();
        assert_eq!(external.kind(), SnapshotKind::External);
        assert!(external.domain().is_err());
    }

    #[test]
    fn test_external_snapshot_xml() {
        let domain = DomainDescription::parse(DOMAIN).unwrap();
        let xml = external_snapshot_xml(&domain, "before-upgrade", "pre clone").unwrap();
        let snap = SnapshotDescription::parse(&xml).unwrap();

        assert_eq!(snap.name().as_deref(), Some("before-upgrade"));
        assert_eq!(snap.disk_modes(), vec!["external", "external", "no"]);
        assert_eq!(snap.kind(), SnapshotKind::External);
    }

    #[test]
    fn test_pool_description() {
        let pool = PoolDescription::parse(
            "<pool type='dir'><name>default</name><target><path>/var/lib/libvirt/images</path></target></pool>",
        )
        .unwrap();
        assert_eq!(pool.pool_type(), Some("dir"));
        assert_eq!(pool.target_path(), Some(PathBuf::from("/var/lib/libvirt/images")));
    }
}
