//! Libvirt backend implementation.

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::domain_snapshot::DomainSnapshot;
use virt::error::{Error as VirtError, ErrorNumber};
use virt::storage_pool::StoragePool;
use virt::sys;

use crate::error::{CloneError, Result};
use crate::traits::Hypervisor;
use crate::types::{DomainRef, SnapshotRef};

/// Libvirt/QEMU hypervisor backend.
pub struct LibvirtBackend {
    uri: String,
    connection: Connect,
}

impl LibvirtBackend {
    /// Create a new libvirt backend connected to the specified URI.
    ///
    /// Common URIs:
    /// - `qemu:///system` - System-wide QEMU/KVM
    /// - `qemu:///session` - User session QEMU
    pub async fn new(uri: &str) -> Result<Self> {
        info!(uri = %uri, "Connecting to libvirt");

        let connection = Connect::open(Some(uri))
            .map_err(|e| CloneError::ConnectionFailed(format!("{}: {}", uri, e)))?;

        info!("Connected to libvirt");

        Ok(Self {
            uri: uri.to_string(),
            connection,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn get_domain(&self, name: &str) -> Result<Domain> {
        Domain::lookup_by_name(&self.connection, name).map_err(|e| match e.code() {
            ErrorNumber::NoDomain => CloneError::VmNotFound(name.to_string()),
            _ => CloneError::QueryFailed(format!("{}: {}", name, e)),
        })
    }

    fn domain_ref(domain: &Domain) -> Result<DomainRef> {
        let name = domain
            .get_name()
            .map_err(|e| CloneError::QueryFailed(e.to_string()))?;
        let uuid = domain
            .get_uuid_string()
            .map_err(|e| CloneError::QueryFailed(e.to_string()))?;
        Ok(DomainRef { name, uuid })
    }

    /// Snapshot handle, `None` when the domain has no snapshot of that name.
    fn find_snapshot(&self, domain: &str, name: &str) -> Result<Option<DomainSnapshot>> {
        let dom = self.get_domain(domain)?;
        match DomainSnapshot::lookup_by_name(&dom, name, 0) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => not_found(e, ErrorNumber::NoDomainSnapshot, "snapshot", name),
        }
    }
}

/// `Ok(None)` for the expected not-found code, any other error is a query failure.
fn not_found<T>(e: VirtError, expected: ErrorNumber, what: &str, name: &str) -> Result<Option<T>> {
    if e.code() == expected {
        debug!(name = %name, "No such {}", what);
        Ok(None)
    } else {
        Err(CloneError::QueryFailed(format!("{} {} lookup: {}", what, name, e)))
    }
}

#[async_trait]
impl Hypervisor for LibvirtBackend {
    #[instrument(skip(self))]
    async fn lookup_domain(&self, name: &str) -> Result<Option<DomainRef>> {
        match Domain::lookup_by_name(&self.connection, name) {
            Ok(domain) => Ok(Some(Self::domain_ref(&domain)?)),
            Err(e) => not_found(e, ErrorNumber::NoDomain, "domain", name),
        }
    }

    async fn is_active(&self, name: &str) -> Result<bool> {
        self.get_domain(name)?
            .is_active()
            .map_err(|e| CloneError::QueryFailed(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn request_shutdown(&self, name: &str) -> Result<()> {
        info!("Sending ACPI shutdown");
        self.get_domain(name)?
            .shutdown()
            .map_err(|e| CloneError::Lifecycle {
                vm: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn force_stop(&self, name: &str) -> Result<()> {
        info!("Force stopping VM");
        self.get_domain(name)?
            .destroy()
            .map_err(|e| CloneError::Lifecycle {
                vm: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn domain_xml(&self, name: &str) -> Result<String> {
        self.get_domain(name)?
            .get_xml_desc(sys::VIR_DOMAIN_XML_INACTIVE)
            .map_err(|e| CloneError::QueryFailed(e.to_string()))
    }

    #[instrument(skip(self, xml))]
    async fn define_domain(&self, xml: &str) -> Result<DomainRef> {
        let domain = Domain::define_xml(&self.connection, xml).map_err(|e| CloneError::Definition {
            name: "<clone>".to_string(),
            reason: e.to_string(),
        })?;
        let defined = Self::domain_ref(&domain)?;
        info!(name = %defined.name, uuid = %defined.uuid, "Domain defined");
        Ok(defined)
    }

    #[instrument(skip(self))]
    async fn lookup_snapshot(&self, domain: &str, name: &str) -> Result<Option<SnapshotRef>> {
        Ok(self.find_snapshot(domain, name)?.map(|_| SnapshotRef {
            domain: domain.to_string(),
            name: name.to_string(),
        }))
    }

    async fn snapshot_xml(&self, domain: &str, name: &str) -> Result<String> {
        let snapshot = self
            .find_snapshot(domain, name)?
            .ok_or_else(|| CloneError::SnapshotNotFound {
                vm: domain.to_string(),
                snapshot: name.to_string(),
            })?;
        snapshot
            .get_xml_desc(0)
            .map_err(|e| CloneError::QueryFailed(e.to_string()))
    }

    #[instrument(skip(self, xml))]
    async fn create_snapshot(&self, domain: &str, xml: &str) -> Result<SnapshotRef> {
        let dom = self.get_domain(domain)?;

        let flags = sys::VIR_DOMAIN_SNAPSHOT_CREATE_DISK_ONLY | sys::VIR_DOMAIN_SNAPSHOT_CREATE_ATOMIC;
        let snapshot = DomainSnapshot::create_xml(&dom, xml, flags)
            .map_err(|e| CloneError::SnapshotFailed(format!("{}: {}", domain, e)))?;
        let name = snapshot
            .get_name()
            .map_err(|e| CloneError::QueryFailed(e.to_string()))?;

        info!(snapshot = %name, "Disk-only snapshot created");
        Ok(SnapshotRef {
            domain: domain.to_string(),
            name,
        })
    }

    async fn lookup_pool_xml(&self, name: &str) -> Result<Option<String>> {
        let pool = match StoragePool::lookup_by_name(&self.connection, name) {
            Ok(pool) => pool,
            Err(e) => return not_found(e, ErrorNumber::NoStoragePool, "pool", name),
        };
        pool.get_xml_desc(0)
            .map(Some)
            .map_err(|e| CloneError::QueryFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // libvirt's built-in test driver: domain "test", pool "default-pool".
    const TEST_URI: &str = "test:///default";

    #[tokio::test]
    async fn test_missing_objects_are_none() {
        let backend = LibvirtBackend::new(TEST_URI).await.unwrap();

        assert!(backend.lookup_domain("test").await.unwrap().is_some());
        assert!(backend.lookup_domain("no-such-vm").await.unwrap().is_none());
        assert!(backend.lookup_pool_xml("no-such-pool").await.unwrap().is_none());
        assert!(backend
            .lookup_snapshot("test", "no-such-snapshot")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_snapshot_errors_are_typed() {
        let backend = LibvirtBackend::new(TEST_URI).await.unwrap();

        let err = backend.snapshot_xml("test", "no-such-snapshot").await.unwrap_err();
        assert!(matches!(err, CloneError::SnapshotNotFound { .. }));

        let err = backend.lookup_snapshot("no-such-vm", "s1").await.unwrap_err();
        assert!(matches!(err, CloneError::VmNotFound(ref vm) if vm == "no-such-vm"));
    }
}
