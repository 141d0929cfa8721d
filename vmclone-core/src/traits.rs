//! Hypervisor connection abstraction.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DomainRef, SnapshotRef};

/// Narrow view of a hypervisor connection as needed by the clone engine.
///
/// Domains are addressed by name. Lookups return `Ok(None)` when the
/// object does not exist and `Err` only when the query itself failed.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    // =========================================================================
    // Domains
    // =========================================================================

    /// Look up a domain by name.
    async fn lookup_domain(&self, name: &str) -> Result<Option<DomainRef>>;

    /// Whether the domain is currently running.
    async fn is_active(&self, name: &str) -> Result<bool>;

    /// Send an ACPI shutdown request. Returns immediately.
    async fn request_shutdown(&self, name: &str) -> Result<()>;

    /// Power off the domain without guest cooperation.
    async fn force_stop(&self, name: &str) -> Result<()>;

    /// Current (inactive-safe) domain XML.
    async fn domain_xml(&self, name: &str) -> Result<String>;

    /// Define a new persistent, inactive domain from XML.
    async fn define_domain(&self, xml: &str) -> Result<DomainRef>;

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Look up a snapshot of a domain by name.
    async fn lookup_snapshot(&self, domain: &str, name: &str) -> Result<Option<SnapshotRef>>;

    /// `<domainsnapshot>` XML of a snapshot.
    async fn snapshot_xml(&self, domain: &str, name: &str) -> Result<String>;

    /// Create an external, disk-only snapshot from a `<domainsnapshot>` document.
    async fn create_snapshot(&self, domain: &str, xml: &str) -> Result<SnapshotRef>;

    // =========================================================================
    // Storage
    // =========================================================================

    /// `<pool>` XML of a storage pool.
    async fn lookup_pool_xml(&self, name: &str) -> Result<Option<String>>;
}
