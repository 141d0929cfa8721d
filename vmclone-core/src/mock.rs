//! Mock hypervisor and image tool for testing and dry development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{CloneError, Result};
use crate::storage::{ImageTool, ToolStatus};
use crate::traits::Hypervisor;
use crate::types::{DomainDescription, DomainRef, SnapshotDescription, SnapshotRef};
use crate::xml::{Element, Node};

/// How a mock domain reacts to a graceful shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownBehavior {
    /// The guest powers off as soon as it is asked to.
    Graceful,
    /// The guest ignores ACPI; only a forced stop brings it down.
    Ignore,
    /// The guest ignores ACPI and the forced stop fails too.
    Stuck,
}

/// Mutating or state-polling calls recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    IsActive(String),
    RequestShutdown(String),
    ForceStop(String),
    DefineDomain(String),
    CreateSnapshot { domain: String, name: String },
}

struct MockDomain {
    uuid: String,
    xml: String,
    active: bool,
    shutdown: ShutdownBehavior,
    /// Snapshot name -> `<domainsnapshot>` XML, in creation order.
    snapshots: Vec<(String, String)>,
}

/// In-memory hypervisor backend.
///
/// Useful for:
/// - Unit and integration testing of the clone pipeline
/// - Development without libvirt installed
pub struct MockBackend {
    domains: RwLock<HashMap<String, MockDomain>>,
    pools: RwLock<HashMap<String, String>>,
    calls: RwLock<Vec<MockCall>>,
    reject_definitions: RwLock<Option<String>>,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        info!("Creating mock hypervisor backend");
        Self {
            domains: RwLock::new(HashMap::new()),
            pools: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            reject_definitions: RwLock::new(None),
        }
    }

    /// Register a domain with the given XML. The name is taken from the XML.
    ///
    /// Panics on malformed XML; this is a test fixture helper.
    pub fn add_domain(&self, xml: &str, active: bool) -> DomainRef {
        let description = DomainDescription::parse(xml).expect("mock domain XML must parse");
        let name = description.name().expect("mock domain XML must have a name");
        let uuid = description
            .uuid()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.domains.write().unwrap_or_else(|e| e.into_inner()).insert(
            name.clone(),
            MockDomain {
                uuid: uuid.clone(),
                xml: xml.to_string(),
                active,
                shutdown: ShutdownBehavior::Graceful,
                snapshots: Vec::new(),
            },
        );
        DomainRef { name, uuid }
    }

    /// Attach a snapshot document to a registered domain.
    pub fn add_snapshot(&self, domain: &str, name: &str, xml: &str) {
        let mut domains = self.domains.write().unwrap_or_else(|e| e.into_inner());
        let dom = domains.get_mut(domain).expect("mock snapshot on unknown domain");
        dom.snapshots.push((name.to_string(), xml.to_string()));
    }

    /// Register a directory pool rooted at `path`.
    pub fn add_dir_pool(&self, name: &str, path: &str) {
        let xml = Element::new("pool")
            .with_attr("type", "dir")
            .with_child(Element::new("name").with_text(name))
            .with_child(
                Element::new("target").with_child(Element::new("path").with_text(path)),
            )
            .to_xml()
            .expect("pool XML serializes");
        self.add_pool_xml(name, &xml);
    }

    /// Register a pool with raw XML.
    pub fn add_pool_xml(&self, name: &str, xml: &str) {
        self.pools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), xml.to_string());
    }

    pub fn set_shutdown_behavior(&self, domain: &str, behavior: ShutdownBehavior) {
        if let Some(dom) = self.domains.write().unwrap_or_else(|e| e.into_inner()).get_mut(domain) {
            dom.shutdown = behavior;
        }
    }

    /// Make every subsequent `define_domain` fail with `reason`.
    pub fn reject_definitions(&self, reason: &str) {
        *self.reject_definitions.write().unwrap_or_else(|e| e.into_inner()) = Some(reason.to_string());
    }

    /// Calls recorded so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.read().map(|v| v.clone()).unwrap_or_default()
    }

    /// Whether any state-changing call was made.
    pub fn mutated(&self) -> bool {
        self.calls()
            .iter()
            .any(|c| !matches!(c, MockCall::IsActive(_)))
    }

    /// Stored XML of a domain, if registered.
    pub fn stored_xml(&self, name: &str) -> Option<String> {
        self.domains.read().ok()?.get(name).map(|d| d.xml.clone())
    }

    pub fn active(&self, name: &str) -> Option<bool> {
        self.domains.read().ok()?.get(name).map(|d| d.active)
    }

    fn record(&self, call: MockCall) -> Result<()> {
        self.calls
            .write()
            .map_err(|_| CloneError::Internal("Lock poisoned".to_string()))?
            .push(call);
        Ok(())
    }

    fn with_domain<T>(&self, name: &str, f: impl FnOnce(&mut MockDomain) -> Result<T>) -> Result<T> {
        let mut domains = self.domains.write().map_err(|_| {
            CloneError::Internal("Lock poisoned".to_string())
        })?;
        let dom = domains
            .get_mut(name)
            .ok_or_else(|| CloneError::VmNotFound(name.to_string()))?;
        f(dom)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for MockBackend {
    async fn lookup_domain(&self, name: &str) -> Result<Option<DomainRef>> {
        let domains = self.domains.read().map_err(|_| {
            CloneError::Internal("Lock poisoned".to_string())
        })?;
        Ok(domains.get(name).map(|d| DomainRef {
            name: name.to_string(),
            uuid: d.uuid.clone(),
        }))
    }

    async fn is_active(&self, name: &str) -> Result<bool> {
        self.record(MockCall::IsActive(name.to_string()))?;
        self.with_domain(name, |d| Ok(d.active))
    }

    #[instrument(skip(self))]
    async fn request_shutdown(&self, name: &str) -> Result<()> {
        self.record(MockCall::RequestShutdown(name.to_string()))?;
        self.with_domain(name, |d| {
            if d.shutdown == ShutdownBehavior::Graceful {
                d.active = false;
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    async fn force_stop(&self, name: &str) -> Result<()> {
        self.record(MockCall::ForceStop(name.to_string()))?;
        self.with_domain(name, |d| {
            if d.shutdown == ShutdownBehavior::Stuck {
                return Err(CloneError::Internal(
                    "Failed to terminate process: Device or resource busy".to_string(),
                ));
            }
            d.active = false;
            Ok(())
        })
    }

    async fn domain_xml(&self, name: &str) -> Result<String> {
        self.with_domain(name, |d| Ok(d.xml.clone()))
    }

    #[instrument(skip(self, xml))]
    async fn define_domain(&self, xml: &str) -> Result<DomainRef> {
        let description = DomainDescription::parse(xml).map_err(|e| CloneError::Definition {
            name: "<unknown>".to_string(),
            reason: e.to_string(),
        })?;
        let name = description.name().unwrap_or_default();
        self.record(MockCall::DefineDomain(name.clone()))?;

        if let Some(reason) = self.reject_definitions.read().ok().and_then(|r| r.clone()) {
            return Err(CloneError::Definition { name, reason });
        }

        let mut domains = self.domains.write().map_err(|_| {
            CloneError::Internal("Lock poisoned".to_string())
        })?;
        if domains.contains_key(&name) {
            return Err(CloneError::Definition {
                name: name.clone(),
                reason: format!("domain '{}' already exists", name),
            });
        }

        let uuid = description
            .uuid()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        domains.insert(
            name.clone(),
            MockDomain {
                uuid: uuid.clone(),
                xml: xml.to_string(),
                active: false,
                shutdown: ShutdownBehavior::Graceful,
                snapshots: Vec::new(),
            },
        );

        debug!(name = %name, uuid = %uuid, "Mock domain defined");
        Ok(DomainRef { name, uuid })
    }

    async fn lookup_snapshot(&self, domain: &str, name: &str) -> Result<Option<SnapshotRef>> {
        self.with_domain(domain, |d| {
            Ok(d.snapshots.iter().find(|(n, _)| n == name).map(|_| SnapshotRef {
                domain: domain.to_string(),
                name: name.to_string(),
            }))
        })
    }

    async fn snapshot_xml(&self, domain: &str, name: &str) -> Result<String> {
        self.with_domain(domain, |d| {
            d.snapshots
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, xml)| xml.clone())
                .ok_or_else(|| CloneError::SnapshotNotFound {
                    vm: domain.to_string(),
                    snapshot: name.to_string(),
                })
        })
    }

    #[instrument(skip(self, xml))]
    async fn create_snapshot(&self, domain: &str, xml: &str) -> Result<SnapshotRef> {
        let request = SnapshotDescription::parse(xml)?;
        let name = request
            .name()
            .ok_or_else(|| CloneError::SnapshotFailed("snapshot has no name".to_string()))?;
        self.record(MockCall::CreateSnapshot {
            domain: domain.to_string(),
            name: name.clone(),
        })?;

        self.with_domain(domain, |d| {
            if d.snapshots.iter().any(|(n, _)| *n == name) {
                return Err(CloneError::SnapshotFailed(format!(
                    "snapshot {} already exists",
                    name
                )));
            }

            // Like libvirt, embed the domain definition as of snapshot time.
            let mut stored = Element::parse(xml)?;
            stored
                .children
                .push(Node::Element(Element::parse(&d.xml)?));
            d.snapshots.push((name.clone(), stored.to_xml()?));
            Ok(())
        })?;

        Ok(SnapshotRef {
            domain: domain.to_string(),
            name,
        })
    }

    async fn lookup_pool_xml(&self, name: &str) -> Result<Option<String>> {
        let pools = self.pools.read().map_err(|_| {
            CloneError::Internal("Lock poisoned".to_string())
        })?;
        Ok(pools.get(name).cloned())
    }
}

// =============================================================================
// IMAGE TOOL
// =============================================================================

/// Image tool operations recorded by [`MockImageTool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOp {
    SnapshotCount(PathBuf),
    CreateOverlay { dest: PathBuf, backing: PathBuf, backing_format: String },
    ConvertFull { src: PathBuf, dest: PathBuf, format: String },
    ConvertFromSnapshot { src: PathBuf, dest: PathBuf, snapshot: String, format: String },
}

impl ImageOp {
    /// Destination written by this operation, if any.
    pub fn dest(&self) -> Option<&Path> {
        match self {
            Self::SnapshotCount(_) => None,
            Self::CreateOverlay { dest, .. }
            | Self::ConvertFull { dest, .. }
            | Self::ConvertFromSnapshot { dest, .. } => Some(dest),
        }
    }
}

/// In-memory image tool.
pub struct MockImageTool {
    snapshot_counts: RwLock<HashMap<PathBuf, usize>>,
    failing: RwLock<HashSet<PathBuf>>,
    ops: RwLock<Vec<ImageOp>>,
    /// Write placeholder files at destinations, so cleanup can be observed.
    materialize: bool,
}

impl MockImageTool {
    pub fn new() -> Self {
        Self {
            snapshot_counts: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            ops: RwLock::new(Vec::new()),
            materialize: false,
        }
    }

    /// Create destination files on disk for every write operation.
    pub fn materializing() -> Self {
        Self {
            materialize: true,
            ..Self::new()
        }
    }

    /// Report `count` embedded snapshots for `path`.
    pub fn set_snapshot_count(&self, path: impl Into<PathBuf>, count: usize) {
        self.snapshot_counts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), count);
    }

    /// Fail any operation writing to `dest` with exit status 1.
    pub fn fail_on(&self, dest: impl Into<PathBuf>) {
        self.failing.write().unwrap_or_else(|e| e.into_inner()).insert(dest.into());
    }

    pub fn ops(&self) -> Vec<ImageOp> {
        self.ops.read().map(|v| v.clone()).unwrap_or_default()
    }

    /// Only the operations that write a destination image.
    pub fn write_ops(&self) -> Vec<ImageOp> {
        self.ops()
            .into_iter()
            .filter(|op| op.dest().is_some())
            .collect()
    }

    fn complete(&self, op: ImageOp) -> Result<ToolStatus> {
        let dest = op.dest().map(Path::to_path_buf);
        self.ops
            .write()
            .map_err(|_| CloneError::Internal("Lock poisoned".to_string()))?
            .push(op);

        let Some(dest) = dest else {
            return Ok(ToolStatus::ok());
        };

        // A failing qemu-img run may still leave a partial file behind.
        if self.materialize {
            std::fs::write(&dest, b"QFI\xfb")
                .map_err(|e| CloneError::ImageTool(format!("mock write failed: {}", e)))?;
        }

        let failing = self
            .failing
            .read()
            .map_err(|_| CloneError::Internal("Lock poisoned".to_string()))?
            .contains(&dest);
        if failing {
            Ok(ToolStatus::failed(1, format!("Could not create '{}'", dest.display())))
        } else {
            Ok(ToolStatus::ok())
        }
    }
}

impl Default for MockImageTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageTool for MockImageTool {
    async fn embedded_snapshot_count(&self, path: &Path) -> Result<usize> {
        self.complete(ImageOp::SnapshotCount(path.to_path_buf()))?;
        let counts = self
            .snapshot_counts
            .read()
            .map_err(|_| CloneError::Internal("Lock poisoned".to_string()))?;
        Ok(counts.get(path).copied().unwrap_or(0))
    }

    async fn create_overlay(
        &self,
        dest: &Path,
        backing: &Path,
        backing_format: &str,
    ) -> Result<ToolStatus> {
        self.complete(ImageOp::CreateOverlay {
            dest: dest.to_path_buf(),
            backing: backing.to_path_buf(),
            backing_format: backing_format.to_string(),
        })
    }

    async fn convert_full(&self, src: &Path, dest: &Path, format: &str) -> Result<ToolStatus> {
        self.complete(ImageOp::ConvertFull {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            format: format.to_string(),
        })
    }

    async fn convert_from_snapshot(
        &self,
        src: &Path,
        dest: &Path,
        snapshot: &str,
        format: &str,
    ) -> Result<ToolStatus> {
        self.complete(ImageOp::ConvertFromSnapshot {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            snapshot: snapshot.to_string(),
            format: format.to_string(),
        })
    }
}
