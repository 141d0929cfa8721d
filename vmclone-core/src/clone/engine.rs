//! Clone orchestration.
//!
//! [`CloneEngine::run`] drives one clone from request to registered domain:
//!
//! 1. request validation, source and clone-name lookups
//! 2. loading the source state (live VM or named snapshot)
//! 3. disk topology gate and internal snapshot detection
//! 4. strategy selection
//! 5. optional external snapshot creation
//! 6. stopping the source when its live disks are copied
//! 7. description rewrite, disk duplication, definition
//!
//! Every check that can reject the request runs before the first mutation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use super::cloner::DiskCloner;
use super::descriptor::build_clone_description;
use super::lifecycle::{
    LifecycleController, StopOutcome, DEFAULT_POLL_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT,
};
use super::plan::ClonePlan;
use super::publisher::publish;
use super::request::CloneRequest;
use super::snapshot::{is_internal, CloneSource};
use super::strategy;
use super::validator::check_disks;
use crate::error::{CloneError, Result};
use crate::storage::ImageTool;
use crate::traits::Hypervisor;
use crate::types::{
    external_snapshot_xml, DomainDescription, DomainRef, SnapshotDescription, SnapshotRef,
};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// How long to wait for a graceful shutdown before forcing the VM off.
    pub shutdown_timeout: Duration,
    /// Activity poll interval while waiting for shutdown.
    pub poll_interval: Duration,
    /// Remove images created by a failed run.
    pub cleanup_on_failure: bool,
    /// Plan only: no shutdown, snapshot, copy or definition.
    pub dry_run: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cleanup_on_failure: false,
            dry_run: false,
        }
    }
}

/// Outcome of a clone run.
#[derive(Debug, Clone)]
pub struct CloneReport {
    pub plan: ClonePlan,
    /// The defined clone. `None` for a dry run.
    pub domain: Option<DomainRef>,
    /// How the source VM was stopped, when its live disks were copied.
    pub stop: Option<StopOutcome>,
    /// Snapshot created for this clone.
    pub snapshot_created: Option<SnapshotRef>,
    pub dry_run: bool,
}

/// Runs clone requests against one hypervisor and image tool.
pub struct CloneEngine {
    hypervisor: Arc<dyn Hypervisor>,
    image_tool: Arc<dyn ImageTool>,
    options: CloneOptions,
}

impl CloneEngine {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, image_tool: Arc<dyn ImageTool>) -> Self {
        Self {
            hypervisor,
            image_tool,
            options: CloneOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CloneOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CloneOptions {
        &self.options
    }

    /// Clone the source VM described by `request`.
    #[instrument(skip(self, request), fields(
        source = %request.source(),
        clone = %request.clone_name(),
        linked = request.is_linked(),
        snapshot = request.snapshot().unwrap_or("-"),
        dry_run = self.options.dry_run,
    ))]
    pub async fn run(&self, request: &CloneRequest) -> Result<CloneReport> {
        let hv = self.hypervisor.as_ref();
        request.validate()?;

        if hv.lookup_domain(request.source()).await?.is_none() {
            return Err(CloneError::VmNotFound(request.source().to_string()));
        }
        if hv.lookup_domain(request.clone_name()).await?.is_some() {
            return Err(CloneError::CloneNameExists(request.clone_name().to_string()));
        }

        let mut source = self.load_source(request).await?;

        info!("Validating disks");
        check_disks(source.domain())?;
        info!("All disks supported");

        let internal = is_internal(hv, self.image_tool.as_ref(), &source).await?;
        info!(internal, "Snapshot storage inspected");

        if request.creates_snapshot() && internal {
            return Err(CloneError::InternalSnapshotsPresent(request.source().to_string()));
        }

        let strategy = strategy::select(request.is_linked(), internal, request.snapshot())?;
        info!(strategy = %strategy, "Clone strategy selected");

        // Destinations are derived and checked before the snapshot or shutdown.
        let cloner = DiskCloner::new(self.image_tool.clone())
            .with_cleanup_on_failure(self.options.cleanup_on_failure);
        let mut cloned =
            build_clone_description(hv, source.domain(), request.clone_name(), strategy.is_linked())
                .await?;
        cloner.check_destinations(&cloned.tasks).await?;
        let mut source_changed = false;

        let mut snapshot_created = None;
        if request.creates_snapshot() {
            if self.options.dry_run {
                info!("Dry run: external snapshot would be created, VM keeps running");
            } else {
                let (created, snapshot_source) =
                    self.create_snapshot(request, source.domain()).await?;
                snapshot_created = Some(created);
                source = snapshot_source;
                source_changed = true;
            }
        }

        let mut stop = None;
        if matches!(source, CloneSource::Live(_)) && !request.creates_snapshot() {
            if self.options.dry_run {
                if hv.is_active(request.source()).await? {
                    info!("Dry run: VM is running and would be shut down");
                }
            } else {
                let controller =
                    LifecycleController::new(self.options.shutdown_timeout, self.options.poll_interval);
                let outcome = controller.ensure_stopped(hv, request.source()).await?;
                if outcome != StopOutcome::AlreadyStopped {
                    // Re-read the definition the disks are copied from.
                    let domain = DomainDescription::parse(&hv.domain_xml(request.source()).await?)?;
                    check_disks(&domain)?;
                    source = CloneSource::Live(domain);
                    source_changed = true;
                }
                stop = Some(outcome);
            }
        }

        if source_changed {
            cloned = build_clone_description(
                hv,
                source.domain(),
                request.clone_name(),
                strategy.is_linked(),
            )
            .await?;
        }
        let plan = ClonePlan {
            strategy,
            description: cloned.description,
            tasks: cloned.tasks,
        };

        if self.options.dry_run {
            info!(disks = plan.tasks.len(), "Dry run: plan ready, nothing changed");
            return Ok(CloneReport {
                plan,
                domain: None,
                stop,
                snapshot_created,
                dry_run: true,
            });
        }

        cloner.clone_disks(&plan.strategy, &plan.tasks).await?;
        let domain = publish(hv, &plan.description).await?;

        Ok(CloneReport {
            plan,
            domain: Some(domain),
            stop,
            snapshot_created,
            dry_run: false,
        })
    }

    /// Live VM, or the named snapshot the request refers to.
    async fn load_source(&self, request: &CloneRequest) -> Result<CloneSource> {
        let hv = self.hypervisor.as_ref();
        let vm = request.source();

        if request.creates_snapshot() {
            if let Some(name) = request.snapshot() {
                if hv.lookup_snapshot(vm, name).await?.is_some() {
                    return Err(CloneError::InvalidRequest(format!(
                        "snapshot {} already exists on VM {}",
                        name, vm
                    )));
                }
            }
        }

        match request.existing_snapshot() {
            Some(name) => {
                if hv.lookup_snapshot(vm, name).await?.is_none() {
                    return Err(CloneError::SnapshotNotFound {
                        vm: vm.to_string(),
                        snapshot: name.to_string(),
                    });
                }
                let snapshot = SnapshotDescription::parse(&hv.snapshot_xml(vm, name).await?)?;
                CloneSource::from_snapshot(name, snapshot)
            }
            None => Ok(CloneSource::Live(DomainDescription::parse(&hv.domain_xml(vm).await?)?)),
        }
    }

    /// Take an external disk-only snapshot and return it as the clone source.
    async fn create_snapshot(
        &self,
        request: &CloneRequest,
        domain: &DomainDescription,
    ) -> Result<(SnapshotRef, CloneSource)> {
        let hv = self.hypervisor.as_ref();
        let vm = request.source();
        let name = request
            .snapshot()
            .ok_or_else(|| CloneError::InvalidRequest("snapshot name required".to_string()))?;

        let description = format!(
            "Created by vmclone for {} at {}",
            request.clone_name(),
            chrono::Utc::now().to_rfc3339()
        );
        let xml = external_snapshot_xml(domain, name, &description)?;

        info!(snapshot = %name, "Creating external snapshot");
        let created = hv.create_snapshot(vm, &xml).await.map_err(|e| match e {
            CloneError::SnapshotFailed(_) => e,
            other => CloneError::SnapshotFailed(format!("{} on VM {}: {}", name, vm, other)),
        })?;

        let snapshot = SnapshotDescription::parse(&hv.snapshot_xml(vm, &created.name).await?)?;
        let source = CloneSource::from_snapshot(created.name.clone(), snapshot)?;
        if source.domain().disks().iter().any(|d| d.has_backing_store) {
            warn!("Snapshot disks carry backing chains, clones keep referencing them");
        }
        Ok((created, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockCall, MockImageTool};

    const APP01: &str = "<domain type='kvm'><name>app01</name>\
        <uuid>6c1b7d0e-2a8f-4f51-9a43-0d8d1a3b7e11</uuid><devices>\
        <disk type='file' device='disk'><driver name='qemu' type='qcow2'/>\
        <source file='/images/app01.qcow2'/><target dev='vda' bus='virtio'/></disk>\
        <interface type='network'><mac address='52:54:00:00:00:01'/><source network='default'/></interface>\
        </devices></domain>";

    fn engine(backend: &Arc<MockBackend>, tool: &Arc<MockImageTool>, options: CloneOptions) -> CloneEngine {
        CloneEngine::new(backend.clone(), tool.clone()).with_options(options)
    }

    fn fast() -> CloneOptions {
        CloneOptions {
            shutdown_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain(APP01, true);
        let tool = Arc::new(MockImageTool::new());

        let options = CloneOptions { dry_run: true, ..fast() };
        let report = engine(&backend, &tool, options)
            .run(&CloneRequest::new("app01", "app01-test"))
            .await
            .unwrap();

        assert!(report.dry_run);
        assert!(report.domain.is_none());
        assert!(report.stop.is_none());
        assert_eq!(report.plan.tasks.len(), 1);
        assert_eq!(report.plan.clone_name(), "app01-test");
        assert!(!backend.mutated());
        assert!(tool.write_ops().is_empty());
        assert_eq!(backend.active("app01"), Some(true));
    }

    #[tokio::test]
    async fn test_create_snapshot_then_clone() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain(APP01, true);
        let tool = Arc::new(MockImageTool::new());

        let request = CloneRequest::new("app01", "app01-copy")
            .with_snapshot("pre-clone")
            .create_snapshot(true);
        let report = engine(&backend, &tool, fast()).run(&request).await.unwrap();

        let created = report.snapshot_created.unwrap();
        assert_eq!(created.name, "pre-clone");
        assert_eq!(report.plan.strategy, strategy::CloneStrategy::FullConvert);
        assert!(report.stop.is_none());

        // The source keeps running when cloned from a snapshot.
        assert_eq!(backend.active("app01"), Some(true));
        let calls = backend.calls();
        assert!(calls.contains(&MockCall::CreateSnapshot {
            domain: "app01".into(),
            name: "pre-clone".into(),
        }));
        assert!(!calls.contains(&MockCall::RequestShutdown("app01".into())));
        assert!(backend.stored_xml("app01-copy").is_some());
    }

    #[tokio::test]
    async fn test_create_rejected_with_internal_snapshots() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain(APP01, false);
        let tool = Arc::new(MockImageTool::new());
        tool.set_snapshot_count("/images/app01.qcow2", 2);

        let request = CloneRequest::new("app01", "app01-copy")
            .with_snapshot("pre-clone")
            .create_snapshot(true);
        let err = engine(&backend, &tool, fast()).run(&request).await.unwrap_err();

        assert!(matches!(err, CloneError::InternalSnapshotsPresent(ref vm) if vm == "app01"));
        assert!(!backend.mutated());
    }

    #[tokio::test]
    async fn test_create_rejected_when_snapshot_name_taken() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain(APP01, false);
        backend.add_snapshot(
            "app01",
            "pre-clone",
            &format!("<domainsnapshot><name>pre-clone</name>{}</domainsnapshot>", APP01),
        );
        let tool = Arc::new(MockImageTool::new());

        let request = CloneRequest::new("app01", "app01-copy")
            .with_snapshot("pre-clone")
            .create_snapshot(true);
        let err = engine(&backend, &tool, fast()).run(&request).await.unwrap_err();
        assert!(matches!(err, CloneError::InvalidRequest(_)));
        assert!(!backend.mutated());
    }

    fn domain_in(dir: &std::path::Path, name: &str) -> String {
        format!(
            "<domain type='kvm'><name>{name}</name><devices>\
             <disk type='file' device='disk'><driver name='qemu' type='qcow2'/>\
             <source file='{}'/><target dev='vda' bus='virtio'/></disk>\
             </devices></domain>",
            dir.join(format!("{name}.qcow2")).display()
        )
    }

    #[tokio::test]
    async fn test_existing_destination_leaves_running_vm_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("ci02_ci01.qcow2"), b"stale").unwrap();

        let backend = Arc::new(MockBackend::new());
        backend.add_domain(&domain_in(dir.path(), "ci01"), true);
        let tool = Arc::new(MockImageTool::new());

        let err = engine(&backend, &tool, fast())
            .run(&CloneRequest::new("ci01", "ci02"))
            .await
            .unwrap_err();

        assert!(matches!(err, CloneError::DestinationExists(_)));
        assert_eq!(backend.active("ci01"), Some(true));
        assert!(!backend.mutated());
        assert!(tool.write_ops().is_empty());
    }

    #[tokio::test]
    async fn test_existing_destination_blocks_snapshot_creation() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("ci02_ci01.qcow2"), b"stale").unwrap();

        let backend = Arc::new(MockBackend::new());
        backend.add_domain(&domain_in(dir.path(), "ci01"), true);
        let tool = Arc::new(MockImageTool::new());

        let request = CloneRequest::new("ci01", "ci02")
            .with_snapshot("pre")
            .create_snapshot(true);
        let err = engine(&backend, &tool, fast()).run(&request).await.unwrap_err();

        assert!(matches!(err, CloneError::DestinationExists(_)));
        assert!(backend.calls().is_empty());
        assert!(tool.write_ops().is_empty());
    }

    #[tokio::test]
    async fn test_missing_snapshot() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain(APP01, false);
        let tool = Arc::new(MockImageTool::new());

        let request = CloneRequest::new("app01", "app01-copy").with_snapshot("nope");
        let err = engine(&backend, &tool, fast()).run(&request).await.unwrap_err();
        assert!(matches!(err, CloneError::SnapshotNotFound { .. }));
    }

    #[tokio::test]
    async fn test_invalid_request_makes_no_calls() {
        let backend = Arc::new(MockBackend::new());
        backend.add_domain(APP01, false);
        let tool = Arc::new(MockImageTool::new());

        let err = engine(&backend, &tool, fast())
            .run(&CloneRequest::new("app01", "app01"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::InvalidRequest(_)));
        assert!(backend.calls().is_empty());
    }
}
