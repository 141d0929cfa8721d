//! # vmclone core
//!
//! Clone planning and execution for libvirt/QEMU virtual machines.
//!
//! A clone is a new, inactive domain whose qcow2 disks are either full
//! copies of the source disks or copy-on-write overlays backed by them.
//! The source may be the VM itself (stopped first if running) or one of
//! its named snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              CloneEngine                │
//! │ validate → inspect → plan → copy → define│
//! └──────────┬───────────────────┬──────────┘
//!            │                   │
//!            ▼                   ▼
//! ┌───────────────────┐ ┌───────────────────┐
//! │  Hypervisor trait │ │  ImageTool trait  │
//! │ LibvirtBackend /  │ │  QemuImg /        │
//! │ MockBackend       │ │  MockImageTool    │
//! └───────────────────┘ └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmclone_core::{CloneEngine, CloneRequest, LibvirtBackend, QemuImg};
//!
//! #[tokio::main]
//! async fn main() -> vmclone_core::Result<()> {
//!     let backend = Arc::new(LibvirtBackend::new("qemu:///system").await?);
//!     let engine = CloneEngine::new(backend, Arc::new(QemuImg::new()));
//!
//!     let request = CloneRequest::new("web01", "web01clone").linked(true);
//!     let report = engine.run(&request).await?;
//!     println!("{} defined", report.plan.clone_name());
//!     Ok(())
//! }
//! ```

pub mod clone;
pub mod error;
pub mod libvirt;
pub mod mock;
pub mod storage;
pub mod traits;
pub mod types;
pub mod xml;

pub use clone::{
    CloneEngine, CloneOptions, ClonePlan, CloneReport, CloneRequest, CloneStrategy, DiskTask,
    StopOutcome,
};
pub use error::{CloneError, ErrorKind, Result};
pub use mock::{MockBackend, MockImageTool};
pub use storage::{ImageTool, QemuImg, ToolStatus};
pub use traits::Hypervisor;
pub use types::*;

// Re-export libvirt backend when available
#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtBackend;
