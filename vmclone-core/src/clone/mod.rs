//! The clone pipeline.
//!
//! Components, leaves first:
//!
//! - [`validator`]: disk topology gate
//! - [`snapshot`]: internal snapshot detection
//! - [`lifecycle`]: stopping the source VM
//! - [`descriptor`]: clone description rewrite
//! - [`strategy`]: disk duplication strategy selection
//! - [`cloner`]: disk duplication through the image tool
//! - [`publisher`]: clone definition
//!
//! [`CloneEngine`] runs them in order for one [`CloneRequest`].

pub mod cloner;
pub mod descriptor;
pub mod engine;
pub mod lifecycle;
pub mod plan;
pub mod publisher;
pub mod request;
pub mod snapshot;
pub mod strategy;
pub mod validator;

pub use cloner::DiskCloner;
pub use descriptor::{build_clone_description, rewrite_description, ClonedDescription};
pub use engine::{CloneEngine, CloneOptions, CloneReport};
pub use lifecycle::{LifecycleController, StopOutcome};
pub use plan::{ClonePlan, DiskTask};
pub use publisher::publish;
pub use request::CloneRequest;
pub use snapshot::{is_internal, CloneSource};
pub use strategy::CloneStrategy;
