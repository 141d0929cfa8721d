//! Clone request definition.

use serde::{Deserialize, Serialize};

use crate::error::{CloneError, Result};

/// What the operator asked for. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneRequest {
    source: String,
    clone_name: String,
    snapshot: Option<String>,
    linked: bool,
    create_snapshot: bool,
}

impl CloneRequest {
    /// Clone `source` into a new domain called `clone_name`.
    pub fn new(source: impl Into<String>, clone_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            clone_name: clone_name.into(),
            snapshot: None,
            linked: false,
            create_snapshot: false,
        }
    }

    /// Clone from (or create) the named snapshot.
    pub fn with_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = Some(snapshot.into());
        self
    }

    /// Create copy-on-write overlays instead of full copies.
    pub fn linked(mut self, linked: bool) -> Self {
        self.linked = linked;
        self
    }

    /// Create the named snapshot before cloning.
    pub fn create_snapshot(mut self, create: bool) -> Self {
        self.create_snapshot = create;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn clone_name(&self) -> &str {
        &self.clone_name
    }

    pub fn snapshot(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn creates_snapshot(&self) -> bool {
        self.create_snapshot
    }

    /// Snapshot that already exists and is used as the clone source.
    pub fn existing_snapshot(&self) -> Option<&str> {
        if self.create_snapshot {
            None
        } else {
            self.snapshot()
        }
    }

    /// Check the request for internal consistency.
    ///
    /// Runs before any hypervisor call.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(CloneError::InvalidRequest("source VM name is empty".to_string()));
        }
        if self.clone_name.trim().is_empty() {
            return Err(CloneError::InvalidRequest("clone name is empty".to_string()));
        }
        // The clone name becomes part of every destination file name.
        if self.clone_name.contains('/') || self.clone_name.contains('\0') {
            return Err(CloneError::InvalidRequest(format!(
                "clone name {:?} can't be used in a file name",
                self.clone_name
            )));
        }
        if self.clone_name == self.source {
            return Err(CloneError::InvalidRequest(
                "clone name must differ from the source VM name".to_string(),
            ));
        }
        if let Some(snapshot) = &self.snapshot {
            if snapshot.trim().is_empty() {
                return Err(CloneError::InvalidRequest("snapshot name is empty".to_string()));
            }
        }
        if self.create_snapshot && self.snapshot.is_none() {
            return Err(CloneError::InvalidRequest(
                "creating a snapshot requires a snapshot name".to_string(),
            ));
        }
        Ok(())
    }
}
