//! Disk duplication strategy selection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CloneError, Result};

/// How each disk of the clone is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum CloneStrategy {
    /// New qcow2 overlay backed by the source image. No data is copied.
    LinkedCreate,
    /// Flattened copy of the source image as of an internal snapshot.
    SnapshotMergeConvert { snapshot: String },
    /// Full, independent copy of the source image.
    FullConvert,
}

impl CloneStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkedCreate => "linked-create",
            Self::SnapshotMergeConvert { .. } => "snapshot-merge-convert",
            Self::FullConvert => "full-convert",
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, Self::LinkedCreate)
    }
}

impl fmt::Display for CloneStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SnapshotMergeConvert { snapshot } => {
                write!(f, "{} ({})", self.as_str(), snapshot)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Pick the strategy for a clone.
///
/// | linked | snapshot | internal | result                 |
/// |--------|----------|----------|------------------------|
/// | yes    | set      | yes      | rejected               |
/// | yes    | any      | other    | LinkedCreate           |
/// | no     | set      | yes      | SnapshotMergeConvert   |
/// | no     | set      | no       | FullConvert            |
/// | no     | unset    | any      | FullConvert            |
///
/// With an external snapshot the source paths already point at the
/// snapshot-time images, so a plain convert is enough.
pub fn select(
    linked: bool,
    snapshot_internal: bool,
    named_snapshot: Option<&str>,
) -> Result<CloneStrategy> {
    match (linked, named_snapshot, snapshot_internal) {
        (true, Some(snapshot), true) => {
            Err(CloneError::LinkedInternalSnapshot(snapshot.to_string()))
        }
        (true, _, _) => Ok(CloneStrategy::LinkedCreate),
        (false, Some(snapshot), true) => Ok(CloneStrategy::SnapshotMergeConvert {
            snapshot: snapshot.to_string(),
        }),
        (false, _, _) => Ok(CloneStrategy::FullConvert),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_table() {
        let snap = Some("before-upgrade");

        assert!(matches!(
            select(true, true, snap),
            Err(CloneError::LinkedInternalSnapshot(ref s)) if s == "before-upgrade"
        ));
        assert_eq!(select(true, false, snap).unwrap(), CloneStrategy::LinkedCreate);
        assert_eq!(select(true, true, None).unwrap(), CloneStrategy::LinkedCreate);
        assert_eq!(select(true, false, None).unwrap(), CloneStrategy::LinkedCreate);
        assert_eq!(
            select(false, true, snap).unwrap(),
            CloneStrategy::SnapshotMergeConvert { snapshot: "before-upgrade".into() }
        );
        assert_eq!(select(false, false, snap).unwrap(), CloneStrategy::FullConvert);
        assert_eq!(select(false, true, None).unwrap(), CloneStrategy::FullConvert);
        assert_eq!(select(false, false, None).unwrap(), CloneStrategy::FullConvert);
    }

    #[test]
    fn test_deterministic() {
        for linked in [true, false] {
            for internal in [true, false] {
                for snap in [None, Some("s")] {
                    let a = select(linked, internal, snap).map_err(|e| e.to_string());
                    let b = select(linked, internal, snap).map_err(|e| e.to_string());
                    assert_eq!(a, b);
                }
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(CloneStrategy::LinkedCreate.to_string(), "linked-create");
        assert_eq!(
            CloneStrategy::SnapshotMergeConvert { snapshot: "s1".into() }.to_string(),
            "snapshot-merge-convert (s1)"
        );
    }
}
