//! Registering the clone with the hypervisor.

use tracing::{info, instrument};

use crate::error::{CloneError, Result};
use crate::traits::Hypervisor;
use crate::types::{DomainDescription, DomainRef};

/// Define the clone as a new persistent, inactive domain.
///
/// Any hypervisor error is reported as [`CloneError::Definition`]. Nothing
/// is rolled back: disk images created for the clone stay on disk.
#[instrument(skip_all)]
pub async fn publish(hypervisor: &dyn Hypervisor, description: &DomainDescription) -> Result<DomainRef> {
    let name = description.name().unwrap_or_default();
    let xml = description.to_xml()?;

    let domain = hypervisor.define_domain(&xml).await.map_err(|e| match e {
        CloneError::Definition { .. } => e,
        other => CloneError::Definition {
            name: name.clone(),
            reason: other.to_string(),
        },
    })?;

    info!(name = %domain.name, uuid = %domain.uuid, "Clone defined");
    Ok(domain)
}
