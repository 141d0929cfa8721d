//! # vmclone
//!
//! Clones a libvirt/QEMU virtual machine into a new, inactive domain.
//!
//! ## Usage
//! ```bash
//! vmclone web01 web01clone                      # full copy, VM shut down first
//! vmclone web01 web01dev --linked               # qcow2 overlays over web01's disks
//! vmclone db01 db01test -s before-upgrade       # from a named snapshot
//! vmclone app01 app01copy -s pre-clone --create # snapshot first, VM keeps running
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use vmclone_core::{CloneEngine, CloneRequest, Hypervisor, QemuImg};

mod cli;
mod config;
mod report;

use cli::Args;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Configuration decides the log format, so it is read first.
    let (config, config_path) = Config::resolve(args.config.as_deref())?;
    let config = config.with_cli_overrides(&args);

    vmclone_common::init(&config.logging.level, config.logging.format)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting vmclone");
    match &config_path {
        Some(path) => info!(config_path = %path, "Configuration loaded"),
        None => info!("No config file found, using CLI arguments and defaults"),
    }

    if let Err(e) = run(&args, &config).await {
        error!(error = %e, "Clone failed");
        return Err(e);
    }

    Ok(())
}

async fn run(args: &Args, config: &Config) -> Result<()> {
    let request = CloneRequest::new(&args.vm_name, &args.vm_clone)
        .linked(args.linked)
        .create_snapshot(args.create);
    let request = match &args.snapshot {
        Some(snapshot) => request.with_snapshot(snapshot),
        None => request,
    };

    let hypervisor = connect(config).await?;

    let image_tool = QemuImg::new()
        .with_binary(&config.image_tool.qemu_img_path)
        .with_progress(!args.json);
    let version = image_tool
        .version()
        .await
        .context("qemu-img is required to inspect and copy disks")?;
    info!(version = %version, "Image tool available");

    let engine = CloneEngine::new(hypervisor, Arc::new(image_tool))
        .with_options(config.clone_options(args.dry_run));

    let report = engine.run(&request).await.map_err(|e| {
        anyhow::Error::new(e).context(format!(
            "Can't clone {} to {}",
            request.source(),
            request.clone_name()
        ))
    })?;

    if let Some(domain) = &report.domain {
        info!(
            name = %domain.name,
            uuid = %domain.uuid,
            strategy = %report.plan.strategy,
            disks = report.plan.tasks.len(),
            "Clone complete"
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report::to_json(&report)?)?);
    } else {
        print!("{}", report::to_text(&report)?);
    }

    Ok(())
}

/// Open the hypervisor connection.
async fn connect(config: &Config) -> Result<Arc<dyn Hypervisor>> {
    #[cfg(feature = "libvirt")]
    {
        let uri = &config.hypervisor.libvirt_uri;
        let backend = vmclone_core::LibvirtBackend::new(uri)
            .await
            .with_context(|| format!("Can't connect to {}", uri))?;
        Ok(Arc::new(backend))
    }
    #[cfg(not(feature = "libvirt"))]
    {
        anyhow::bail!(
            "vmclone was built without libvirt support, can't connect to {}",
            config.hypervisor.libvirt_uri
        )
    }
}
