//! Command-line argument parsing.

use clap::Parser;

/// vmclone - clone libvirt/QEMU virtual machines
#[derive(Parser, Debug, Clone)]
#[command(name = "vmclone")]
#[command(about = "Clone a libvirt/QEMU virtual machine, optionally from a snapshot or as a linked clone")]
#[command(version)]
pub struct Args {
    /// Name of the source VM
    pub vm_name: String,

    /// Name of the new VM
    pub vm_clone: String,

    /// Create a linked clone (qcow2 overlays backed by the source disks)
    #[arg(short, long)]
    pub linked: bool,

    /// Clone from the named snapshot
    #[arg(short, long, value_name = "SNAP_NAME")]
    pub snapshot: Option<String>,

    /// Create the snapshot given with --snapshot before cloning
    #[arg(short, long, requires = "snapshot")]
    pub create: bool,

    /// Path to configuration file (optional, defaults used if not found)
    #[arg(long, env = "VMCLONE_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "VMCLONE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Libvirt connection URI
    #[arg(long, env = "LIBVIRT_DEFAULT_URI")]
    pub libvirt_uri: Option<String>,

    /// Path to the qemu-img binary
    #[arg(long, env = "VMCLONE_QEMU_IMG")]
    pub qemu_img: Option<String>,

    /// Seconds to wait for a graceful shutdown before forcing the VM off
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Remove the clone's disk images when a disk copy fails
    #[arg(long)]
    pub cleanup_on_failure: bool,

    /// Show the clone plan without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Print the result as JSON on stdout
    #[arg(long)]
    pub json: bool,
}
