//! Libvirt hypervisor backend.
//!
//! Requires the `libvirt` feature and a system with libvirt installed.

#[cfg(feature = "libvirt")]
mod backend;

#[cfg(feature = "libvirt")]
pub use backend::LibvirtBackend;

