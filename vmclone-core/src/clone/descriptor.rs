//! Rewriting the source domain description into the clone description.
//!
//! The source is never modified: [`rewrite_description`] walks the source
//! tree and assembles a new one, copying untouched nodes and substituting
//! the ones the clone needs to differ in:
//!
//! - `<name>` gets the clone name
//! - `<uuid>` and interface `<mac>` elements are dropped so the hypervisor
//!   assigns fresh ones
//! - every `disk` role entry points at its new image as a plain qcow2 file,
//!   optionally backed by the original image (linked clones)

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use super::plan::DiskTask;
use crate::error::{CloneError, Result};
use crate::storage::{resolve_disk_path, QCOW2};
use crate::traits::Hypervisor;
use crate::types::{Disk, DiskDevice, DomainDescription};
use crate::xml::{Element, Node};

/// A rewritten description and the disk copies it depends on.
#[derive(Debug, Clone)]
pub struct ClonedDescription {
    pub description: DomainDescription,
    pub tasks: Vec<DiskTask>,
}

/// Destination image for `source` in the same directory:
/// `{dir}/{clone_name}_{file_name}`.
pub fn destination_path(source: &Path, clone_name: &str) -> Result<PathBuf> {
    let dir = source.parent().ok_or_else(|| {
        CloneError::UnsupportedDisk(format!("Disk path {} has no directory", source.display()))
    })?;
    let file_name = source.file_name().ok_or_else(|| {
        CloneError::UnsupportedDisk(format!("Disk path {} has no file name", source.display()))
    })?;
    Ok(dir.join(format!("{}_{}", clone_name, file_name.to_string_lossy())))
}

/// Resolve the source images and build the clone description.
#[instrument(skip(hypervisor, source))]
pub async fn build_clone_description(
    hypervisor: &dyn Hypervisor,
    source: &DomainDescription,
    clone_name: &str,
    linked: bool,
) -> Result<ClonedDescription> {
    let mut resolved = Vec::new();
    for disk in source.disks() {
        match &disk.device {
            DiskDevice::Disk => resolved.push(resolve_disk_path(hypervisor, &disk).await?),
            DiskDevice::Cdrom => {}
            DiskDevice::Other(device) => {
                return Err(CloneError::UnsupportedDisk(format!(
                    "Unsupported disk device type {}",
                    device
                )))
            }
        }
    }

    rewrite_description(source, clone_name, linked, &resolved)
}

/// Build the clone description from already resolved disk paths.
///
/// `resolved` holds the absolute image path of every `disk` role entry, in
/// document order.
pub fn rewrite_description(
    source: &DomainDescription,
    clone_name: &str,
    linked: bool,
    resolved: &[PathBuf],
) -> Result<ClonedDescription> {
    let mut rewriter = Rewriter {
        clone_name,
        linked,
        resolved: resolved.iter(),
        tasks: Vec::new(),
        renamed: false,
    };

    let root = rewriter.domain(source.element())?;

    if !rewriter.renamed {
        return Err(CloneError::XmlError("Domain description has no <name>".to_string()));
    }
    if rewriter.tasks.is_empty() {
        return Err(CloneError::UnsupportedDisk("Error no disks found".to_string()));
    }
    if rewriter.resolved.next().is_some() {
        return Err(CloneError::Internal(
            "More resolved disk paths than disk entries".to_string(),
        ));
    }

    Ok(ClonedDescription {
        description: DomainDescription::from_element(root)?,
        tasks: rewriter.tasks,
    })
}

struct Rewriter<'a> {
    clone_name: &'a str,
    linked: bool,
    resolved: std::slice::Iter<'a, PathBuf>,
    tasks: Vec<DiskTask>,
    renamed: bool,
}

impl Rewriter<'_> {
    fn domain(&mut self, root: &Element) -> Result<Element> {
        let mut children = Vec::with_capacity(root.children.len());
        for node in &root.children {
            match node {
                Node::Element(el) if el.name == "uuid" => {}
                Node::Element(el) if el.name == "name" => {
                    self.renamed = true;
                    children.push(Node::Element(el.with_replaced_text(self.clone_name)));
                }
                Node::Element(el) if el.name == "devices" => {
                    children.push(Node::Element(self.devices(el)?));
                }
                other => children.push(other.clone()),
            }
        }
        Ok(shallow_copy(root, children))
    }

    fn devices(&mut self, devices: &Element) -> Result<Element> {
        let mut children = Vec::with_capacity(devices.children.len());
        for node in &devices.children {
            match node {
                Node::Element(el) if el.name == "interface" => {
                    children.push(Node::Element(without_children(el, "mac")));
                }
                Node::Element(el) if el.name == "disk" => {
                    children.push(Node::Element(self.disk(el)?));
                }
                other => children.push(other.clone()),
            }
        }
        Ok(shallow_copy(devices, children))
    }

    fn disk(&mut self, el: &Element) -> Result<Element> {
        let disk = Disk::from_element(el);
        match &disk.device {
            DiskDevice::Cdrom => return Ok(el.clone()),
            DiskDevice::Disk => {}
            DiskDevice::Other(device) => {
                return Err(CloneError::UnsupportedDisk(format!(
                    "Unsupported disk device type {} for {}",
                    device,
                    disk.label()
                )))
            }
        }
        if !matches!(disk.source_type.as_str(), "file" | "volume") {
            return Err(CloneError::UnsupportedDisk(format!(
                "Disk type {} not supported: {}",
                disk.source_type,
                disk.label()
            )));
        }

        let source_path = self.resolved.next().cloned().ok_or_else(|| {
            CloneError::Internal(format!("No resolved path for disk {}", disk.label()))
        })?;
        let dest_path = destination_path(&source_path, self.clone_name)?;

        let mut children = Vec::with_capacity(el.children.len() + 2);
        let mut previous_backing: Option<Element> = None;
        let mut has_source = false;
        let mut has_driver = false;

        for node in &el.children {
            match node {
                Node::Element(child) if child.name == "source" => {
                    has_source = true;
                    let source = Element {
                        name: child.name.clone(),
                        attributes: vec![("file".to_string(), dest_path.display().to_string())],
                        children: child.children.clone(),
                    };
                    children.push(Node::Element(source));
                }
                Node::Element(child) if child.name == "backingStore" => {
                    if previous_backing.is_none() {
                        previous_backing = Some(child.clone());
                    }
                }
                Node::Element(child) if child.name == "driver" => {
                    has_driver = true;
                    children.push(Node::Element(child.clone().with_attr("type", QCOW2)));
                }
                other => children.push(other.clone()),
            }
        }

        if !has_source {
            return Err(CloneError::UnsupportedDisk(format!(
                "Disk {} has no <source>",
                disk.label()
            )));
        }
        if !has_driver {
            // Without an explicit format libvirt would treat the image as raw.
            let driver = Element::new("driver")
                .with_attr("name", "qemu")
                .with_attr("type", QCOW2);
            children.insert(0, Node::Element(driver));
        }

        if self.linked {
            let mut backing = Element::new("backingStore")
                .with_attr("type", "file")
                .with_child(Element::new("format").with_attr("type", QCOW2))
                .with_child(
                    Element::new("source").with_attr("file", source_path.display().to_string()),
                );
            if let Some(previous) = previous_backing {
                backing = backing.with_child(previous);
            }
            children.push(Node::Element(backing));
        }

        debug!(
            source = %source_path.display(),
            dest = %dest_path.display(),
            "Disk redirected"
        );

        self.tasks.push(DiskTask {
            target: disk.target.clone(),
            source: source_path,
            dest: dest_path,
        });

        let mut rewritten = shallow_copy(el, children);
        rewritten.set_attr("type", "file");
        Ok(rewritten)
    }
}

fn shallow_copy(el: &Element, children: Vec<Node>) -> Element {
    Element {
        name: el.name.clone(),
        attributes: el.attributes.clone(),
        children,
    }
}

fn without_children(el: &Element, name: &str) -> Element {
    let children = el
        .children
        .iter()
        .filter(|n| !matches!(n, Node::Element(c) if c.name == name))
        .cloned()
        .collect();
    shallow_copy(el, children)
}
