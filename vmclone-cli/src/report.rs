//! Clone result output on stdout.

use anyhow::Result;
use serde_json::{json, Value};
use vmclone_core::{CloneReport, StopOutcome};

fn stop_label(stop: Option<StopOutcome>) -> &'static str {
    match stop {
        None => "not needed",
        Some(StopOutcome::AlreadyStopped) => "already stopped",
        Some(StopOutcome::Graceful) => "shut down",
        Some(StopOutcome::Forced) => "forced off",
    }
}

/// Machine readable form of a report.
pub fn to_json(report: &CloneReport) -> Result<Value> {
    Ok(json!({
        "clone": report.plan.clone_name(),
        "dry_run": report.dry_run,
        "strategy": report.plan.strategy,
        "disks": report.plan.tasks,
        "domain": report.domain,
        "snapshot_created": report.snapshot_created,
        "source_stop": stop_label(report.stop),
        "xml": report.plan.description.to_xml()?,
    }))
}

/// Human readable summary.
pub fn to_text(report: &CloneReport) -> Result<String> {
    let mut out = String::new();

    if report.dry_run {
        out.push_str(&format!("Dry run for clone {}\n", report.plan.clone_name()));
    } else if let Some(domain) = &report.domain {
        out.push_str(&format!("Clone {} created ({})\n", domain.name, domain.uuid));
    }

    out.push_str(&format!("  strategy:    {}\n", report.plan.strategy));
    out.push_str(&format!("  source VM:   {}\n", stop_label(report.stop)));
    if let Some(snapshot) = &report.snapshot_created {
        out.push_str(&format!("  snapshot:    {} (created)\n", snapshot.name));
    }
    for task in &report.plan.tasks {
        out.push_str(&format!(
            "  disk {:<6} {} -> {}\n",
            task.target.as_deref().unwrap_or("-"),
            task.source.display(),
            task.dest.display()
        ));
    }

    if report.dry_run {
        out.push('\n');
        out.push_str(&report.plan.description.to_xml()?);
        out.push('\n');
    }

    Ok(out)
}
