//! Configuration management for vmclone.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use vmclone_common::LogFormat;
use vmclone_core::CloneOptions;

use crate::cli::Args;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vmclone/config.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hypervisor connection
    pub hypervisor: HypervisorConfig,
    /// Disk image tool
    pub image_tool: ImageToolConfig,
    /// Source VM shutdown
    pub lifecycle: LifecycleConfig,
    /// Clone execution
    pub clone: CloneConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults configuration.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the explicit config file, or the default one when present.
    ///
    /// Returns the configuration and the path it was read from.
    pub fn resolve(explicit: Option<&str>) -> Result<(Self, Option<String>)> {
        match explicit {
            Some(path) => Ok((Self::load(path)?, Some(path.to_string()))),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Ok((
                Self::load(DEFAULT_CONFIG_PATH)?,
                Some(DEFAULT_CONFIG_PATH.to_string()),
            )),
            None => Ok((Self::default(), None)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.lifecycle.poll_interval_secs == 0 {
            anyhow::bail!("lifecycle.poll_interval_secs must be at least 1");
        }
        if self.image_tool.qemu_img_path.trim().is_empty() {
            anyhow::bail!("image_tool.qemu_img_path must not be empty");
        }
        Ok(())
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref uri) = args.libvirt_uri {
            self.hypervisor.libvirt_uri = uri.clone();
        }

        if let Some(ref path) = args.qemu_img {
            self.image_tool.qemu_img_path = path.clone();
        }

        if let Some(timeout) = args.shutdown_timeout {
            self.lifecycle.shutdown_timeout_secs = timeout;
        }

        if args.cleanup_on_failure {
            self.clone.cleanup_on_failure = true;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if args.log_json {
            self.logging.format = LogFormat::Json;
        }

        self
    }

    /// Engine options derived from this configuration.
    pub fn clone_options(&self, dry_run: bool) -> CloneOptions {
        CloneOptions {
            shutdown_timeout: Duration::from_secs(self.lifecycle.shutdown_timeout_secs),
            poll_interval: Duration::from_secs(self.lifecycle.poll_interval_secs),
            cleanup_on_failure: self.clone.cleanup_on_failure,
            dry_run,
        }
    }
}

/// Hypervisor connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    /// Libvirt connection URI
    pub libvirt_uri: String,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            libvirt_uri: "qemu:///system".to_string(),
        }
    }
}

/// Image tool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageToolConfig {
    /// `qemu-img` binary, looked up in `PATH` when not absolute
    pub qemu_img_path: String,
}

impl Default for ImageToolConfig {
    fn default() -> Self {
        Self {
            qemu_img_path: "qemu-img".to_string(),
        }
    }
}

/// Source VM shutdown configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Graceful shutdown timeout before the VM is forced off
    pub shutdown_timeout_secs: u64,
    /// Activity poll interval
    pub poll_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 60,
            poll_interval_secs: 1,
        }
    }
}

/// Clone execution configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Remove images created by a failed run
    pub cleanup_on_failure: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter, overridden by `RUST_LOG`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
