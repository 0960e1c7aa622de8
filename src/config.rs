// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Connector configuration
//!
//! All knobs have defaults, so an empty JSON object is a valid config.
//! The default location is ~/.kubesql/config.json.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for `max_retries`; backoff doubles per attempt
pub const MAX_RETRIES: u32 = 10;

/// Get the base kubesql directory (~/.kubesql/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".kubesql"))
        .context("Could not determine home directory")
}

/// Connector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Kubeconfig context to connect to (kubeconfig default when unset)
    pub context: Option<String>,
    /// Page size for paginated list requests
    pub page_size: u32,
    /// Maximum number of path segments a flattened column may have
    pub max_flatten_depth: usize,
    /// Maximum attempts for transient listing/discovery failures
    pub max_retries: u32,
    /// Base delay for exponential backoff, doubled on each retry
    pub retry_base_delay_ms: u64,
    /// Timeout for connecting to the API server
    pub connect_timeout_secs: u64,
    /// Timeout for reading API server responses
    pub read_timeout_secs: u64,
    /// How long discovered resource kinds are reused before rediscovery
    pub catalog_ttl_secs: u64,
    /// Plan one split per namespace for namespaced kinds
    pub split_by_namespace: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            context: None,
            page_size: 500,
            max_flatten_depth: 3,
            max_retries: 3,
            retry_base_delay_ms: 100,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            catalog_ttl_secs: 300,
            split_by_namespace: true,
        }
    }
}

impl ConnectorConfig {
    /// Load config from the default path, or return defaults if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from a specific file, or return defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ConnectorConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Get the config file path (~/.kubesql/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.page_size > 0, "page_size must be greater than zero");
        anyhow::ensure!(
            self.max_flatten_depth > 0,
            "max_flatten_depth must be greater than zero"
        );
        anyhow::ensure!(
            (1..=MAX_RETRIES).contains(&self.max_retries),
            "max_retries must be between 1 and {}",
            MAX_RETRIES
        );
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }
}
