//! Configuration Management
//!
//! Handles persistent configuration storage for gcpsnip.

use crate::gcp::auth;
use crate::gcp::endpoints::ServiceEndpoints;
use crate::gcp::operation::PollConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_ZONE: &str = "us-central1-a";
const DEFAULT_LOCATION: &str = "us-central1";

/// Polling settings as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        let defaults = PollConfig::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            max_attempts: defaults.max_attempts,
        }
    }
}

impl From<&PollSettings> for PollConfig {
    fn from(settings: &PollSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            max_attempts: settings.max_attempts,
        }
    }
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Project ID to use when none is given on the command line
    #[serde(default)]
    pub project_id: Option<String>,
    /// Compute zone
    #[serde(default)]
    pub zone: Option<String>,
    /// Region for regional APIs (Healthcare)
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub poll: PollSettings,
    /// Per-service base URL overrides
    #[serde(default)]
    pub endpoints: ServiceEndpoints,
}

impl Config {
    /// Directory holding config, log and scenario state
    pub fn app_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gcpsnip"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::app_dir().map(|p| p.join("config.json"))
    }

    /// Load configuration from disk; missing or unreadable files give defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Effective project (config > gcloud default)
    pub fn effective_project(&self) -> String {
        self.project_id
            .clone()
            .or_else(auth::get_default_project)
            .unwrap_or_default()
    }

    /// Effective zone (config > gcloud default > us-central1-a)
    pub fn effective_zone(&self) -> String {
        self.zone
            .clone()
            .or_else(auth::get_default_zone)
            .unwrap_or_else(|| DEFAULT_ZONE.to_string())
    }

    /// Effective location (config > gcloud region > us-central1)
    pub fn effective_location(&self) -> String {
        self.location
            .clone()
            .or_else(auth::get_default_region)
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string())
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::from(&self.poll)
    }

    pub fn set_project(&mut self, project_id: &str) -> Result<()> {
        if !auth::validate_project_id(project_id) {
            return Err(anyhow::anyhow!("Invalid project ID: {}", project_id));
        }
        self.project_id = Some(project_id.to_string());
        self.save()
    }

    pub fn set_zone(&mut self, zone: &str) -> Result<()> {
        self.zone = Some(zone.to_string());
        self.save()
    }

    pub fn set_location(&mut self, location: &str) -> Result<()> {
        self.location = Some(location.to_string());
        self.save()
    }
}
