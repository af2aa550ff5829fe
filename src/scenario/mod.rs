//! Scenario scripts
//!
//! A scenario chains several snippets into an end-to-end workflow. Every
//! resource it creates is recorded in a small JSON state file right after the
//! call succeeds, so a later `cleanup` (or a rerun after a crash) knows what
//! exists. Cleanup is best-effort: each step runs regardless of the others.
//!
//! - [`compute`] - SSH key, firewall rule, VM, wait for RUNNING
//! - [`imaging`] - Healthcare dataset, DICOM store, import, search
//! - [`deployment`] - Deployment Manager stack from a YAML file

pub mod compute;
pub mod deployment;
pub mod imaging;

use crate::config::Config;
use crate::gcp::error::is_not_found;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Disk-backed state of one scenario
pub struct StateFile<T> {
    path: PathBuf,
    _state: PhantomData<T>,
}

impl<T> StateFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// State file under the app config directory
    pub fn for_scenario(name: &str) -> Result<Self> {
        let dir = Config::app_dir().context("Could not determine the config directory")?;
        Ok(Self::at(dir.join("scenarios").join(format!("{}.json", name))))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _state: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the state; a missing file is the default state
    pub fn load(&self) -> Result<T> {
        if !self.path.exists() {
            return Ok(T::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt scenario state in {}", self.path.display()))
    }

    pub fn save(&self, state: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        tracing::debug!("Saved scenario state to {}", self.path.display());
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// Short random suffix for generated resource names
pub fn unique_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// How one cleanup step went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// The resource was already gone (404)
    AlreadyGone,
    /// Nothing recorded for this step
    Skipped,
    Failed(String),
}

/// Outcome of every step of a best-effort cleanup
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub steps: Vec<(String, StepOutcome)>,
}

impl CleanupReport {
    /// Record a step; returns false when it failed
    pub fn record(&mut self, step: &str, result: Result<()>) -> bool {
        let outcome = match result {
            Ok(()) => StepOutcome::Done,
            Err(e) if is_not_found(&e) => StepOutcome::AlreadyGone,
            Err(e) => {
                tracing::warn!("Cleanup step '{}' failed: {:#}", step, e);
                StepOutcome::Failed(format!("{:#}", e))
            },
        };
        let ok = !matches!(outcome, StepOutcome::Failed(_));
        self.steps.push((step.to_string(), outcome));
        ok
    }

    pub fn skip(&mut self, step: &str) {
        self.steps.push((step.to_string(), StepOutcome::Skipped));
    }

    pub fn is_clean(&self) -> bool {
        !self
            .steps
            .iter()
            .any(|(_, o)| matches!(o, StepOutcome::Failed(_)))
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (step, outcome) in &self.steps {
            let text = match outcome {
                StepOutcome::Done => "done".to_string(),
                StepOutcome::AlreadyGone => "already gone".to_string(),
                StepOutcome::Skipped => "skipped".to_string(),
                StepOutcome::Failed(e) => format!("FAILED: {}", e),
            };
            writeln!(f, "  {:<32} {}", step, text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::error::ApiError;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct DemoState {
        bucket: Option<String>,
        #[serde(default)]
        objects: Vec<String>,
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store: StateFile<DemoState> = StateFile::at(dir.path().join("s").join("demo.json"));

        assert!(!store.exists());
        assert_eq!(store.load().unwrap(), DemoState::default());

        let state = DemoState {
            bucket: Some("b".to_string()),
            objects: vec!["o1".to_string()],
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);

        store.clear().unwrap();
        assert!(!store.exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_state_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.json");
        std::fs::write(&path, "{").unwrap();
        let store: StateFile<DemoState> = StateFile::at(&path);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_cleanup_report() {
        let mut report = CleanupReport::default();
        report.record("delete instance", Ok(()));
        report.record(
            "delete firewall",
            Err(ApiError::from_response(404, "").into()),
        );
        report.skip("remove ssh key");
        assert!(report.is_clean());

        report.record("delete dataset", Err(anyhow::anyhow!("timeout")));
        assert!(!report.is_clean());
        assert_eq!(report.steps[1].1, StepOutcome::AlreadyGone);

        let text = report.to_string();
        assert!(text.contains("already gone"));
        assert!(text.contains("FAILED: timeout"));
    }

    #[test]
    fn test_unique_suffix() {
        let a = unique_suffix();
        assert_eq!(a.len(), 8);
        assert_ne!(a, unique_suffix());
    }
}
