//! Medical imaging scenario
//!
//! Dataset -> DICOM store -> bulk import from Cloud Storage (polled until the
//! operation finishes) -> study and series search -> optional study delete.
//! Cleanup deletes the store and the dataset.

use super::{unique_suffix, CleanupReport, StateFile};
use crate::gcp::client::GcpClient;
use crate::gcp::error::is_already_exists;
use crate::gcp::operation::PollConfig;
use crate::snippets::healthcare;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SCENARIO_NAME: &str = "imaging";

/// Resources created and results observed so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagingState {
    #[serde(default)]
    pub location: Option<String>,
    /// Dataset the store lives in, created or reused
    #[serde(default)]
    pub dataset: Option<String>,
    /// Whether this scenario created the dataset (and so may delete it)
    #[serde(default)]
    pub dataset_created: bool,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub import_operation: Option<String>,
    #[serde(default)]
    pub imported: u64,
    #[serde(default)]
    pub import_failures: u64,
    #[serde(default)]
    pub studies: Vec<String>,
}

impl ImagingState {
    fn has_resources(&self) -> bool {
        self.dataset_created || self.store.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ImagingOptions {
    pub dataset: String,
    pub store: String,
    /// `gs://bucket/path/**.dcm`
    pub source_uri: String,
    pub delete_first_study: bool,
}

impl ImagingOptions {
    pub fn generated(source_uri: &str) -> Self {
        let suffix = unique_suffix();
        Self {
            dataset: format!("snippet_dataset_{}", suffix),
            store: format!("snippet_store_{}", suffix),
            source_uri: source_uri.to_string(),
            delete_first_study: false,
        }
    }
}

pub async fn run(
    client: &GcpClient,
    options: &ImagingOptions,
    store: &StateFile<ImagingState>,
    poll: PollConfig,
) -> Result<ImagingState> {
    let mut state = store.load()?;
    if state.has_resources() {
        return Err(anyhow::anyhow!(
            "A previous imaging scenario left resources behind; run cleanup first ({})",
            store.path().display()
        ));
    }
    state.location = Some(client.location.clone());

    println!("Creating dataset {} in {}", options.dataset, client.location);
    match healthcare::create_dataset(client, &options.dataset).await {
        Ok(op) => {
            state.dataset = Some(options.dataset.clone());
            state.dataset_created = true;
            store.save(&state)?;
            healthcare::wait_for_operation(client, &op, poll)
                .await
                .and_then(healthcare::OperationProgress::into_result)
                .context("Dataset creation did not finish")?;
        },
        Err(e) if is_already_exists(&e) => {
            // needed to reach the store, but never deleted by cleanup
            println!("  dataset already exists, reusing it");
            state.dataset = Some(options.dataset.clone());
            store.save(&state)?;
        },
        Err(e) => return Err(e),
    }

    println!("Creating DICOM store {}", options.store);
    match healthcare::create_dicom_store(client, &options.dataset, &options.store).await {
        Ok(_) => {
            state.store = Some(options.store.clone());
            store.save(&state)?;
        },
        Err(e) if is_already_exists(&e) => {
            println!("  DICOM store already exists, reusing it");
        },
        Err(e) => return Err(e),
    }

    println!("Importing {}", options.source_uri);
    let op = healthcare::import_dicom(client, &options.dataset, &options.store, &options.source_uri)
        .await?;
    state.import_operation = op
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    store.save(&state)?;

    let progress = healthcare::wait_for_operation(client, &op, poll)
        .await
        .context("DICOM import did not finish")?;
    state.imported = progress.success;
    state.import_failures = progress.failure;
    store.save(&state)?;
    println!("  {}", progress);
    if let Some(error) = &progress.error {
        if progress.success == 0 {
            return Err(anyhow::anyhow!("DICOM import failed: {}", error));
        }
        tracing::warn!("DICOM import finished with errors: {}", error);
        println!("  {} file(s) failed to import, continuing", progress.failure);
    }

    let studies = healthcare::search_studies(client, &options.dataset, &options.store).await?;
    println!("Found {} study(ies)", studies.len());
    for study in &studies {
        println!("  {}", study);
        let series =
            healthcare::search_series(client, &options.dataset, &options.store, &study.study_uid)
                .await?;
        for s in &series {
            println!("    {}", s);
        }
    }
    state.studies = studies.iter().map(|s| s.study_uid.clone()).collect();
    store.save(&state)?;

    if options.delete_first_study {
        if let Some(uid) = state.studies.first().cloned() {
            println!("Deleting study {}", uid);
            let op =
                healthcare::delete_study(client, &options.dataset, &options.store, &uid).await?;
            healthcare::wait_for_operation(client, &op, poll)
                .await?
                .into_result()?;
            state.studies.retain(|s| s != &uid);
            store.save(&state)?;
        }
    }

    Ok(state)
}

pub async fn cleanup(
    client: &GcpClient,
    store: &StateFile<ImagingState>,
) -> Result<CleanupReport> {
    let mut state = store.load()?;
    let mut report = CleanupReport::default();

    let mut regional = client.clone();
    if let Some(location) = &state.location {
        regional.location = location.clone();
    }

    // the store is only reachable through its dataset name
    match (state.store.clone(), state.dataset.clone()) {
        (Some(dicom_store), Some(dataset)) => {
            let result = healthcare::delete_dicom_store(&regional, &dataset, &dicom_store).await;
            if report.record(&format!("delete DICOM store {}", dicom_store), result) {
                state.store = None;
            }
        },
        (Some(dicom_store), None) => {
            report.record(
                &format!("delete DICOM store {}", dicom_store),
                Err(anyhow::anyhow!("State has no dataset for this store")),
            );
        },
        (None, _) => report.skip("delete DICOM store"),
    }

    match state.dataset.clone().filter(|_| state.dataset_created) {
        Some(dataset) => {
            let result = healthcare::delete_dataset(&regional, &dataset).await;
            if report.record(&format!("delete dataset {}", dataset), result) {
                state.dataset = None;
                state.dataset_created = false;
            }
        },
        None => report.skip("delete dataset"),
    }

    if report.is_clean() {
        store.clear()?;
    } else {
        store.save(&state)?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_are_valid_ids() {
        let options = ImagingOptions::generated("gs://bkt/dicom/**.dcm");
        // Healthcare IDs allow letters, digits, underscores, dashes and dots
        assert!(options
            .dataset
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert!(options.store.starts_with("snippet_store_"));
    }

    #[test]
    fn test_old_state_files_load() {
        let state: ImagingState = serde_json::from_str(r#"{"dataset":"d"}"#).unwrap();
        assert_eq!(state.dataset.as_deref(), Some("d"));
        assert!(!state.dataset_created);
        assert!(state.studies.is_empty());
    }

    #[test]
    fn test_reused_dataset_alone_is_not_a_leftover() {
        let reused = ImagingState {
            dataset: Some("d".to_string()),
            ..ImagingState::default()
        };
        assert!(!reused.has_resources());

        let with_store = ImagingState {
            store: Some("s".to_string()),
            ..reused
        };
        assert!(with_store.has_resources());
    }
}
