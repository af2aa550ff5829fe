//! Cloud Healthcare snippets (medical imaging)
//!
//! Datasets and DICOM stores, bulk import/export from Cloud Storage, DICOMweb
//! searches. Dataset creation, import, export and study deletion return
//! google.longrunning operations; [`wait_for_operation`] polls them.

use super::str_field;
use crate::gcp::client::{short_name, GcpClient};
use crate::gcp::operation::{poll_until, Check, PollConfig};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fmt;

/// DICOM attribute tags used in search results
const TAG_STUDY_INSTANCE_UID: &str = "0020000D";
const TAG_SERIES_INSTANCE_UID: &str = "0020000E";
const TAG_PATIENT_ID: &str = "00100020";
const TAG_STUDY_DATE: &str = "00080020";
const TAG_MODALITY: &str = "00080060";
const TAG_NUMBER_OF_SERIES_INSTANCES: &str = "00201209";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudySummary {
    pub study_uid: String,
    pub patient_id: String,
    pub study_date: String,
}

impl fmt::Display for StudySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<64} patient={:<16} date={}",
            self.study_uid, self.patient_id, self.study_date
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSummary {
    pub series_uid: String,
    pub modality: String,
    pub instances: String,
}

impl fmt::Display for SeriesSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<64} {:<4} {} instance(s)",
            self.series_uid, self.modality, self.instances
        )
    }
}

/// Progress of an import/export operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationProgress {
    pub name: String,
    pub done: bool,
    pub success: u64,
    pub failure: u64,
    pub error: Option<String>,
}

impl From<&Value> for OperationProgress {
    fn from(op: &Value) -> Self {
        let counter = op
            .get("metadata")
            .and_then(|m| m.get("counter"))
            .cloned()
            .unwrap_or(Value::Null);
        // int64 counters arrive as strings
        let count = |key: &str| {
            counter
                .get(key)
                .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64()))
                .unwrap_or(0)
        };

        Self {
            name: str_field(op, "name"),
            done: op.get("done").and_then(|v| v.as_bool()).unwrap_or(false),
            success: count("success"),
            failure: count("failure"),
            error: op
                .get("error")
                .map(|e| str_field(e, "message")),
        }
    }
}

impl OperationProgress {
    /// Turn a finished operation that carries an error into an `Err`
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(e) => Err(anyhow::anyhow!("Operation failed: {}", e)),
            None => Ok(self),
        }
    }
}

impl fmt::Display for OperationProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match (&self.error, self.done) {
            (Some(e), _) => format!("FAILED ({})", e),
            (None, true) => "DONE".to_string(),
            (None, false) => "RUNNING".to_string(),
        };
        write!(
            f,
            "{} {} success={} failure={}",
            short_name(&self.name),
            state,
            self.success,
            self.failure
        )
    }
}

/// First string value of a DICOM JSON attribute
fn dicom_string(item: &Value, tag: &str) -> String {
    let value = item.get(tag).and_then(|a| a.get("Value")).and_then(|v| v.get(0));
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        // PN (person name) values are objects
        Some(Value::Object(o)) => o
            .get("Alphabetic")
            .and_then(|v| v.as_str())
            .unwrap_or("-")
            .to_string(),
        _ => "-".to_string(),
    }
}

fn parse_studies(response: &Value) -> Vec<StudySummary> {
    response
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| StudySummary {
                    study_uid: dicom_string(item, TAG_STUDY_INSTANCE_UID),
                    patient_id: dicom_string(item, TAG_PATIENT_ID),
                    study_date: dicom_string(item, TAG_STUDY_DATE),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_series(response: &Value) -> Vec<SeriesSummary> {
    response
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| SeriesSummary {
                    series_uid: dicom_string(item, TAG_SERIES_INSTANCE_UID),
                    modality: dicom_string(item, TAG_MODALITY),
                    instances: dicom_string(item, TAG_NUMBER_OF_SERIES_INSTANCES),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Create a dataset; returns the long-running operation
pub async fn create_dataset(client: &GcpClient, dataset: &str) -> Result<Value> {
    let url = format!(
        "{}?datasetId={}",
        client.healthcare_url(&client.healthcare_datasets_name()),
        urlencoding::encode(dataset)
    );
    tracing::info!("Creating dataset {} in {}", dataset, client.location);
    client
        .post(&url, Some(&json!({})))
        .await
        .with_context(|| format!("Failed to create dataset {}", dataset))
}

/// Dataset short names in the configured location
pub async fn list_datasets(client: &GcpClient) -> Result<Vec<String>> {
    let url = client.healthcare_url(&client.healthcare_datasets_name());
    let items = client.fetch_all(&url, "datasets").await?;
    Ok(items
        .iter()
        .map(|d| short_name(&str_field(d, "name")).to_string())
        .collect())
}

pub async fn delete_dataset(client: &GcpClient, dataset: &str) -> Result<()> {
    client
        .delete(&client.healthcare_dataset_url(dataset))
        .await
        .with_context(|| format!("Failed to delete dataset {}", dataset))?;
    Ok(())
}

pub async fn create_dicom_store(client: &GcpClient, dataset: &str, store: &str) -> Result<Value> {
    let url = format!(
        "{}/dicomStores?dicomStoreId={}",
        client.healthcare_dataset_url(dataset),
        urlencoding::encode(store)
    );
    tracing::info!("Creating DICOM store {}/{}", dataset, store);
    client
        .post(&url, Some(&json!({})))
        .await
        .with_context(|| format!("Failed to create DICOM store {}", store))
}

pub async fn get_dicom_store(client: &GcpClient, dataset: &str, store: &str) -> Result<Value> {
    client.get(&client.dicom_store_url(dataset, store)).await
}

pub async fn delete_dicom_store(client: &GcpClient, dataset: &str, store: &str) -> Result<()> {
    client
        .delete(&client.dicom_store_url(dataset, store))
        .await
        .with_context(|| format!("Failed to delete DICOM store {}", store))?;
    Ok(())
}

/// Start a bulk import from `gs://bucket/path/**.dcm`; returns the operation
pub async fn import_dicom(
    client: &GcpClient,
    dataset: &str,
    store: &str,
    gcs_uri: &str,
) -> Result<Value> {
    if !gcs_uri.starts_with("gs://") {
        return Err(anyhow::anyhow!("Import source must be a gs:// URI: {}", gcs_uri));
    }
    let url = format!("{}:import", client.dicom_store_url(dataset, store));
    let body = json!({ "gcsSource": { "uri": gcs_uri } });
    tracing::info!("Importing {} into {}/{}", gcs_uri, dataset, store);
    client
        .post(&url, Some(&body))
        .await
        .context("Failed to start DICOM import")
}

/// Start a bulk export to `gs://bucket/prefix`; returns the operation
pub async fn export_dicom(
    client: &GcpClient,
    dataset: &str,
    store: &str,
    gcs_prefix: &str,
) -> Result<Value> {
    if !gcs_prefix.starts_with("gs://") {
        return Err(anyhow::anyhow!("Export target must be a gs:// URI: {}", gcs_prefix));
    }
    let url = format!("{}:export", client.dicom_store_url(dataset, store));
    let body = json!({ "gcsDestination": { "uriPrefix": gcs_prefix } });
    client
        .post(&url, Some(&body))
        .await
        .context("Failed to start DICOM export")
}

/// Fetch an operation by its full resource name
pub async fn get_operation(client: &GcpClient, name: &str) -> Result<OperationProgress> {
    let op = client.get(&client.healthcare_url(name)).await?;
    Ok(OperationProgress::from(&op))
}

/// Poll an operation returned by one of the calls above until it finishes
///
/// A finished operation is returned even when it carries an `error`: bulk
/// imports report partial failures that way, next to their counters. Use
/// [`OperationProgress::into_result`] when any error is fatal.
pub async fn wait_for_operation(
    client: &GcpClient,
    op: &Value,
    config: PollConfig,
) -> Result<OperationProgress> {
    let name = op
        .get("name")
        .and_then(|v| v.as_str())
        .context("Response is not an operation (missing name)")?;
    let url = client.healthcare_url(name);
    tracing::info!("Waiting for operation {}", url);

    poll_until(config, |_| {
        let url = url.clone();
        async move {
            let progress = OperationProgress::from(&client.get(&url).await?);
            if progress.done {
                Ok::<_, anyhow::Error>(Check::Ready(progress))
            } else {
                Ok(Check::Pending(format!(
                    "RUNNING success={} failure={}",
                    progress.success, progress.failure
                )))
            }
        }
    })
    .await
}

pub async fn search_studies(
    client: &GcpClient,
    dataset: &str,
    store: &str,
) -> Result<Vec<StudySummary>> {
    let url = format!("{}/dicomWeb/studies", client.dicom_store_url(dataset, store));
    let response = client.get(&url).await?;
    Ok(parse_studies(&response))
}

pub async fn search_series(
    client: &GcpClient,
    dataset: &str,
    store: &str,
    study_uid: &str,
) -> Result<Vec<SeriesSummary>> {
    let url = format!(
        "{}/dicomWeb/studies/{}/series",
        client.dicom_store_url(dataset, store),
        study_uid
    );
    let response = client.get(&url).await?;
    Ok(parse_series(&response))
}

/// Delete a study; returns the long-running operation
pub async fn delete_study(
    client: &GcpClient,
    dataset: &str,
    store: &str,
    study_uid: &str,
) -> Result<Value> {
    let url = format!(
        "{}/dicomWeb/studies/{}",
        client.dicom_store_url(dataset, store),
        study_uid
    );
    client
        .delete(&url)
        .await
        .with_context(|| format!("Failed to delete study {}", study_uid))
}
