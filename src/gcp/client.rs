//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication,
//! HTTP functionality and per-service URL builders. Every snippet obtains
//! one of these from `main` and makes exactly one call through it.

use super::auth::GcpCredentials;
use super::endpoints::ServiceEndpoints;
use super::http::GcpHttpClient;
use anyhow::{Context, Result};
use serde_json::Value;

/// Where a client points: project, placement and service hosts
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub project_id: String,
    pub zone: String,
    /// Region used by regional APIs (Healthcare datasets)
    pub location: String,
    pub endpoints: ServiceEndpoints,
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub project_id: String,
    pub zone: String,
    pub location: String,
    pub endpoints: ServiceEndpoints,
}

impl GcpClient {
    /// Create a new client using Application Default Credentials
    pub async fn new(options: ClientOptions) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_credentials(credentials, options)
    }

    /// Create a client from explicit credentials
    pub fn with_credentials(credentials: GcpCredentials, options: ClientOptions) -> Result<Self> {
        let http = GcpHttpClient::new()?;

        Ok(Self {
            credentials,
            http,
            project_id: options.project_id,
            zone: options.zone,
            location: options.location,
            endpoints: options.endpoints,
        })
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.get(url, &token).await
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.post(url, &token, body).await
    }

    /// Make a PUT request to a GCP API
    pub async fn put(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.put(url, &token, body).await
    }

    /// Make a PATCH request to a GCP API
    pub async fn patch(&self, url: &str, body: &Value) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.patch(url, &token, body).await
    }

    /// Make a DELETE request to a GCP API
    pub async fn delete(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.delete(url, &token).await
    }

    /// Download a raw payload
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let token = self.get_token().await?;
        self.http.get_bytes(url, &token).await
    }

    /// Upload a raw payload
    pub async fn post_bytes(&self, url: &str, content_type: &str, bytes: Vec<u8>) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.post_bytes(url, &token, content_type, bytes).await
    }

    /// Get the region from the current zone
    pub fn get_region(&self) -> String {
        region_of_zone(&self.zone)
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/{}",
            self.endpoints.compute, self.project_id, path
        )
    }

    /// Build the URL of the project resource itself
    pub fn compute_project_url(&self) -> String {
        format!(
            "{}/compute/v1/projects/{}",
            self.endpoints.compute, self.project_id
        )
    }

    /// Build zonal Compute Engine API URL
    pub fn compute_zonal_url(&self, resource: &str) -> String {
        self.compute_url(&format!("zones/{}/{}", self.zone, resource))
    }

    /// Build regional Compute Engine API URL
    pub fn compute_regional_url(&self, resource: &str) -> String {
        self.compute_url(&format!("regions/{}/{}", self.get_region(), resource))
    }

    /// Build global Compute Engine API URL
    pub fn compute_global_url(&self, resource: &str) -> String {
        self.compute_url(&format!("global/{}", resource))
    }

    /// Build the URL of the newest image in a public image family
    pub fn compute_image_family_url(&self, image_project: &str, family: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/global/images/family/{}",
            self.endpoints.compute, image_project, family
        )
    }

    // =========================================================================
    // Cloud Storage API helpers
    // =========================================================================

    /// Build Cloud Storage API URL
    pub fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.endpoints.storage, path)
    }

    /// Build Cloud Storage bucket URL
    pub fn storage_bucket_url(&self, bucket: &str) -> String {
        self.storage_url(&format!("b/{}", bucket))
    }

    /// Build Cloud Storage objects URL
    pub fn storage_objects_url(&self, bucket: &str) -> String {
        self.storage_url(&format!("b/{}/o", bucket))
    }

    /// Build Cloud Storage single-object URL (object name is percent-encoded)
    pub fn storage_object_url(&self, bucket: &str, object: &str) -> String {
        format!(
            "{}/{}",
            self.storage_objects_url(bucket),
            urlencoding::encode(object)
        )
    }

    /// Build Cloud Storage simple-upload URL
    pub fn storage_upload_url(&self, bucket: &str, object: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.endpoints.storage,
            bucket,
            urlencoding::encode(object)
        )
    }

    // =========================================================================
    // Pub/Sub API helpers
    // =========================================================================

    /// Build Pub/Sub API URL scoped to the project
    pub fn pubsub_url(&self, path: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.endpoints.pubsub, self.project_id, path
        )
    }

    /// Fully-qualified topic name
    pub fn topic_name(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.project_id, topic)
    }

    // =========================================================================
    // Vision API helpers
    // =========================================================================

    /// Build Cloud Vision API URL
    pub fn vision_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoints.vision, path)
    }

    // =========================================================================
    // Cloud Monitoring API helpers
    // =========================================================================

    /// Build Cloud Monitoring API URL scoped to the project
    pub fn monitoring_url(&self, path: &str) -> String {
        format!(
            "{}/v3/projects/{}/{}",
            self.endpoints.monitoring, self.project_id, path
        )
    }

    // =========================================================================
    // IAM / Resource Manager API helpers
    // =========================================================================

    /// Build IAM API URL scoped to the project
    pub fn iam_url(&self, path: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.endpoints.iam, self.project_id, path
        )
    }

    /// Build Resource Manager API URL
    pub fn resourcemanager_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoints.resource_manager, path)
    }

    // =========================================================================
    // Cloud Healthcare API helpers
    // =========================================================================

    /// Build Cloud Healthcare API URL from a resource name
    pub fn healthcare_url(&self, name: &str) -> String {
        format!("{}/v1/{}", self.endpoints.healthcare, name)
    }

    /// Resource name of the datasets collection in the configured location
    pub fn healthcare_datasets_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/datasets",
            self.project_id, self.location
        )
    }

    /// Build Healthcare dataset URL
    pub fn healthcare_dataset_url(&self, dataset: &str) -> String {
        self.healthcare_url(&format!("{}/{}", self.healthcare_datasets_name(), dataset))
    }

    /// Build Healthcare DICOM store URL
    pub fn dicom_store_url(&self, dataset: &str, store: &str) -> String {
        format!(
            "{}/dicomStores/{}",
            self.healthcare_dataset_url(dataset),
            store
        )
    }

    // =========================================================================
    // Deployment Manager API helpers
    // =========================================================================

    /// Build Deployment Manager API URL
    pub fn deploymentmanager_url(&self, path: &str) -> String {
        format!(
            "{}/deploymentmanager/v2/projects/{}/global/{}",
            self.endpoints.deployment_manager, self.project_id, path
        )
    }
}

/// Derive a region from a zone name: `us-central1-a` -> `us-central1`
pub fn region_of_zone(zone: &str) -> String {
    match zone.rsplit_once('-') {
        Some((region, _)) if region.contains('-') => region.to_string(),
        _ => zone.to_string(),
    }
}

/// Append query parameters to a URL, percent-encoding the values
pub fn with_query(url: &str, params: &[(&str, &str)]) -> String {
    let query: Vec<String> = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();

    if query.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, query.join("&"))
    } else {
        format!("{}?{}", url, query.join("&"))
    }
}

/// Last path segment of a resource URL: `.../zones/us-east1-b` -> `us-east1-b`
pub fn short_name(resource_url: &str) -> &str {
    resource_url.rsplit('/').next().unwrap_or(resource_url)
}

/// Format a GCP API error for display
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    super::http::format_gcp_error(error)
}
