//! Cloud Storage snippets

use super::{created, str_field, Created};
use crate::gcp::client::{with_query, GcpClient};
use anyhow::{Context, Result};
use futures::stream::{self, TryStreamExt};
use serde_json::{json, Value};
use std::fmt;

/// Concurrent deletes when emptying a bucket
const PURGE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSummary {
    pub name: String,
    pub location: String,
    pub storage_class: String,
    pub created: String,
}

impl From<&Value> for BucketSummary {
    fn from(value: &Value) -> Self {
        Self {
            name: str_field(value, "name"),
            location: str_field(value, "location"),
            storage_class: str_field(value, "storageClass"),
            created: str_field(value, "timeCreated"),
        }
    }
}

impl fmt::Display for BucketSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<40} {:<14} {:<10} {}",
            self.name, self.location, self.storage_class, self.created
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub updated: String,
}

impl From<&Value> for ObjectSummary {
    fn from(value: &Value) -> Self {
        Self {
            name: str_field(value, "name"),
            // object size is a decimal string in the JSON API
            size: value
                .get("size")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            content_type: str_field(value, "contentType"),
            updated: str_field(value, "updated"),
        }
    }
}

impl fmt::Display for ObjectSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<50} {:>12} {:<26} {}",
            self.name, self.size, self.content_type, self.updated
        )
    }
}

pub async fn list_buckets(client: &GcpClient) -> Result<Vec<BucketSummary>> {
    let url = with_query(&client.storage_url("b"), &[("project", client.project_id.as_str())]);
    let items = client.fetch_all(&url, "items").await?;
    Ok(items.iter().map(BucketSummary::from).collect())
}

/// Create a bucket; bucket names are global, so 409 is a normal answer
pub async fn create_bucket(
    client: &GcpClient,
    name: &str,
    location: &str,
    storage_class: &str,
) -> Result<Created<BucketSummary>> {
    let url = with_query(&client.storage_url("b"), &[("project", client.project_id.as_str())]);
    let body = json!({
        "name": name,
        "location": location,
        "storageClass": storage_class,
    });
    tracing::info!("Creating bucket {} in {}", name, location);
    let result = client
        .post(&url, Some(&body))
        .await
        .map(|b| BucketSummary::from(&b));
    created(result)
}

pub async fn delete_bucket(client: &GcpClient, name: &str) -> Result<()> {
    client
        .delete(&client.storage_bucket_url(name))
        .await
        .with_context(|| format!("Failed to delete bucket {}", name))?;
    Ok(())
}

pub async fn list_objects(
    client: &GcpClient,
    bucket: &str,
    prefix: Option<&str>,
) -> Result<Vec<ObjectSummary>> {
    let url = with_query(
        &client.storage_objects_url(bucket),
        &[("prefix", prefix.unwrap_or(""))],
    );
    let items = client.fetch_all(&url, "items").await?;
    Ok(items.iter().map(ObjectSummary::from).collect())
}

pub async fn upload_object(
    client: &GcpClient,
    bucket: &str,
    name: &str,
    bytes: Vec<u8>,
    content_type: &str,
) -> Result<ObjectSummary> {
    let url = client.storage_upload_url(bucket, name);
    let object = client
        .post_bytes(&url, content_type, bytes)
        .await
        .with_context(|| format!("Failed to upload gs://{}/{}", bucket, name))?;
    Ok(ObjectSummary::from(&object))
}

pub async fn download_object(client: &GcpClient, bucket: &str, name: &str) -> Result<Vec<u8>> {
    let url = format!("{}?alt=media", client.storage_object_url(bucket, name));
    client
        .get_bytes(&url)
        .await
        .with_context(|| format!("Failed to download gs://{}/{}", bucket, name))
}

pub async fn copy_object(
    client: &GcpClient,
    source_bucket: &str,
    source_name: &str,
    dest_bucket: &str,
    dest_name: &str,
) -> Result<ObjectSummary> {
    let url = format!(
        "{}/copyTo/b/{}/o/{}",
        client.storage_object_url(source_bucket, source_name),
        dest_bucket,
        urlencoding::encode(dest_name)
    );
    let object = client.post(&url, None).await?;
    Ok(ObjectSummary::from(&object))
}

pub async fn delete_object(client: &GcpClient, bucket: &str, name: &str) -> Result<()> {
    client
        .delete(&client.storage_object_url(bucket, name))
        .await
        .with_context(|| format!("Failed to delete gs://{}/{}", bucket, name))?;
    Ok(())
}

/// Delete every object in a bucket, a few requests at a time; returns the count
pub async fn empty_bucket(client: &GcpClient, bucket: &str) -> Result<usize> {
    let objects = list_objects(client, bucket, None).await?;
    let count = objects.len();
    stream::iter(objects.into_iter().map(Ok::<_, anyhow::Error>))
        .try_for_each_concurrent(PURGE_CONCURRENCY, |object| async move {
            delete_object(client, bucket, &object.name).await
        })
        .await?;
    tracing::info!("Deleted {} object(s) from {}", count, bucket);
    Ok(count)
}

/// Split `gs://bucket/path/to/object` into `(bucket, object)`
pub fn parse_gcs_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("gs://")?;
    let (bucket, object) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        None
    } else {
        Some((bucket, object))
    }
}
