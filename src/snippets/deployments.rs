//! Deployment Manager snippets (infrastructure-as-code stacks)
//!
//! A deployment is created from a YAML configuration listing resources. The
//! configuration is checked locally before it is sent, since the API only
//! reports YAML mistakes after the operation has been accepted.

use super::str_field;
use crate::gcp::client::{short_name, GcpClient};
use crate::gcp::operation::{OperationKind, PollConfig};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

/// Minimal shape of a Deployment Manager configuration
#[derive(Debug, Deserialize)]
struct DeploymentConfig {
    #[serde(default)]
    resources: Vec<ConfigResource>,
}

#[derive(Debug, Deserialize)]
struct ConfigResource {
    name: String,
    #[serde(rename = "type")]
    resource_type: String,
}

/// Check a YAML configuration; returns `(name, type)` of each resource
pub fn validate_config(yaml: &str) -> Result<Vec<(String, String)>> {
    let config: DeploymentConfig =
        serde_yaml::from_str(yaml).context("Deployment configuration is not valid YAML")?;

    if config.resources.is_empty() {
        return Err(anyhow::anyhow!(
            "Deployment configuration declares no resources"
        ));
    }

    Ok(config
        .resources
        .into_iter()
        .map(|r| (r.name, r.resource_type))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSummary {
    pub name: String,
    pub operation_status: String,
    pub operation_type: String,
    pub insert_time: String,
}

impl From<&Value> for DeploymentSummary {
    fn from(value: &Value) -> Self {
        let op = value.get("operation").cloned().unwrap_or(Value::Null);
        Self {
            name: str_field(value, "name"),
            operation_status: str_field(&op, "status"),
            operation_type: str_field(&op, "operationType"),
            insert_time: str_field(value, "insertTime"),
        }
    }
}

impl fmt::Display for DeploymentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<32} {:<8} {:<8} {}",
            self.name, self.operation_type, self.operation_status, self.insert_time
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentResource {
    pub name: String,
    pub resource_type: String,
    pub url: String,
}

impl fmt::Display for DeploymentResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<32} {:<28} {}", self.name, self.resource_type, self.url)
    }
}

/// Create a deployment from YAML; returns the operation
pub async fn create_deployment(client: &GcpClient, name: &str, config_yaml: &str) -> Result<Value> {
    let resources = validate_config(config_yaml)?;
    tracing::info!(
        "Creating deployment {} with {} resource(s)",
        name,
        resources.len()
    );

    let body = json!({
        "name": name,
        "target": { "config": { "content": config_yaml } },
    });
    client
        .post(&client.deploymentmanager_url("deployments"), Some(&body))
        .await
        .with_context(|| format!("Failed to create deployment {}", name))
}

pub async fn get_deployment(client: &GcpClient, name: &str) -> Result<DeploymentSummary> {
    let url = client.deploymentmanager_url(&format!("deployments/{}", name));
    let deployment = client.get(&url).await?;
    Ok(DeploymentSummary::from(&deployment))
}

pub async fn list_deployments(client: &GcpClient) -> Result<Vec<DeploymentSummary>> {
    let items = client
        .fetch_all(&client.deploymentmanager_url("deployments"), "deployments")
        .await?;
    Ok(items.iter().map(DeploymentSummary::from).collect())
}

pub async fn list_deployment_resources(
    client: &GcpClient,
    name: &str,
) -> Result<Vec<DeploymentResource>> {
    let url = client.deploymentmanager_url(&format!("deployments/{}/resources", name));
    let items = client.fetch_all(&url, "resources").await?;
    Ok(items
        .iter()
        .map(|r| DeploymentResource {
            name: str_field(r, "name"),
            resource_type: str_field(r, "type"),
            url: str_field(r, "url"),
        })
        .collect())
}

/// Delete a deployment and the resources it created; returns the operation
pub async fn delete_deployment(client: &GcpClient, name: &str) -> Result<Value> {
    let url = client.deploymentmanager_url(&format!("deployments/{}", name));
    tracing::info!("Deleting deployment {}", name);
    client
        .delete(&url)
        .await
        .with_context(|| format!("Failed to delete deployment {}", name))
}

pub fn operation_url(client: &GcpClient, op_name: &str) -> String {
    client.deploymentmanager_url(&format!("operations/{}", short_name(op_name)))
}

/// Wait for an operation returned by create/delete
pub async fn wait_for_operation(client: &GcpClient, op: &Value, config: PollConfig) -> Result<Value> {
    let name = op
        .get("name")
        .and_then(|v| v.as_str())
        .context("Response is not an operation (missing name)")?;
    client
        .wait_for_operation(&operation_url(client, name), OperationKind::Compute, config)
        .await
}
