//! GCP Projects
//!
//! Listing the projects the caller can see.

use super::client::GcpClient;
use anyhow::Result;
use serde_json::Value;
use std::fmt;

/// Project information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub project_number: String,
    pub lifecycle_state: String,
}

impl From<&Value> for Project {
    fn from(value: &Value) -> Self {
        let field = |key: &str, default: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or(default)
                .to_string()
        };

        Self {
            project_id: field("projectId", "-"),
            name: field("name", "-"),
            project_number: field("projectNumber", "-"),
            lifecycle_state: field("lifecycleState", "UNKNOWN"),
        }
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<30} {:<14} {}",
            self.project_id, self.project_number, self.name
        )
    }
}

/// List all accessible, active GCP projects
pub async fn list_projects(client: &GcpClient) -> Result<Vec<Project>> {
    let url = client.resourcemanager_url("projects");
    let items = client.fetch_all(&url, "projects").await?;

    Ok(items
        .iter()
        .map(Project::from)
        .filter(|p| p.lifecycle_state == "ACTIVE")
        .collect())
}
