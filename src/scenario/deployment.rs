//! Deployment scenario
//!
//! Create a Deployment Manager stack from a YAML file, wait for it, list what
//! it created. Cleanup deletes the stack and waits for that too.

use super::{CleanupReport, StateFile};
use crate::gcp::client::GcpClient;
use crate::gcp::operation::PollConfig;
use crate::snippets::deployments;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SCENARIO_NAME: &str = "deployment";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

pub async fn run(
    client: &GcpClient,
    name: &str,
    config_yaml: &str,
    store: &StateFile<DeploymentState>,
    poll: PollConfig,
) -> Result<DeploymentState> {
    let mut state = store.load()?;
    if let Some(existing) = &state.deployment {
        return Err(anyhow::anyhow!(
            "Deployment {} from a previous run still exists; run cleanup first",
            existing
        ));
    }

    println!("Creating deployment {}", name);
    let op = deployments::create_deployment(client, name, config_yaml).await?;
    state.deployment = Some(name.to_string());
    state.operation = op
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    store.save(&state)?;

    deployments::wait_for_operation(client, &op, poll)
        .await
        .with_context(|| format!("Deployment {} did not complete", name))?;

    let resources = deployments::list_deployment_resources(client, name).await?;
    println!("Deployment {} created {} resource(s)", name, resources.len());
    for resource in &resources {
        println!("  {}", resource);
    }
    state.resources = resources.into_iter().map(|r| r.name).collect();
    store.save(&state)?;

    Ok(state)
}

pub async fn cleanup(
    client: &GcpClient,
    store: &StateFile<DeploymentState>,
    poll: PollConfig,
) -> Result<CleanupReport> {
    let mut state = store.load()?;
    let mut report = CleanupReport::default();

    match state.deployment.clone() {
        Some(name) => {
            let result = async {
                let op = deployments::delete_deployment(client, &name).await?;
                deployments::wait_for_operation(client, &op, poll).await?;
                Ok::<(), anyhow::Error>(())
            }
            .await;
            if report.record(&format!("delete deployment {}", name), result) {
                state = DeploymentState::default();
            }
        },
        None => report.skip("delete deployment"),
    }

    if report.is_clean() {
        store.clear()?;
    } else {
        store.save(&state)?;
    }

    Ok(report)
}
