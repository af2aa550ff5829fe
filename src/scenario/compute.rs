//! Compute scenario
//!
//! Project SSH key -> firewall rule -> VM instance -> wait until RUNNING ->
//! optional stop/start round trip. Cleanup removes all three.

use super::{unique_suffix, CleanupReport, StateFile};
use crate::gcp::client::GcpClient;
use crate::gcp::operation::PollConfig;
use crate::snippets::compute::{self, FirewallRequest, InstanceRequest};
use crate::snippets::Created;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SCENARIO_NAME: &str = "compute";

/// Resources created so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeState {
    #[serde(default)]
    pub zone: Option<String>,
    /// The exact `user:key` line this scenario added to project metadata
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub firewall_rule: Option<String>,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub external_ip: Option<String>,
}

impl ComputeState {
    fn has_resources(&self) -> bool {
        self.ssh_key.is_some() || self.firewall_rule.is_some() || self.instance.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ComputeOptions {
    pub instance_name: String,
    pub firewall_name: String,
    pub network_tag: String,
    pub machine_type: String,
    /// `(user, public key)`; no key step when absent
    pub ssh_key: Option<(String, String)>,
    pub stop_start: bool,
}

impl ComputeOptions {
    /// Options with generated resource names
    pub fn generated() -> Self {
        let suffix = unique_suffix();
        Self {
            instance_name: format!("snippet-vm-{}", suffix),
            firewall_name: format!("snippet-allow-ssh-{}", suffix),
            network_tag: format!("snippet-ssh-{}", suffix),
            machine_type: "e2-micro".to_string(),
            ssh_key: None,
            stop_start: false,
        }
    }
}

pub async fn run(
    client: &GcpClient,
    options: &ComputeOptions,
    store: &StateFile<ComputeState>,
    poll: PollConfig,
) -> Result<ComputeState> {
    let mut state = store.load()?;
    if state.has_resources() {
        return Err(anyhow::anyhow!(
            "A previous compute scenario left resources behind; run cleanup first ({})",
            store.path().display()
        ));
    }
    state.zone = Some(client.zone.clone());

    if let Some((user, key)) = &options.ssh_key {
        println!("Adding SSH key for {} to project metadata", user);
        match compute::add_project_ssh_key(client, user, key).await? {
            Some(op) => {
                state.ssh_key = Some(compute::ssh_key_entry(user, key));
                store.save(&state)?;
                compute::wait_global_operation(client, &op, poll).await?;
            },
            // not ours, so cleanup must leave it alone
            None => println!("  key already present, reusing it"),
        }
    }

    println!("Creating firewall rule {}", options.firewall_name);
    let firewall = FirewallRequest::ssh(&options.firewall_name, &options.network_tag);
    match compute::create_firewall_rule(client, &firewall).await? {
        Created::New(op) => {
            state.firewall_rule = Some(options.firewall_name.clone());
            store.save(&state)?;
            compute::wait_global_operation(client, &op, poll).await?;
        },
        Created::AlreadyExists => {
            // not ours, so cleanup must leave it alone
            println!("  firewall rule already exists, reusing it");
        },
    }

    println!("Creating instance {} in {}", options.instance_name, client.zone);
    let mut request =
        InstanceRequest::new(&options.instance_name).with_tags(vec![options.network_tag.clone()]);
    request.machine_type = options.machine_type.clone();
    let op = compute::create_instance(client, &request).await?;
    state.instance = Some(options.instance_name.clone());
    store.save(&state)?;
    compute::wait_zone_operation(client, &op, poll).await?;

    println!("Waiting for {} to be RUNNING", options.instance_name);
    let instance =
        compute::wait_for_instance_status(client, &options.instance_name, "RUNNING", poll).await?;
    state.external_ip = Some(instance.external_ip.clone()).filter(|ip| ip != "-");
    store.save(&state)?;
    println!("  {}", instance);

    if options.stop_start {
        println!("Stopping {}", options.instance_name);
        let op = compute::stop_instance(client, &options.instance_name).await?;
        compute::wait_zone_operation(client, &op, poll).await?;
        compute::wait_for_instance_status(client, &options.instance_name, "TERMINATED", poll)
            .await?;

        println!("Starting {}", options.instance_name);
        let op = compute::start_instance(client, &options.instance_name).await?;
        compute::wait_zone_operation(client, &op, poll).await?;
        let instance =
            compute::wait_for_instance_status(client, &options.instance_name, "RUNNING", poll)
                .await?;
        // ephemeral IPs change across a stop/start
        state.external_ip = Some(instance.external_ip).filter(|ip| ip != "-");
        store.save(&state)?;
    }

    if let (Some((user, _)), Some(ip)) = (&options.ssh_key, &state.external_ip) {
        println!("Connect with: ssh {}@{}", user, ip);
    }

    Ok(state)
}

pub async fn cleanup(
    client: &GcpClient,
    store: &StateFile<ComputeState>,
    poll: PollConfig,
) -> Result<CleanupReport> {
    let mut state = store.load()?;
    let mut report = CleanupReport::default();

    // the instance lives in the zone the scenario ran in
    let mut zonal = client.clone();
    if let Some(zone) = &state.zone {
        zonal.zone = zone.clone();
    }

    match state.instance.clone() {
        Some(name) => {
            let result = async {
                let op = compute::delete_instance(&zonal, &name).await?;
                compute::wait_zone_operation(&zonal, &op, poll).await?;
                Ok::<(), anyhow::Error>(())
            }
            .await;
            if report.record(&format!("delete instance {}", name), result) {
                state.instance = None;
            }
        },
        None => report.skip("delete instance"),
    }

    match state.firewall_rule.clone() {
        Some(name) => {
            let result = async {
                let op = compute::delete_firewall_rule(client, &name).await?;
                compute::wait_global_operation(client, &op, poll).await?;
                Ok::<(), anyhow::Error>(())
            }
            .await;
            if report.record(&format!("delete firewall rule {}", name), result) {
                state.firewall_rule = None;
            }
        },
        None => report.skip("delete firewall rule"),
    }

    match state.ssh_key.clone() {
        Some(entry) => {
            let result = async {
                if let Some(op) = compute::remove_project_ssh_key_entry(client, &entry).await? {
                    compute::wait_global_operation(client, &op, poll).await?;
                }
                Ok::<(), anyhow::Error>(())
            }
            .await;
            let user = entry.split(':').next().unwrap_or_default();
            if report.record(&format!("remove ssh key for {}", user), result) {
                state.ssh_key = None;
            }
        },
        None => report.skip("remove ssh key"),
    }

    if report.is_clean() {
        store.clear().context("Failed to remove scenario state")?;
    } else {
        // keep only what still needs deleting
        store.save(&state)?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_share_suffix() {
        let options = ComputeOptions::generated();
        let suffix = options.instance_name.strip_prefix("snippet-vm-").unwrap();
        assert!(options.firewall_name.ends_with(suffix));
        assert!(options.network_tag.ends_with(suffix));
    }

    #[test]
    fn test_has_resources() {
        assert!(!ComputeState::default().has_resources());
        let state = ComputeState {
            zone: Some("us-central1-a".to_string()),
            ..ComputeState::default()
        };
        assert!(!state.has_resources());
        let state = ComputeState {
            instance: Some("vm".to_string()),
            ..ComputeState::default()
        };
        assert!(state.has_resources());
    }
}
