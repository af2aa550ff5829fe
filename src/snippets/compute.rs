//! Compute Engine snippets
//!
//! VM instance lifecycle, firewall rules and project-wide SSH keys. Firewall
//! rules play the part of security groups and project SSH keys the part of
//! key pairs in the end-to-end compute scenario.

use super::{created, str_field, Created};
use crate::gcp::client::{short_name, GcpClient};
use crate::gcp::operation::{poll_until, Check, OperationKind, PollConfig};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fmt;

/// Metadata key holding project-wide SSH keys
const SSH_KEYS_METADATA_KEY: &str = "ssh-keys";

/// What we print for an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSummary {
    pub name: String,
    pub status: String,
    pub machine_type: String,
    pub zone: String,
    pub internal_ip: String,
    pub external_ip: String,
}

impl From<&Value> for InstanceSummary {
    fn from(value: &Value) -> Self {
        let nic = value
            .get("networkInterfaces")
            .and_then(|v| v.get(0))
            .cloned()
            .unwrap_or(Value::Null);
        let external_ip = nic
            .get("accessConfigs")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("natIP"))
            .and_then(|v| v.as_str())
            .unwrap_or("-")
            .to_string();

        Self {
            name: str_field(value, "name"),
            status: value
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string(),
            machine_type: short_name(&str_field(value, "machineType")).to_string(),
            zone: short_name(&str_field(value, "zone")).to_string(),
            internal_ip: str_field(&nic, "networkIP"),
            external_ip,
        }
    }
}

impl fmt::Display for InstanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<28} {:<11} {:<16} {:<16} {:<15} {}",
            self.name, self.status, self.machine_type, self.zone, self.internal_ip, self.external_ip
        )
    }
}

/// Parameters for a new VM instance
#[derive(Debug, Clone)]
pub struct InstanceRequest {
    pub name: String,
    pub machine_type: String,
    pub image_project: String,
    pub image_family: String,
    pub network: String,
    pub tags: Vec<String>,
    pub startup_script: Option<String>,
    /// Attach an ephemeral external IP
    pub external_ip: bool,
}

impl InstanceRequest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            machine_type: "e2-micro".to_string(),
            image_project: "debian-cloud".to_string(),
            image_family: "debian-12".to_string(),
            network: "default".to_string(),
            tags: Vec::new(),
            startup_script: None,
            external_ip: true,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_startup_script(mut self, script: &str) -> Self {
        self.startup_script = Some(script.to_string());
        self
    }

    /// Request body for `instances.insert` in `zone`
    pub fn to_body(&self, zone: &str) -> Value {
        let mut network_interface = json!({
            "network": format!("global/networks/{}", self.network),
        });
        if self.external_ip {
            network_interface["accessConfigs"] =
                json!([{ "type": "ONE_TO_ONE_NAT", "name": "External NAT" }]);
        }

        let mut body = json!({
            "name": self.name,
            "machineType": format!("zones/{}/machineTypes/{}", zone, self.machine_type),
            "disks": [{
                "boot": true,
                "autoDelete": true,
                "initializeParams": {
                    "sourceImage": format!(
                        "projects/{}/global/images/family/{}",
                        self.image_project, self.image_family
                    ),
                },
            }],
            "networkInterfaces": [network_interface],
        });

        if !self.tags.is_empty() {
            body["tags"] = json!({ "items": self.tags });
        }
        if let Some(script) = &self.startup_script {
            body["metadata"] = json!({
                "items": [{ "key": "startup-script", "value": script }],
            });
        }

        body
    }
}

/// List instances in the client's zone
pub async fn list_instances(client: &GcpClient) -> Result<Vec<InstanceSummary>> {
    let url = client.compute_zonal_url("instances");
    let items = client.fetch_all(&url, "items").await?;
    Ok(items.iter().map(InstanceSummary::from).collect())
}

/// Describe one instance
pub async fn describe_instance(client: &GcpClient, name: &str) -> Result<InstanceSummary> {
    let url = client.compute_zonal_url(&format!("instances/{}", name));
    let instance = client
        .get(&url)
        .await
        .with_context(|| format!("Failed to get instance {}", name))?;
    Ok(InstanceSummary::from(&instance))
}

/// Create an instance; returns the zonal operation
pub async fn create_instance(client: &GcpClient, request: &InstanceRequest) -> Result<Value> {
    let url = client.compute_zonal_url("instances");
    let body = request.to_body(&client.zone);
    tracing::info!("Creating instance {} in {}", request.name, client.zone);
    client
        .post(&url, Some(&body))
        .await
        .with_context(|| format!("Failed to create instance {}", request.name))
}

async fn instance_action(client: &GcpClient, name: &str, action: &str) -> Result<Value> {
    let url = client.compute_zonal_url(&format!("instances/{}/{}", name, action));
    tracing::info!("{} instance {}", action, name);
    client
        .post(&url, None)
        .await
        .with_context(|| format!("Failed to {} instance {}", action, name))
}

pub async fn start_instance(client: &GcpClient, name: &str) -> Result<Value> {
    instance_action(client, name, "start").await
}

pub async fn stop_instance(client: &GcpClient, name: &str) -> Result<Value> {
    instance_action(client, name, "stop").await
}

pub async fn reset_instance(client: &GcpClient, name: &str) -> Result<Value> {
    instance_action(client, name, "reset").await
}

pub async fn delete_instance(client: &GcpClient, name: &str) -> Result<Value> {
    let url = client.compute_zonal_url(&format!("instances/{}", name));
    tracing::info!("Deleting instance {}", name);
    client
        .delete(&url)
        .await
        .with_context(|| format!("Failed to delete instance {}", name))
}

/// Poll an instance until its `status` equals `target` (e.g. `RUNNING`)
pub async fn wait_for_instance_status(
    client: &GcpClient,
    name: &str,
    target: &str,
    config: PollConfig,
) -> Result<InstanceSummary> {
    poll_until(config, |_| async move {
        let instance = describe_instance(client, name).await?;
        if instance.status == target {
            Ok(Check::Ready(instance))
        } else {
            Ok(Check::Pending(instance.status))
        }
    })
    .await
    .with_context(|| format!("Instance {} did not reach {}", name, target))
}

/// Ingress rule opening TCP ports to tagged instances
#[derive(Debug, Clone)]
pub struct FirewallRequest {
    pub name: String,
    pub network: String,
    pub description: String,
    pub tcp_ports: Vec<String>,
    pub source_ranges: Vec<String>,
    pub target_tags: Vec<String>,
}

impl FirewallRequest {
    /// SSH from anywhere to instances tagged `target_tag`
    pub fn ssh(name: &str, target_tag: &str) -> Self {
        Self {
            name: name.to_string(),
            network: "default".to_string(),
            description: "Allow SSH".to_string(),
            tcp_ports: vec!["22".to_string()],
            source_ranges: vec!["0.0.0.0/0".to_string()],
            target_tags: vec![target_tag.to_string()],
        }
    }

    pub fn to_body(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "network": format!("global/networks/{}", self.network),
            "direction": "INGRESS",
            "priority": 1000,
            "allowed": [{ "IPProtocol": "tcp", "ports": self.tcp_ports }],
            "sourceRanges": self.source_ranges,
            "targetTags": self.target_tags,
        })
    }
}

/// Create a firewall rule; returns the global operation
pub async fn create_firewall_rule(
    client: &GcpClient,
    request: &FirewallRequest,
) -> Result<Created<Value>> {
    let url = client.compute_global_url("firewalls");
    tracing::info!("Creating firewall rule {}", request.name);
    created(client.post(&url, Some(&request.to_body())).await)
}

pub async fn delete_firewall_rule(client: &GcpClient, name: &str) -> Result<Value> {
    let url = client.compute_global_url(&format!("firewalls/{}", name));
    client
        .delete(&url)
        .await
        .with_context(|| format!("Failed to delete firewall rule {}", name))
}

/// Add `user:public_key` to the project's `ssh-keys` metadata
///
/// Returns `None` without writing when the exact key is already present.
pub async fn add_project_ssh_key(
    client: &GcpClient,
    user: &str,
    public_key: &str,
) -> Result<Option<Value>> {
    update_ssh_keys(client, |existing| merge_ssh_key(existing, user, public_key)).await
}

/// Remove every project SSH key belonging to `user`
pub async fn remove_project_ssh_key(client: &GcpClient, user: &str) -> Result<Option<Value>> {
    update_ssh_keys(client, |existing| remove_ssh_keys_for(existing, user)).await
}

/// Remove one exact `user:key` entry, leaving the user's other keys alone
pub async fn remove_project_ssh_key_entry(client: &GcpClient, entry: &str) -> Result<Option<Value>> {
    update_ssh_keys(client, |existing| remove_ssh_key_entry(existing, entry)).await
}

/// Read-modify-write of the `ssh-keys` item guarded by the metadata fingerprint
async fn update_ssh_keys<F>(client: &GcpClient, edit: F) -> Result<Option<Value>>
where
    F: FnOnce(&str) -> Option<String>,
{
    let project = client
        .get(&client.compute_project_url())
        .await
        .context("Failed to read project metadata")?;
    let metadata = project
        .get("commonInstanceMetadata")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let mut items: Vec<Value> = metadata
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let existing = items
        .iter()
        .find(|item| item.get("key").and_then(|k| k.as_str()) == Some(SSH_KEYS_METADATA_KEY))
        .and_then(|item| item.get("value"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let Some(updated) = edit(&existing) else {
        tracing::debug!("Project ssh-keys unchanged");
        return Ok(None);
    };

    items.retain(|item| item.get("key").and_then(|k| k.as_str()) != Some(SSH_KEYS_METADATA_KEY));
    if !updated.is_empty() {
        items.push(json!({ "key": SSH_KEYS_METADATA_KEY, "value": updated }));
    }

    let mut body = json!({ "items": items });
    if let Some(fingerprint) = metadata.get("fingerprint") {
        body["fingerprint"] = fingerprint.clone();
    }

    let url = client.compute_url("setCommonInstanceMetadata");
    let op = client
        .post(&url, Some(&body))
        .await
        .context("Failed to update project metadata")?;
    Ok(Some(op))
}

/// One `ssh-keys` line as written by [`add_project_ssh_key`]
pub fn ssh_key_entry(user: &str, public_key: &str) -> String {
    format!("{}:{}", user, public_key.trim())
}

/// New `ssh-keys` value with the key appended, `None` if already present
pub fn merge_ssh_key(existing: &str, user: &str, public_key: &str) -> Option<String> {
    let entry = ssh_key_entry(user, public_key);
    if existing.lines().any(|line| line.trim() == entry) {
        return None;
    }

    let mut lines: Vec<&str> = existing.lines().filter(|l| !l.trim().is_empty()).collect();
    lines.push(&entry);
    Some(lines.join("\n"))
}

/// New `ssh-keys` value without `user`'s keys, `None` if there were none
pub fn remove_ssh_keys_for(existing: &str, user: &str) -> Option<String> {
    let prefix = format!("{}:", user);
    remove_lines(existing, |line| line.starts_with(&prefix))
}

/// New `ssh-keys` value without the exact `entry`, `None` if it was absent
pub fn remove_ssh_key_entry(existing: &str, entry: &str) -> Option<String> {
    let entry = entry.trim();
    remove_lines(existing, |line| line == entry)
}

/// Drop blank lines and the trimmed lines matching `remove`
fn remove_lines<F>(existing: &str, remove: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    let lines: Vec<&str> = existing.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let kept: Vec<&str> = lines.iter().copied().filter(|l| !remove(*l)).collect();

    if kept.len() == lines.len() {
        None
    } else {
        Some(kept.join("\n"))
    }
}

/// Newest image in a public image family
#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub name: String,
    pub family: String,
    pub disk_size_gb: String,
    pub creation: String,
}

impl fmt::Display for ImageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (family {}, {} GB, created {})",
            self.name, self.family, self.disk_size_gb, self.creation
        )
    }
}

pub async fn get_image_from_family(
    client: &GcpClient,
    image_project: &str,
    family: &str,
) -> Result<ImageSummary> {
    let url = client.compute_image_family_url(image_project, family);
    let image = client.get(&url).await?;
    Ok(ImageSummary {
        name: str_field(&image, "name"),
        family: str_field(&image, "family"),
        disk_size_gb: str_field(&image, "diskSizeGb"),
        creation: str_field(&image, "creationTimestamp"),
    })
}

/// First page of machine types in the zone, as `(name, description)`
pub async fn list_machine_types(client: &GcpClient) -> Result<Vec<(String, String)>> {
    let url = client.compute_zonal_url("machineTypes");
    let page = client.fetch_page(&url, "items", None).await?;
    Ok(page
        .items
        .iter()
        .map(|m| (str_field(m, "name"), str_field(m, "description")))
        .collect())
}

/// Name of an operation returned by a mutating call
pub fn operation_name(op: &Value) -> Result<String> {
    op.get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .context("Response is not an operation (missing name)")
}

pub fn zone_operation_url(client: &GcpClient, op_name: &str) -> String {
    client.compute_zonal_url(&format!("operations/{}", op_name))
}

pub fn global_operation_url(client: &GcpClient, op_name: &str) -> String {
    client.compute_global_url(&format!("operations/{}", op_name))
}

/// Regional operations (addresses, subnetworks) live in the zone's region
pub fn region_operation_url(client: &GcpClient, op_name: &str) -> String {
    client.compute_regional_url(&format!("operations/{}", op_name))
}

/// Wait for a zonal operation returned by an instance call
pub async fn wait_zone_operation(client: &GcpClient, op: &Value, config: PollConfig) -> Result<Value> {
    let url = zone_operation_url(client, &operation_name(op)?);
    client
        .wait_for_operation(&url, OperationKind::Compute, config)
        .await
}

/// Wait for a global operation (firewalls, project metadata)
pub async fn wait_global_operation(
    client: &GcpClient,
    op: &Value,
    config: PollConfig,
) -> Result<Value> {
    let url = global_operation_url(client, &operation_name(op)?);
    client
        .wait_for_operation(&url, OperationKind::Compute, config)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_summary_from_api_shape() {
        let value = json!({
            "name": "web-1",
            "status": "RUNNING",
            "machineType": "https://www.googleapis.com/compute/v1/projects/p/zones/us-east1-b/machineTypes/e2-micro",
            "zone": "https://www.googleapis.com/compute/v1/projects/p/zones/us-east1-b",
            "networkInterfaces": [{
                "networkIP": "10.142.0.2",
                "accessConfigs": [{ "natIP": "34.1.2.3" }]
            }]
        });
        let summary = InstanceSummary::from(&value);
        assert_eq!(summary.machine_type, "e2-micro");
        assert_eq!(summary.zone, "us-east1-b");
        assert_eq!(summary.internal_ip, "10.142.0.2");
        assert_eq!(summary.external_ip, "34.1.2.3");
    }

    #[test]
    fn test_instance_summary_without_network() {
        let summary = InstanceSummary::from(&json!({ "name": "bare" }));
        assert_eq!(summary.status, "UNKNOWN");
        assert_eq!(summary.external_ip, "-");
        assert_eq!(summary.internal_ip, "-");
    }

    #[test]
    fn test_instance_body() {
        let body = InstanceRequest::new("vm")
            .with_tags(vec!["ssh".to_string()])
            .with_startup_script("echo hi")
            .to_body("us-central1-a");
        assert_eq!(body["machineType"], "zones/us-central1-a/machineTypes/e2-micro");
        assert_eq!(
            body["disks"][0]["initializeParams"]["sourceImage"],
            "projects/debian-cloud/global/images/family/debian-12"
        );
        assert_eq!(body["tags"]["items"][0], "ssh");
        assert_eq!(body["metadata"]["items"][0]["key"], "startup-script");
        assert_eq!(body["networkInterfaces"][0]["accessConfigs"][0]["type"], "ONE_TO_ONE_NAT");
    }

    #[test]
    fn test_firewall_body() {
        let body = FirewallRequest::ssh("allow-ssh", "ssh").to_body();
        assert_eq!(body["allowed"][0]["ports"][0], "22");
        assert_eq!(body["targetTags"][0], "ssh");
        assert_eq!(body["direction"], "INGRESS");
    }

    #[test]
    fn test_merge_ssh_key() {
        assert_eq!(
            merge_ssh_key("", "alice", "ssh-ed25519 AAAA alice@host\n").as_deref(),
            Some("alice:ssh-ed25519 AAAA alice@host")
        );
        assert_eq!(
            merge_ssh_key("bob:ssh-rsa BBBB", "alice", "ssh-ed25519 AAAA").as_deref(),
            Some("bob:ssh-rsa BBBB\nalice:ssh-ed25519 AAAA")
        );
        assert_eq!(merge_ssh_key("alice:ssh-ed25519 AAAA", "alice", "ssh-ed25519 AAAA"), None);
    }

    #[test]
    fn test_remove_ssh_keys_for() {
        let existing = "alice:ssh-ed25519 AAAA\nbob:ssh-rsa BBBB\nalice:ssh-rsa CCCC";
        assert_eq!(
            remove_ssh_keys_for(existing, "alice").as_deref(),
            Some("bob:ssh-rsa BBBB")
        );
        assert_eq!(remove_ssh_keys_for(existing, "carol"), None);
        assert_eq!(remove_ssh_keys_for("alice:k", "alice").as_deref(), Some(""));
        // indented lines still belong to the user
        assert_eq!(
            remove_ssh_keys_for("  alice:ssh-rsa CCCC\nbob:ssh-rsa BBBB", "alice").as_deref(),
            Some("bob:ssh-rsa BBBB")
        );
    }

    #[test]
    fn test_remove_ssh_key_entry_keeps_other_keys_of_user() {
        let existing = "alice:ssh-ed25519 AAAA\nalice:ssh-rsa LAPTOPKEY\nbob:ssh-rsa BBBB";
        let entry = ssh_key_entry("alice", "ssh-ed25519 AAAA\n");
        assert_eq!(
            remove_ssh_key_entry(existing, &entry).as_deref(),
            Some("alice:ssh-rsa LAPTOPKEY\nbob:ssh-rsa BBBB")
        );
        assert_eq!(remove_ssh_key_entry(existing, "alice:ssh-ed25519 OTHER"), None);
    }

    #[test]
    fn test_operation_name() {
        assert_eq!(operation_name(&json!({"name": "operation-1"})).unwrap(), "operation-1");
        assert!(operation_name(&Value::Null).is_err());
    }
}
