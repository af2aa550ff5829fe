//! IAM snippets
//!
//! Service accounts, their keys, and role bindings on the project policy.

use super::{created, str_field, Created};
use crate::gcp::client::{short_name, GcpClient};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub email: String,
    pub display_name: String,
    pub unique_id: String,
    pub disabled: bool,
}

impl From<&Value> for ServiceAccount {
    fn from(value: &Value) -> Self {
        Self {
            email: str_field(value, "email"),
            display_name: str_field(value, "displayName"),
            unique_id: str_field(value, "uniqueId"),
            disabled: value.get("disabled").and_then(|v| v.as_bool()).unwrap_or(false),
        }
    }
}

impl fmt::Display for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.disabled { " (disabled)" } else { "" };
        write!(f, "{:<60} {}{}", self.email, self.display_name, state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountKey {
    pub key_id: String,
    pub key_type: String,
    pub valid_after: String,
    pub valid_before: String,
}

impl From<&Value> for ServiceAccountKey {
    fn from(value: &Value) -> Self {
        Self {
            key_id: short_name(&str_field(value, "name")).to_string(),
            key_type: str_field(value, "keyType"),
            valid_after: str_field(value, "validAfterTime"),
            valid_before: str_field(value, "validBeforeTime"),
        }
    }
}

impl fmt::Display for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<42} {:<15} {} .. {}",
            self.key_id, self.key_type, self.valid_after, self.valid_before
        )
    }
}

/// `<account_id>@<project>.iam.gserviceaccount.com`
pub fn service_account_email(project_id: &str, account_id: &str) -> String {
    format!("{}@{}.iam.gserviceaccount.com", account_id, project_id)
}

pub async fn create_service_account(
    client: &GcpClient,
    account_id: &str,
    display_name: &str,
) -> Result<Created<ServiceAccount>> {
    let body = json!({
        "accountId": account_id,
        "serviceAccount": { "displayName": display_name },
    });
    tracing::info!("Creating service account {}", account_id);
    let result = client
        .post(&client.iam_url("serviceAccounts"), Some(&body))
        .await
        .map(|sa| ServiceAccount::from(&sa));
    created(result)
}

pub async fn list_service_accounts(client: &GcpClient) -> Result<Vec<ServiceAccount>> {
    let items = client
        .fetch_all(&client.iam_url("serviceAccounts"), "accounts")
        .await?;
    Ok(items.iter().map(ServiceAccount::from).collect())
}

pub async fn delete_service_account(client: &GcpClient, email: &str) -> Result<()> {
    client
        .delete(&client.iam_url(&format!("serviceAccounts/{}", email)))
        .await
        .with_context(|| format!("Failed to delete service account {}", email))?;
    Ok(())
}

/// Create a key; returns the key id and the base64 private key file
pub async fn create_service_account_key(
    client: &GcpClient,
    email: &str,
) -> Result<(String, String)> {
    let url = client.iam_url(&format!("serviceAccounts/{}/keys", email));
    let key = client
        .post(&url, Some(&json!({})))
        .await
        .with_context(|| format!("Failed to create key for {}", email))?;

    let private_key = key
        .get("privateKeyData")
        .and_then(|v| v.as_str())
        .context("Response has no privateKeyData")?
        .to_string();
    Ok((short_name(&str_field(&key, "name")).to_string(), private_key))
}

pub async fn list_service_account_keys(
    client: &GcpClient,
    email: &str,
) -> Result<Vec<ServiceAccountKey>> {
    let url = client.iam_url(&format!("serviceAccounts/{}/keys", email));
    let response = client.get(&url).await?;
    Ok(response
        .get("keys")
        .and_then(|v| v.as_array())
        .map(|keys| keys.iter().map(ServiceAccountKey::from).collect())
        .unwrap_or_default())
}

/// Raw project IAM policy (bindings + etag)
pub async fn get_project_policy(client: &GcpClient) -> Result<Value> {
    let url = client.resourcemanager_url(&format!("projects/{}:getIamPolicy", client.project_id));
    client
        .post(&url, Some(&json!({})))
        .await
        .context("Failed to read project IAM policy")
}

/// `(role, members)` pairs of a policy
pub fn policy_bindings(policy: &Value) -> Vec<(String, Vec<String>)> {
    policy
        .get("bindings")
        .and_then(|v| v.as_array())
        .map(|bindings| {
            bindings
                .iter()
                .map(|b| {
                    let members = b
                        .get("members")
                        .and_then(|v| v.as_array())
                        .map(|m| {
                            m.iter()
                                .filter_map(|s| s.as_str().map(|s| s.to_string()))
                                .collect()
                        })
                        .unwrap_or_default();
                    (str_field(b, "role"), members)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Grant `role` to `member` (e.g. `serviceAccount:x@p.iam.gserviceaccount.com`)
///
/// Returns `false` when the binding already existed and nothing was written.
pub async fn add_project_binding(client: &GcpClient, role: &str, member: &str) -> Result<bool> {
    let mut policy = get_project_policy(client).await?;
    if !add_member(&mut policy, role, member) {
        return Ok(false);
    }
    set_project_policy(client, &policy).await?;
    Ok(true)
}

/// Revoke `role` from `member`; `false` when there was nothing to remove
pub async fn remove_project_binding(client: &GcpClient, role: &str, member: &str) -> Result<bool> {
    let mut policy = get_project_policy(client).await?;
    if !remove_member(&mut policy, role, member) {
        return Ok(false);
    }
    set_project_policy(client, &policy).await?;
    Ok(true)
}

/// Write back a policy; the etag it carries guards against concurrent edits
async fn set_project_policy(client: &GcpClient, policy: &Value) -> Result<Value> {
    let url = client.resourcemanager_url(&format!("projects/{}:setIamPolicy", client.project_id));
    client
        .post(&url, Some(&json!({ "policy": policy })))
        .await
        .context("Failed to write project IAM policy")
}

fn add_member(policy: &mut Value, role: &str, member: &str) -> bool {
    if !policy.get("bindings").is_some_and(|b| b.is_array()) {
        policy["bindings"] = json!([]);
    }
    let Some(bindings) = policy["bindings"].as_array_mut() else {
        return false;
    };

    match bindings
        .iter_mut()
        .find(|b| b.get("role").and_then(|r| r.as_str()) == Some(role))
    {
        Some(binding) => {
            if !binding.get("members").is_some_and(|m| m.is_array()) {
                binding["members"] = json!([]);
            }
            let Some(members) = binding["members"].as_array_mut() else {
                return false;
            };
            if members.iter().any(|m| m.as_str() == Some(member)) {
                return false;
            }
            members.push(json!(member));
        },
        None => bindings.push(json!({ "role": role, "members": [member] })),
    }
    true
}

fn remove_member(policy: &mut Value, role: &str, member: &str) -> bool {
    let Some(bindings) = policy.get_mut("bindings").and_then(|b| b.as_array_mut()) else {
        return false;
    };

    let mut removed = false;
    for binding in bindings.iter_mut() {
        if binding.get("role").and_then(|r| r.as_str()) != Some(role) {
            continue;
        }
        if let Some(members) = binding.get_mut("members").and_then(|m| m.as_array_mut()) {
            let before = members.len();
            members.retain(|m| m.as_str() != Some(member));
            removed |= members.len() != before;
        }
    }

    // bindings without members are rejected by setIamPolicy
    bindings.retain(|b| {
        b.get("members")
            .and_then(|m| m.as_array())
            .is_some_and(|m| !m.is_empty())
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_account_email() {
        assert_eq!(
            service_account_email("demo-project", "snippet-sa"),
            "snippet-sa@demo-project.iam.gserviceaccount.com"
        );
    }

    #[test]
    fn test_add_member_to_new_and_existing_role() {
        let mut policy = json!({ "etag": "BwX=", "bindings": [
            { "role": "roles/viewer", "members": ["user:a@example.com"] }
        ]});

        assert!(add_member(&mut policy, "roles/viewer", "user:b@example.com"));
        assert!(add_member(&mut policy, "roles/editor", "user:a@example.com"));
        assert!(!add_member(&mut policy, "roles/viewer", "user:a@example.com"));

        let bindings = policy_bindings(&policy);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].1, vec!["user:a@example.com", "user:b@example.com"]);
        assert_eq!(policy["etag"], "BwX=");
    }

    #[test]
    fn test_add_member_to_empty_policy() {
        let mut policy = json!({ "etag": "ACAB" });
        assert!(add_member(&mut policy, "roles/viewer", "user:a@example.com"));
        assert_eq!(policy_bindings(&policy)[0].0, "roles/viewer");
    }

    #[test]
    fn test_remove_member_drops_empty_binding() {
        let mut policy = json!({ "bindings": [
            { "role": "roles/viewer", "members": ["user:a@example.com"] },
            { "role": "roles/editor", "members": ["user:a@example.com", "user:b@example.com"] }
        ]});

        assert!(remove_member(&mut policy, "roles/viewer", "user:a@example.com"));
        assert!(!remove_member(&mut policy, "roles/viewer", "user:a@example.com"));

        let bindings = policy_bindings(&policy);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].0, "roles/editor");
    }
}
