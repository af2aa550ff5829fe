//! Service endpoints
//!
//! Base URLs for each Google API used by the snippets. The defaults are the
//! public googleapis.com hosts; any of them can be overridden from the config
//! file, and [`ServiceEndpoints::all`] points every service at one root, which
//! is how emulators and mock servers are wired in.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    pub compute: String,
    pub storage: String,
    pub pubsub: String,
    pub vision: String,
    pub monitoring: String,
    pub iam: String,
    pub resource_manager: String,
    pub healthcare: String,
    pub deployment_manager: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            compute: "https://compute.googleapis.com".to_string(),
            storage: "https://storage.googleapis.com".to_string(),
            pubsub: "https://pubsub.googleapis.com".to_string(),
            vision: "https://vision.googleapis.com".to_string(),
            monitoring: "https://monitoring.googleapis.com".to_string(),
            iam: "https://iam.googleapis.com".to_string(),
            resource_manager: "https://cloudresourcemanager.googleapis.com".to_string(),
            healthcare: "https://healthcare.googleapis.com".to_string(),
            deployment_manager: "https://deploymentmanager.googleapis.com".to_string(),
        }
    }
}

impl ServiceEndpoints {
    /// Route every service to the same base URL
    pub fn all(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            compute: base.clone(),
            storage: base.clone(),
            pubsub: base.clone(),
            vision: base.clone(),
            monitoring: base.clone(),
            iam: base.clone(),
            resource_manager: base.clone(),
            healthcare: base.clone(),
            deployment_manager: base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_trims_trailing_slash() {
        let endpoints = ServiceEndpoints::all("http://127.0.0.1:8080/");
        assert_eq!(endpoints.compute, "http://127.0.0.1:8080");
        assert_eq!(endpoints.healthcare, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let endpoints: ServiceEndpoints =
            serde_json::from_str(r#"{"pubsub":"http://localhost:8085"}"#).unwrap();
        assert_eq!(endpoints.pubsub, "http://localhost:8085");
        assert_eq!(endpoints.compute, "https://compute.googleapis.com");
    }
}
