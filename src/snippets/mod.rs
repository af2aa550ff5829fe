//! Service snippets
//!
//! One module per Google Cloud service, one async function per remote
//! operation. Each function builds its request from plain arguments, makes a
//! single call through [`GcpClient`](crate::gcp::GcpClient) and returns either
//! a small summary type or the raw response.
//!
//! - [`compute`] - VM instances, firewall rules, project SSH keys
//! - [`storage`] - buckets and objects
//! - [`pubsub`] - topics, subscriptions, publish/pull
//! - [`vision`] - image annotation
//! - [`monitoring`] - metrics, time series, alert policies
//! - [`iam`] - service accounts, keys, project policy bindings
//! - [`healthcare`] - DICOM datasets, stores, imports, searches
//! - [`deployments`] - Deployment Manager stacks

pub mod compute;
pub mod deployments;
pub mod healthcare;
pub mod iam;
pub mod monitoring;
pub mod pubsub;
pub mod storage;
pub mod vision;

use crate::gcp::error::is_already_exists;
use anyhow::Result;

/// Result of a create call where "already exists" is an expected answer
#[derive(Debug, Clone, PartialEq)]
pub enum Created<T> {
    New(T),
    AlreadyExists,
}

impl<T> Created<T> {
    pub fn is_new(&self) -> bool {
        matches!(self, Created::New(_))
    }
}

/// Turn a 409 into [`Created::AlreadyExists`], pass everything else through
pub(crate) fn created<T>(result: Result<T>) -> Result<Created<T>> {
    match result {
        Ok(value) => Ok(Created::New(value)),
        Err(e) if is_already_exists(&e) => Ok(Created::AlreadyExists),
        Err(e) => Err(e),
    }
}

/// Read a string field, `-` when absent
pub(crate) fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("-")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::error::ApiError;

    #[test]
    fn test_created_maps_conflict() {
        let conflict: Result<()> = Err(ApiError::from_response(409, "").into());
        assert_eq!(created(conflict).unwrap(), Created::AlreadyExists);

        let ok: Result<u8> = Ok(7);
        assert!(created(ok).unwrap().is_new());

        let forbidden: Result<()> = Err(ApiError::from_response(403, "").into());
        assert!(created(forbidden).is_err());
    }
}
