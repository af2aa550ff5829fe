//! GCP API interaction module
//!
//! The small shared helper every snippet leans on: authentication, the HTTP
//! client, URL builders, pagination and operation polling.
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Main GCP client for making API requests
//! - [`endpoints`] - Per-service base URLs
//! - [`error`] - Typed API errors (not found, already exists, ...)
//! - [`http`] - HTTP utilities for REST API calls
//! - [`operation`] - Operation status and the fixed-interval poll loop
//! - [`pagination`] - `nextPageToken` handling
//! - [`projects`] - Project listing
//!
//! # Example
//!
//! ```ignore
//! use gcpsnip::gcp::client::{ClientOptions, GcpClient};
//!
//! async fn example(options: ClientOptions) -> anyhow::Result<()> {
//!     let client = GcpClient::new(options).await?;
//!     let instances = client.fetch_all(&client.compute_zonal_url("instances"), "items").await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod operation;
pub mod pagination;
pub mod projects;

pub use client::{ClientOptions, GcpClient};
pub use operation::{OperationKind, PollConfig};
