//! gcpsnip: standalone Google Cloud API snippets
//!
//! Each function under [`snippets`] performs one call against one Google Cloud
//! service through a shared [`gcp::GcpClient`]. [`scenario`] chains them into
//! end-to-end workflows with disk-backed state and best-effort cleanup.

pub mod cli;
pub mod config;
pub mod gcp;
pub mod scenario;
pub mod snippets;
