//! Operations and polling
//!
//! Mutating GCP calls usually return an operation resource instead of the
//! final result. Two shapes exist:
//!
//! - Compute Engine and Deployment Manager: `status` goes
//!   `PENDING -> RUNNING -> DONE`, failures land in `error.errors[]`.
//! - google.longrunning (Healthcare and most newer APIs): `done: bool`, with
//!   an `error` status or a `response` once finished.
//!
//! [`poll_until`] is the one waiting primitive: call a check every fixed
//! interval until it reports ready or the attempt budget runs out.

use super::client::GcpClient;
use anyhow::Result;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Which operation shape a URL returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Compute,
    LongRunning,
}

/// Status of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Done,
    Failed(String),
    Unknown(String),
}

impl OperationStatus {
    pub fn from_value(kind: OperationKind, op: &Value) -> Self {
        match kind {
            OperationKind::Compute => Self::from_compute(op),
            OperationKind::LongRunning => Self::from_long_running(op),
        }
    }

    fn from_compute(op: &Value) -> Self {
        let status = op.get("status").and_then(|v| v.as_str()).unwrap_or("");
        match status {
            "PENDING" | "RUNNING" => Self::Running,
            "DONE" => match op.get("error") {
                Some(error) => Self::Failed(compute_error_message(error)),
                None => Self::Done,
            },
            other => Self::Unknown(other.to_string()),
        }
    }

    fn from_long_running(op: &Value) -> Self {
        if !op.get("done").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Self::Running;
        }
        match op.get("error") {
            Some(error) => Self::Failed(
                error
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("operation failed")
                    .to_string(),
            ),
            None => Self::Done,
        }
    }
}

/// Join the messages of a Compute-style `error.errors[]` list
fn compute_error_message(error: &Value) -> String {
    let messages: Vec<String> = error
        .get("errors")
        .and_then(|v| v.as_array())
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    let code = e.get("code").and_then(|v| v.as_str()).unwrap_or("ERROR");
                    let message = e.get("message").and_then(|v| v.as_str()).unwrap_or("-");
                    format!("{}: {}", code, message)
                })
                .collect()
        })
        .unwrap_or_default();

    if messages.is_empty() {
        "operation failed".to_string()
    } else {
        messages.join("; ")
    }
}

/// Fixed-interval polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

/// Outcome of one polling attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Check<T> {
    Ready(T),
    /// Not there yet; carries the status observed
    Pending(String),
}

/// The attempt budget ran out before the resource reached a terminal status
#[derive(Debug, Clone, Error)]
#[error("gave up after {attempts} attempts, last status: {last_status}")]
pub struct PollTimeout {
    pub attempts: u32,
    pub last_status: String,
}

/// Call `check` until it is ready, sleeping `interval` between attempts
///
/// The first attempt runs immediately. Errors from `check` end the loop.
pub async fn poll_until<T, F, Fut>(config: PollConfig, mut check: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Check<T>>>,
{
    let mut last_status = "not polled".to_string();

    for attempt in 1..=config.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(config.interval).await;
        }

        match check(attempt).await? {
            Check::Ready(value) => {
                tracing::debug!("Poll ready after {} attempt(s)", attempt);
                return Ok(value);
            },
            Check::Pending(status) => {
                tracing::debug!(
                    "Poll attempt {}/{}: {}",
                    attempt,
                    config.max_attempts,
                    status
                );
                last_status = status;
            },
        }
    }

    Err(PollTimeout {
        attempts: config.max_attempts,
        last_status,
    }
    .into())
}

impl GcpClient {
    /// Fetch an operation once and classify it
    pub async fn poll_operation(&self, url: &str, kind: OperationKind) -> Result<OperationStatus> {
        let op = self.get(url).await?;
        Ok(OperationStatus::from_value(kind, &op))
    }

    /// Poll an operation until it is done; returns the final operation body
    pub async fn wait_for_operation(
        &self,
        url: &str,
        kind: OperationKind,
        config: PollConfig,
    ) -> Result<Value> {
        tracing::info!("Waiting for operation {}", url);

        poll_until(config, |_| async move {
            let op = self.get(url).await?;
            match OperationStatus::from_value(kind, &op) {
                OperationStatus::Done => Ok(Check::Ready(op)),
                OperationStatus::Failed(message) => {
                    Err(anyhow::anyhow!("Operation failed: {}", message))
                },
                OperationStatus::Running => Ok(Check::Pending("RUNNING".to_string())),
                OperationStatus::Unknown(s) => {
                    tracing::warn!("Unknown operation status: {}", s);
                    Ok(Check::Pending(s))
                },
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    #[test]
    fn test_compute_status() {
        let kind = OperationKind::Compute;
        assert_eq!(
            OperationStatus::from_value(kind, &json!({"status": "PENDING"})),
            OperationStatus::Running
        );
        assert_eq!(
            OperationStatus::from_value(kind, &json!({"status": "DONE"})),
            OperationStatus::Done
        );
        assert_eq!(
            OperationStatus::from_value(
                kind,
                &json!({"status": "DONE", "error": {"errors": [
                    {"code": "QUOTA_EXCEEDED", "message": "Quota 'CPUS' exceeded."}
                ]}})
            ),
            OperationStatus::Failed("QUOTA_EXCEEDED: Quota 'CPUS' exceeded.".to_string())
        );
        assert_eq!(
            OperationStatus::from_value(kind, &json!({"status": "WEIRD"})),
            OperationStatus::Unknown("WEIRD".to_string())
        );
    }

    #[test]
    fn test_long_running_status() {
        let kind = OperationKind::LongRunning;
        assert_eq!(
            OperationStatus::from_value(kind, &json!({"name": "op"})),
            OperationStatus::Running
        );
        assert_eq!(
            OperationStatus::from_value(kind, &json!({"done": true, "response": {}})),
            OperationStatus::Done
        );
        assert_eq!(
            OperationStatus::from_value(
                kind,
                &json!({"done": true, "error": {"code": 3, "message": "bad uri"}})
            ),
            OperationStatus::Failed("bad uri".to_string())
        );
    }

    #[tokio::test]
    async fn test_poll_until_ready_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let result = poll_until(fast(5), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 3 {
                    Ok(Check::Ready(attempt))
                } else {
                    Ok(Check::Pending("PENDING".to_string()))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_times_out_with_last_status() {
        let err = poll_until::<(), _, _>(fast(4), |_| async {
            Ok(Check::Pending("STAGING".to_string()))
        })
        .await
        .unwrap_err();

        let timeout = err.downcast_ref::<PollTimeout>().unwrap();
        assert_eq!(timeout.attempts, 4);
        assert_eq!(timeout.last_status, "STAGING");
    }

    #[tokio::test]
    async fn test_poll_until_stops_on_error() {
        let calls = AtomicU32::new(0);
        let err = poll_until::<(), _, _>(fast(10), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("boom")) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_never_checks() {
        let calls = AtomicU32::new(0);
        let result = tokio_test::block_on(poll_until::<(), _, _>(fast(0), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Check::Ready(())) }
        }));

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
