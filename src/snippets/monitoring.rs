//! Cloud Monitoring snippets
//!
//! Metric descriptors, time series reads and writes, alert policies.

use super::str_field;
use crate::gcp::client::{short_name, with_query, GcpClient};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub metric_type: String,
    pub metric_kind: String,
    pub value_type: String,
    pub description: String,
}

impl From<&Value> for MetricDescriptor {
    fn from(value: &Value) -> Self {
        Self {
            metric_type: str_field(value, "type"),
            metric_kind: str_field(value, "metricKind"),
            value_type: str_field(value, "valueType"),
            description: str_field(value, "description"),
        }
    }
}

impl fmt::Display for MetricDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<60} {:<10} {:<8} {}",
            self.metric_type, self.metric_kind, self.value_type, self.description
        )
    }
}

/// One point of a time series
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub end_time: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub metric_type: String,
    pub resource_type: String,
    pub points: Vec<Point>,
}

impl From<&Value> for TimeSeries {
    fn from(value: &Value) -> Self {
        let points = value
            .get("points")
            .and_then(|v| v.as_array())
            .map(|points| {
                points
                    .iter()
                    .map(|p| Point {
                        end_time: p
                            .get("interval")
                            .map(|i| str_field(i, "endTime"))
                            .unwrap_or_else(|| "-".to_string()),
                        value: p.get("value").map(typed_value).unwrap_or(0.0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            metric_type: value
                .get("metric")
                .map(|m| str_field(m, "type"))
                .unwrap_or_else(|| "-".to_string()),
            resource_type: value
                .get("resource")
                .map(|r| str_field(r, "type"))
                .unwrap_or_else(|| "-".to_string()),
            points,
        }
    }
}

/// Numeric value of a TypedValue; int64 arrives as a string
fn typed_value(value: &Value) -> f64 {
    if let Some(d) = value.get("doubleValue").and_then(|v| v.as_f64()) {
        return d;
    }
    if let Some(i) = value.get("int64Value") {
        return i
            .as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| i.as_f64())
            .unwrap_or(0.0);
    }
    if let Some(b) = value.get("boolValue").and_then(|v| v.as_bool()) {
        return if b { 1.0 } else { 0.0 };
    }
    0.0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertPolicy {
    pub id: String,
    pub display_name: String,
    pub enabled: bool,
    pub conditions: usize,
}

impl From<&Value> for AlertPolicy {
    fn from(value: &Value) -> Self {
        Self {
            id: short_name(&str_field(value, "name")).to_string(),
            display_name: str_field(value, "displayName"),
            enabled: value.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false),
            conditions: value
                .get("conditions")
                .and_then(|v| v.as_array())
                .map(|c| c.len())
                .unwrap_or(0),
        }
    }
}

impl fmt::Display for AlertPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.enabled { "ENABLED" } else { "DISABLED" };
        write!(
            f,
            "{:<22} {:<9} {:>2} condition(s)  {}",
            self.id, state, self.conditions, self.display_name
        )
    }
}

/// List metric descriptors matching an optional monitoring filter
pub async fn list_metric_descriptors(
    client: &GcpClient,
    filter: Option<&str>,
) -> Result<Vec<MetricDescriptor>> {
    let url = with_query(
        &client.monitoring_url("metricDescriptors"),
        &[("filter", filter.unwrap_or(""))],
    );
    let items = client.fetch_all(&url, "metricDescriptors").await?;
    Ok(items.iter().map(MetricDescriptor::from).collect())
}

/// Time series for a metric type over the last `minutes`
pub async fn list_time_series(
    client: &GcpClient,
    metric_type: &str,
    minutes: i64,
) -> Result<Vec<TimeSeries>> {
    let end = Utc::now();
    let url = time_series_url(client, metric_type, window_start(end, minutes)?, end);
    let items = client.fetch_all(&url, "timeSeries").await?;
    Ok(items.iter().map(TimeSeries::from).collect())
}

/// Start of a window of `minutes` ending at `end`
fn window_start(end: DateTime<Utc>, minutes: i64) -> Result<DateTime<Utc>> {
    if minutes <= 0 {
        return Err(anyhow::anyhow!(
            "The time window must be at least one minute, got {}",
            minutes
        ));
    }
    Duration::try_minutes(minutes)
        .and_then(|window| end.checked_sub_signed(window))
        .with_context(|| format!("A window of {} minutes is out of range", minutes))
}

fn time_series_url(
    client: &GcpClient,
    metric_type: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> String {
    let filter = format!("metric.type = \"{}\"", metric_type);
    let start = rfc3339(start);
    let end = rfc3339(end);
    with_query(
        &client.monitoring_url("timeSeries"),
        &[
            ("filter", filter.as_str()),
            ("interval.startTime", start.as_str()),
            ("interval.endTime", end.as_str()),
        ],
    )
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Write one point of a custom gauge metric against the `global` resource
pub async fn write_custom_metric(client: &GcpClient, metric_type: &str, value: f64) -> Result<()> {
    if !metric_type.starts_with("custom.googleapis.com/") {
        return Err(anyhow::anyhow!(
            "Custom metric types must start with custom.googleapis.com/"
        ));
    }

    let body = json!({
        "timeSeries": [{
            "metric": { "type": metric_type },
            "resource": {
                "type": "global",
                "labels": { "project_id": client.project_id },
            },
            "points": [{
                "interval": { "endTime": rfc3339(Utc::now()) },
                "value": { "doubleValue": value },
            }],
        }],
    });

    client
        .post(&client.monitoring_url("timeSeries"), Some(&body))
        .await
        .with_context(|| format!("Failed to write {}", metric_type))?;
    Ok(())
}

pub async fn list_alert_policies(client: &GcpClient) -> Result<Vec<AlertPolicy>> {
    let items = client
        .fetch_all(&client.monitoring_url("alertPolicies"), "alertPolicies")
        .await?;
    Ok(items.iter().map(AlertPolicy::from).collect())
}

/// Enable or disable an alert policy by id
pub async fn set_alert_policy_enabled(
    client: &GcpClient,
    policy_id: &str,
    enabled: bool,
) -> Result<AlertPolicy> {
    let url = with_query(
        &client.monitoring_url(&format!("alertPolicies/{}", policy_id)),
        &[("updateMask", "enabled")],
    );
    let policy = client
        .patch(&url, &json!({ "enabled": enabled }))
        .await
        .with_context(|| format!("Failed to update alert policy {}", policy_id))?;
    Ok(AlertPolicy::from(&policy))
}
