//! Pub/Sub snippets
//!
//! Topics, subscriptions and message publish/pull. Message payloads travel
//! base64-encoded in the JSON API; these helpers encode and decode them.

use super::{created, str_field, Created};
use crate::gcp::client::{short_name, GcpClient};
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// A pulled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: String,
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    pub publish_time: String,
}

impl ReceivedMessage {
    fn from_value(value: &Value) -> Result<Self> {
        let message = value.get("message").cloned().unwrap_or(Value::Null);
        let data = match message.get("data").and_then(|v| v.as_str()) {
            Some(encoded) => Base64
                .decode(encoded)
                .context("Message data is not valid base64")?,
            None => Vec::new(),
        };
        let attributes = message
            .get("attributes")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            ack_id: str_field(value, "ackId"),
            message_id: str_field(&message, "messageId"),
            data,
            attributes,
            publish_time: str_field(&message, "publishTime"),
        })
    }

    /// Payload as text, lossy for binary data
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

pub async fn create_topic(client: &GcpClient, topic: &str) -> Result<Created<Value>> {
    let url = client.pubsub_url(&format!("topics/{}", topic));
    tracing::info!("Creating topic {}", topic);
    created(client.put(&url, Some(&json!({}))).await)
}

/// Topic short names
pub async fn list_topics(client: &GcpClient) -> Result<Vec<String>> {
    let items = client
        .fetch_all(&client.pubsub_url("topics"), "topics")
        .await?;
    Ok(items
        .iter()
        .map(|t| short_name(&str_field(t, "name")).to_string())
        .collect())
}

pub async fn delete_topic(client: &GcpClient, topic: &str) -> Result<()> {
    client
        .delete(&client.pubsub_url(&format!("topics/{}", topic)))
        .await
        .with_context(|| format!("Failed to delete topic {}", topic))?;
    Ok(())
}

/// Publish one message; returns the server-assigned message ids
pub async fn publish(
    client: &GcpClient,
    topic: &str,
    data: &[u8],
    attributes: &BTreeMap<String, String>,
) -> Result<Vec<String>> {
    let mut message = Map::new();
    message.insert("data".to_string(), Value::String(Base64.encode(data)));
    if !attributes.is_empty() {
        message.insert("attributes".to_string(), json!(attributes));
    }

    let url = client.pubsub_url(&format!("topics/{}:publish", topic));
    let response = client
        .post(&url, Some(&json!({ "messages": [message] })))
        .await
        .with_context(|| format!("Failed to publish to {}", topic))?;

    Ok(response
        .get("messageIds")
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default())
}

pub async fn create_subscription(
    client: &GcpClient,
    topic: &str,
    subscription: &str,
    ack_deadline_seconds: u32,
) -> Result<Created<Value>> {
    let url = client.pubsub_url(&format!("subscriptions/{}", subscription));
    let body = json!({
        "topic": client.topic_name(topic),
        "ackDeadlineSeconds": ack_deadline_seconds,
    });
    tracing::info!("Creating subscription {} on {}", subscription, topic);
    created(client.put(&url, Some(&body)).await)
}

/// Pull up to `max_messages`; an empty list means nothing was waiting
pub async fn pull(
    client: &GcpClient,
    subscription: &str,
    max_messages: u32,
) -> Result<Vec<ReceivedMessage>> {
    let url = client.pubsub_url(&format!("subscriptions/{}:pull", subscription));
    let response = client
        .post(&url, Some(&json!({ "maxMessages": max_messages })))
        .await
        .with_context(|| format!("Failed to pull from {}", subscription))?;

    response
        .get("receivedMessages")
        .and_then(|v| v.as_array())
        .map(|msgs| msgs.iter().map(ReceivedMessage::from_value).collect())
        .unwrap_or_else(|| Ok(Vec::new()))
}

pub async fn acknowledge(client: &GcpClient, subscription: &str, ack_ids: &[String]) -> Result<()> {
    if ack_ids.is_empty() {
        return Ok(());
    }
    let url = client.pubsub_url(&format!("subscriptions/{}:acknowledge", subscription));
    client
        .post(&url, Some(&json!({ "ackIds": ack_ids })))
        .await?;
    Ok(())
}

pub async fn delete_subscription(client: &GcpClient, subscription: &str) -> Result<()> {
    client
        .delete(&client.pubsub_url(&format!("subscriptions/{}", subscription)))
        .await
        .with_context(|| format!("Failed to delete subscription {}", subscription))?;
    Ok(())
}

/// Parse `key=value` pairs given on the command line
pub fn parse_attributes(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("Attribute must be key=value: {}", pair))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_received_message_decodes_payload() {
        let value = json!({
            "ackId": "ack-1",
            "message": {
                "data": Base64.encode("hello"),
                "messageId": "42",
                "attributes": { "origin": "test" },
                "publishTime": "2024-01-01T00:00:00Z"
            }
        });
        let msg = ReceivedMessage::from_value(&value).unwrap();
        assert_eq!(msg.text(), "hello");
        assert_eq!(msg.ack_id, "ack-1");
        assert_eq!(msg.attributes.get("origin").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_received_message_rejects_bad_base64() {
        let value = json!({ "message": { "data": "***" } });
        assert!(ReceivedMessage::from_value(&value).is_err());
    }

    #[test]
    fn test_parse_attributes() {
        let attrs = parse_attributes(&["a=1".to_string(), "b=x=y".to_string()]).unwrap();
        assert_eq!(attrs["a"], "1");
        assert_eq!(attrs["b"], "x=y");
        assert!(parse_attributes(&["novalue".to_string()]).is_err());
        assert!(parse_attributes(&["=v".to_string()]).is_err());
    }
}
