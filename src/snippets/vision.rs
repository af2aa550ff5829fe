//! Cloud Vision snippets
//!
//! Image analysis with `images:annotate`: labels, faces, text and safe-search
//! likelihoods, for an image referenced by URI or sent inline.

use super::str_field;
use crate::gcp::client::GcpClient;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine;
use serde_json::{json, Value};
use std::fmt;

/// Where the image comes from
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// `gs://` or public http(s) URI
    Uri(String),
    /// Raw image bytes, sent base64-encoded
    Bytes(Vec<u8>),
}

impl ImageSource {
    fn to_json(&self) -> Value {
        match self {
            ImageSource::Uri(uri) => json!({ "source": { "imageUri": uri } }),
            ImageSource::Bytes(bytes) => json!({ "content": Base64.encode(bytes) }),
        }
    }
}

/// A requested feature type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Labels,
    Faces,
    Text,
    SafeSearch,
}

impl Feature {
    pub fn api_name(&self) -> &'static str {
        match self {
            Feature::Labels => "LABEL_DETECTION",
            Feature::Faces => "FACE_DETECTION",
            Feature::Text => "TEXT_DETECTION",
            Feature::SafeSearch => "SAFE_SEARCH_DETECTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub description: String,
    pub score: f64,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<30} {:.1}%", self.description, self.score * 100.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub confidence: f64,
    pub joy: String,
    pub sorrow: String,
    pub anger: String,
    pub surprise: String,
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "confidence {:.2}: joy={} sorrow={} anger={} surprise={}",
            self.confidence, self.joy, self.sorrow, self.anger, self.surprise
        )
    }
}

/// Annotate one image with the requested features; returns the raw response
pub async fn annotate(
    client: &GcpClient,
    image: &ImageSource,
    features: &[Feature],
    max_results: u32,
) -> Result<Value> {
    let features: Vec<Value> = features
        .iter()
        .map(|f| json!({ "type": f.api_name(), "maxResults": max_results }))
        .collect();
    let body = json!({
        "requests": [{ "image": image.to_json(), "features": features }],
    });

    let response = client
        .post(&client.vision_url("images:annotate"), Some(&body))
        .await
        .context("Failed to annotate image")?;

    let first = response
        .get("responses")
        .and_then(|v| v.get(0))
        .cloned()
        .unwrap_or_else(|| json!({}));

    // Per-image failures come back with HTTP 200
    if let Some(error) = first.get("error") {
        return Err(anyhow::anyhow!(
            "Image annotation failed: {}",
            str_field(error, "message")
        ));
    }

    Ok(first)
}

pub async fn detect_labels(client: &GcpClient, image: &ImageSource) -> Result<Vec<Label>> {
    let response = annotate(client, image, &[Feature::Labels], 10).await?;
    Ok(parse_labels(&response))
}

pub async fn detect_faces(client: &GcpClient, image: &ImageSource) -> Result<Vec<Face>> {
    let response = annotate(client, image, &[Feature::Faces], 10).await?;
    Ok(parse_faces(&response))
}

/// Full detected text (first annotation), empty when none
pub async fn detect_text(client: &GcpClient, image: &ImageSource) -> Result<String> {
    let response = annotate(client, image, &[Feature::Text], 1).await?;
    Ok(response
        .get("textAnnotations")
        .and_then(|v| v.get(0))
        .map(|t| str_field(t, "description"))
        .unwrap_or_default())
}

/// Safe-search likelihoods as `(category, likelihood)`
pub async fn detect_safe_search(
    client: &GcpClient,
    image: &ImageSource,
) -> Result<Vec<(String, String)>> {
    let response = annotate(client, image, &[Feature::SafeSearch], 1).await?;
    let annotation = response
        .get("safeSearchAnnotation")
        .cloned()
        .unwrap_or_else(|| json!({}));

    Ok(["adult", "spoof", "medical", "violence", "racy"]
        .iter()
        .map(|k| (k.to_string(), str_field(&annotation, k)))
        .collect())
}

fn parse_labels(response: &Value) -> Vec<Label> {
    response
        .get("labelAnnotations")
        .and_then(|v| v.as_array())
        .map(|labels| {
            labels
                .iter()
                .map(|l| Label {
                    description: str_field(l, "description"),
                    score: l.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_faces(response: &Value) -> Vec<Face> {
    response
        .get("faceAnnotations")
        .and_then(|v| v.as_array())
        .map(|faces| {
            faces
                .iter()
                .map(|f| Face {
                    confidence: f
                        .get("detectionConfidence")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.0),
                    joy: str_field(f, "joyLikelihood"),
                    sorrow: str_field(f, "sorrowLikelihood"),
                    anger: str_field(f, "angerLikelihood"),
                    surprise: str_field(f, "surpriseLikelihood"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `gs://` and http(s) arguments are URIs, anything else is a local file
pub fn image_source_from_arg(arg: &str) -> Result<ImageSource> {
    if arg.starts_with("gs://") || arg.starts_with("http://") || arg.starts_with("https://") {
        return Ok(ImageSource::Uri(arg.to_string()));
    }
    let bytes = std::fs::read(arg).with_context(|| format!("Failed to read image {}", arg))?;
    Ok(ImageSource::Bytes(bytes))
}
