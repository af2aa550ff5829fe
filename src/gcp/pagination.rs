//! Pagination
//!
//! List APIs return one page at a time plus a `nextPageToken`. These helpers
//! follow the token until the listing is exhausted.

use super::client::GcpClient;
use anyhow::{Context, Result};
use serde_json::Value;
use url::Url;

/// Result of a single page fetch
pub struct Page {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

impl GcpClient {
    /// Fetch one page of a list response
    pub async fn fetch_page(
        &self,
        url: &str,
        items_key: &str,
        page_token: Option<&str>,
    ) -> Result<Page> {
        let url = match page_token {
            Some(token) => with_page_token(url, token)?,
            None => url.to_string(),
        };

        let response = self.get(&url).await?;

        Ok(Page {
            items: extract_items(&response, items_key),
            next_token: response
                .get("nextPageToken")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        })
    }

    /// Fetch all items of a list response (auto-paginate)
    pub async fn fetch_all(&self, url: &str, items_key: &str) -> Result<Vec<Value>> {
        let mut all_items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .fetch_page(url, items_key, page_token.as_deref())
                .await?;
            all_items.extend(page.items);

            match page.next_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!("Fetched {} items from {}", all_items.len(), url);
        Ok(all_items)
    }
}

/// Set (or replace) the `pageToken` query parameter
fn with_page_token(url: &str, token: &str) -> Result<String> {
    let mut parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;

    let retained: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "pageToken")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("pageToken", token);

    Ok(parsed.to_string())
}

/// Extract the list under `items_key` (dotted paths allowed); missing is empty
pub fn extract_items(response: &Value, items_key: &str) -> Vec<Value> {
    let mut current = response;
    for part in items_key.split('.').filter(|p| !p.is_empty()) {
        match current.get(part) {
            Some(v) => current = v,
            None => return Vec::new(),
        }
    }

    current.as_array().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_items() {
        let response = json!({"items": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(extract_items(&response, "items").len(), 2);
        assert!(extract_items(&response, "buckets").is_empty());
        assert!(extract_items(&json!({}), "items").is_empty());
    }

    #[test]
    fn test_extract_nested_items() {
        let response = json!({"result": {"entries": [1, 2, 3]}});
        assert_eq!(extract_items(&response, "result.entries").len(), 3);
    }

    #[test]
    fn test_with_page_token_replaces_previous_token() {
        let url = with_page_token("https://x.test/v1/things?filter=a&pageToken=old", "new").unwrap();
        assert_eq!(url, "https://x.test/v1/things?filter=a&pageToken=new");
    }
}
