//! Client for the link-unlocking API.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

/// Metadata for one unlocked file, immutable once parsed.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Temporary pre-authorized URL for direct byte retrieval.
    pub direct_url: String,
    pub display_name: String,
    /// Parsed from the API's human-formatted size string; None when the
    /// string is absent or unparsable.
    pub reported_size: Option<u64>,
}

// The API keys its JSON with decorated strings; the schema pins them down
// so missing fields fail loudly instead of silently producing empty values.
#[derive(Deserialize, Debug)]
struct UnlockResponse {
    #[serde(rename = "📜 Extracted Info")]
    extracted: Option<Vec<ExtractedItem>>,
}

#[derive(Deserialize, Debug)]
struct ExtractedItem {
    #[serde(rename = "📂 Title")]
    title: Option<String>,
    #[serde(rename = "📏 Size")]
    size: Option<String>,
    #[serde(rename = "🔽 Direct Download Link")]
    direct_link: Option<String>,
}

pub struct UnlockClient {
    api_base: String,
    client: reqwest::Client,
}

impl UnlockClient {
    pub fn new(api_base: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self { api_base, client }
    }

    /// Resolve a share link into direct-download metadata. One request, no
    /// retry: the API documents no idempotency contract.
    pub async fn extract(&self, link: &str) -> Result<FileMetadata, String> {
        let url = format!("{}?url={}", self.api_base, urlencoding::encode(link));
        info!("🔍 Extracting link via {}", self.api_base);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response: {e}"))?;

        debug!("Unlock API status: {status}");

        if !status.is_success() {
            return Err(format!("API error {status}"));
        }

        let parsed: UnlockResponse =
            serde_json::from_str(&body).map_err(|e| format!("Failed to parse response: {e}"))?;

        let items = parsed.extracted.ok_or("No extracted info in response")?;
        let item = items.first().ok_or("Empty extracted info")?;

        let direct_url = item
            .direct_link
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or("No direct download link in response")?;
        let display_name = item
            .title
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "file.bin".to_string());
        let reported_size = item.size.as_deref().and_then(parse_size_str);

        info!(
            "🔗 Unlocked \"{}\" ({} bytes reported)",
            display_name,
            reported_size.map_or_else(|| "?".to_string(), |s| s.to_string())
        );

        Ok(FileMetadata {
            direct_url,
            display_name,
            reported_size,
        })
    }
}

/// Parse a human-formatted size string ("14.5 MB") into bytes, base-1024.
pub fn parse_size_str(s: &str) -> Option<u64> {
    static SIZE_RE: OnceLock<Regex> = OnceLock::new();
    let re = SIZE_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*([0-9]+(?:\.[0-9]+)?)\s*(B|KB|MB|GB|TB)\s*$").unwrap()
    });
    let caps = re.captures(s)?;
    let value: f64 = caps[1].parse().ok()?;
    let multiplier: f64 = match caps[2].to_ascii_uppercase().as_str() {
        "B" => 1.0,
        "KB" => 1024.0,
        "MB" => 1024.0 * 1024.0,
        "GB" => 1024.0 * 1024.0 * 1024.0,
        "TB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_plain_bytes() {
        assert_eq!(parse_size_str("512B"), Some(512));
        assert_eq!(parse_size_str("512 B"), Some(512));
    }

    #[test]
    fn test_parse_size_decimal_megabytes() {
        assert_eq!(parse_size_str("14.5 MB"), Some((14.5 * 1024.0 * 1024.0) as u64));
    }

    #[test]
    fn test_parse_size_gigabytes() {
        assert_eq!(parse_size_str("2 GB"), Some(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_parse_size_case_insensitive() {
        assert_eq!(parse_size_str("10 kb"), Some(10 * 1024));
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert_eq!(parse_size_str("huge"), None);
        assert_eq!(parse_size_str(""), None);
        assert_eq!(parse_size_str("12 parsecs"), None);
    }

    #[test]
    fn test_response_schema_maps_decorated_keys() {
        let body = r#"{
            "✅ Status": "Success",
            "📜 Extracted Info": [{
                "📂 Title": "movie.mp4",
                "📏 Size": "1.2 GB",
                "🔽 Direct Download Link": "https://d.example/movie.mp4"
            }]
        }"#;
        let parsed: UnlockResponse = serde_json::from_str(body).unwrap();
        let items = parsed.extracted.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("movie.mp4"));
        assert_eq!(
            items[0].direct_link.as_deref(),
            Some("https://d.example/movie.mp4")
        );
        assert_eq!(parse_size_str(items[0].size.as_deref().unwrap()), Some(1288490188));
    }

    #[test]
    fn test_response_schema_tolerates_missing_info() {
        let parsed: UnlockResponse = serde_json::from_str(r#"{"✅ Status": "Failed"}"#).unwrap();
        assert!(parsed.extracted.is_none());
    }
}
