// # HTTP Inventory Source
//
// This crate provides the desired-state source for tunsync: a local
// management API listing the running backend services.
//
// ## Contract
//
// `GET <inventory url>` returns a JSON array of `{ "id": ..., "port": ... }`
// objects. Ids and ports may be JSON numbers or strings; both are turned
// into strings.
//
// ## Failure Semantics
//
// Network failures, non-2xx statuses and malformed bodies are all
// `Error::Transport`. The source never reports "no backends" because it
// could not reach the inventory.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tunsync_core::model::BackendService;
use tunsync_core::traits::BackendSource;
use tunsync_core::{Error, Result};

/// Default inventory endpoint
pub const DEFAULT_INVENTORY_URL: &str = "http://discopanel:8080/api/v1/servers";

/// Default HTTP timeout for inventory requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const SERVICE: &str = "inventory";

/// One entry of the inventory response; unknown fields are ignored
#[derive(Debug, Deserialize)]
struct InventoryEntry {
    #[serde(deserialize_with = "scalar_string")]
    id: String,
    #[serde(deserialize_with = "scalar_string")]
    port: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(s) => s,
        Scalar::Unsigned(n) => n.to_string(),
        Scalar::Signed(n) => n.to_string(),
    })
}

/// Whether `port` can be the first label of `<port>.<domain>`
fn is_valid_port_label(port: &str) -> bool {
    !port.is_empty()
        && port.len() <= 63
        && port.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !port.starts_with('-')
        && !port.ends_with('-')
}

/// Backend source reading the service inventory over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackendSource {
    /// Inventory endpoint
    url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpBackendSource {
    /// Create a new HTTP backend source
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the URL is empty or the HTTP client cannot be built
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::config("Inventory URL cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl BackendSource for HttpBackendSource {
    async fn fetch_backends(&self) -> Result<Vec<BackendService>> {
        tracing::info!("Fetching server list from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::transport(SERVICE, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport(
                SERVICE,
                format!("Inventory returned status {}", status),
            ));
        }

        let entries: Vec<InventoryEntry> = response
            .json()
            .await
            .map_err(|e| Error::transport(SERVICE, format!("Failed to parse inventory: {}", e)))?;

        let backends: Vec<BackendService> = entries
            .into_iter()
            .filter_map(|entry| {
                if is_valid_port_label(&entry.port) {
                    Some(BackendService::new(entry.id, entry.port))
                } else {
                    tracing::warn!(
                        "Skipping server {}: port '{}' cannot form a hostname",
                        entry.id,
                        entry.port
                    );
                    None
                }
            })
            .collect();

        tracing::debug!("Inventory lists {} backend(s)", backends.len());
        Ok(backends)
    }

    fn source_name(&self) -> &'static str {
        "http-inventory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_url_rejected() {
        assert!(matches!(HttpBackendSource::new("  "), Err(Error::Config(_))));
    }

    #[test]
    fn test_entries_accept_numbers_and_strings() {
        let entries: Vec<InventoryEntry> = serde_json::from_str(
            r#"[
                {"id": 1, "port": 25565, "name": "survival"},
                {"id": "b7", "port": "25566"}
            ]"#,
        )
        .unwrap();

        assert_eq!(entries[0].id, "1");
        assert_eq!(entries[0].port, "25565");
        assert_eq!(entries[1].id, "b7");
        assert_eq!(entries[1].port, "25566");
    }

    #[test]
    fn test_port_label_validation() {
        assert!(is_valid_port_label("25565"));
        assert!(!is_valid_port_label(""));
        assert!(!is_valid_port_label("255.65"));
        assert!(!is_valid_port_label("25565 "));
        assert!(!is_valid_port_label("-1"));
        assert!(!is_valid_port_label(&"9".repeat(64)));
    }

    #[test]
    fn test_entry_missing_port_rejected() {
        let parsed: std::result::Result<Vec<InventoryEntry>, _> =
            serde_json::from_str(r#"[{"id": 1}]"#);
        assert!(parsed.is_err());
    }
}
