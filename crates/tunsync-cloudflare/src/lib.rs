// # Cloudflare Record Store
//
// This crate implements the tunsync `RecordStore` over the Cloudflare v4 API:
// DNS records of one zone and Cloudflare Tunnels of one account.
//
// ## Behavior
//
// - One HTTP request per store operation (listing follows pagination)
// - Full error propagation; no retry, no backoff, no caching
// - HTTP timeout configured (30 seconds)
// - Specific error handling for HTTP status codes (401/403, 404, 409, 429, 5xx)
// - A 2xx answer whose envelope says `success: false` is a failure too
// - Dry-run mode: GETs are performed, mutating payloads are only logged
//
// ## Security Requirements
//
// - API token NEVER appears in logs or Debug output
// - Tunnel tokens are returned to the caller and never logged
//
// ## API Reference
//
// - List DNS Records: GET `/zones/:zone_id/dns_records`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Patch DNS Record: PATCH `/zones/:zone_id/dns_records/:record_id`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`
// - List Tunnels: GET `/accounts/:account_id/cfd_tunnel?name=...&is_deleted=false`
// - Create Tunnel: POST `/accounts/:account_id/cfd_tunnel`
// - Tunnel Token: GET `/accounts/:account_id/cfd_tunnel/:tunnel_id/token`
// - Tunnel Configuration: PUT `/accounts/:account_id/cfd_tunnel/:tunnel_id/configurations`

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tunsync_core::model::{DnsRecord, IngressRule, RecordFilter, RecordSpec, TunnelIdentity};
use tunsync_core::traits::RecordStore;
use tunsync_core::{Error, Result};

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size used when listing DNS records
const RECORDS_PER_PAGE: u32 = 100;

/// "Automatic" TTL
const AUTO_TTL: u32 = 1;

const SERVICE: &str = "cloudflare";

/// Standard Cloudflare response envelope
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct Tunnel {
    id: String,
    name: String,
    #[serde(default)]
    deleted_at: Option<String>,
}

/// Cloudflare record store
///
/// # Trust Level: Untrusted
///
/// This client is isolated, stateless, and single-shot. Deciding what to
/// change and when is owned by `SyncEngine`.
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the client will:
/// - Perform all GET requests (record listing, tunnel lookup, token fetch)
/// - Log the intended POST/PATCH/PUT/DELETE payload
/// - **NOT** actually modify anything
pub struct CloudflareClient {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// Account owning the tunnel
    account_id: String,

    /// Zone holding the managed records
    zone_id: String,

    /// API base URL (overridable for tests)
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Dry-run mode: if true, perform GET requests but skip mutations
    dry_run: bool,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareClient")
            .field("api_token", &"<REDACTED>")
            .field("account_id", &self.account_id)
            .field("zone_id", &self.zone_id)
            .field("base_url", &self.base_url)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl CloudflareClient {
    /// Create a new Cloudflare client
    ///
    /// # Parameters
    ///
    /// - `api_token`: API token with Zone:DNS:Edit and Account:Cloudflare Tunnel:Edit
    /// - `account_id`: Account owning the tunnel
    /// - `zone_id`: Zone holding the managed records
    /// - `dry_run`: If true, perform GET requests but skip mutations
    ///
    /// # Returns
    ///
    /// - `Err(Error::Config)`: If a credential is empty or the HTTP client cannot be built
    pub fn new(
        api_token: impl Into<String>,
        account_id: impl Into<String>,
        zone_id: impl Into<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let api_token = api_token.into();
        let account_id = account_id.into();
        let zone_id = zone_id.into();

        if api_token.is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }
        if account_id.is_empty() {
            return Err(Error::config("Cloudflare account ID cannot be empty"));
        }
        if zone_id.is_empty() {
            return Err(Error::config("Cloudflare zone ID cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        if dry_run {
            tracing::warn!("Cloudflare client running in DRY-RUN mode - no changes will be made");
        }

        Ok(Self {
            api_token,
            account_id,
            zone_id,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            client,
            dry_run,
        })
    }

    /// Point the client at another API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, self.zone_id)
    }

    fn record_url(&self, record_id: &str) -> String {
        format!("{}/{}", self.records_url(), record_id)
    }

    fn tunnels_url(&self) -> String {
        format!("{}/accounts/{}/cfd_tunnel", self.base_url, self.account_id)
    }

    /// Send an authenticated request and unwrap the response envelope
    ///
    /// Non-2xx statuses and `success: false` envelopes both become errors.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<ApiEnvelope<T>> {
        let response = request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::transport(SERVICE, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status, &error_text, context));
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| Error::transport(SERVICE, format!("Failed to parse response: {}", e)))?;

        if !envelope.success {
            let messages: Vec<String> = envelope
                .errors
                .iter()
                .map(|m| format!("{} ({})", m.message, m.code))
                .collect();
            return Err(Error::transport(
                SERVICE,
                format!("{} rejected: {}", context, messages.join("; ")),
            ));
        }

        Ok(envelope)
    }

    fn log_dry_run(&self, method: &str, url: &str, payload: &Value) {
        tracing::info!(
            "[DRY-RUN] Would send {} request to {} with payload: {}",
            method,
            url,
            payload
        );
    }

    async fn find_tunnel(&self, name: &str) -> Result<Option<Tunnel>> {
        let request = self
            .client
            .get(self.tunnels_url())
            .query(&[("is_deleted", "false"), ("name", name)]);
        let envelope: ApiEnvelope<Vec<Tunnel>> = self.send(request, "Tunnel lookup").await?;

        Ok(envelope
            .result
            .unwrap_or_default()
            .into_iter()
            .find(|t| t.name == name && t.deleted_at.is_none()))
    }

    async fn create_tunnel(&self, name: &str) -> Result<Tunnel> {
        let payload = json!({ "name": name, "config_src": "cloudflare" });

        if self.dry_run {
            self.log_dry_run("POST", &self.tunnels_url(), &payload);
            return Err(Error::provisioning(format!(
                "Tunnel {} does not exist and cannot be created in dry-run mode",
                name
            )));
        }

        let request = self.client.post(self.tunnels_url()).json(&payload);
        let envelope: ApiEnvelope<Tunnel> = self.send(request, "Tunnel creation").await?;
        envelope
            .result
            .ok_or_else(|| Error::provisioning("Tunnel creation returned no tunnel"))
    }

    async fn tunnel_token(&self, tunnel_id: &str) -> Result<String> {
        let url = format!("{}/{}/token", self.tunnels_url(), tunnel_id);
        let envelope: ApiEnvelope<String> = self.send(self.client.get(url), "Tunnel token").await?;
        Ok(envelope.result.unwrap_or_default())
    }
}

/// Map a non-2xx status to an error
fn status_error(status: reqwest::StatusCode, error_text: &str, context: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::transport(
            SERVICE,
            format!(
                "Authentication failed: Invalid API token or insufficient permissions. Status: {}",
                status
            ),
        ),
        404 => Error::not_found(format!("{}: {}", context, error_text)),
        409 => Error::transport(
            SERVICE,
            format!(
                "Conflict: Resource is being modified by another process. Status: {}",
                status
            ),
        ),
        429 => Error::transport(
            SERVICE,
            format!("Rate limit exceeded. Please retry later. Status: {}", status),
        ),
        500..=599 => Error::transport(
            SERVICE,
            format!(
                "Cloudflare server error (transient): {} - {}",
                status, error_text
            ),
        ),
        _ => Error::transport(
            SERVICE,
            format!("{} failed: {} - {}", context, status, error_text),
        ),
    }
}

#[async_trait]
impl RecordStore for CloudflareClient {
    /// List DNS records of the zone matching `filter`, following pagination
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /zones/:zone_id/dns_records?name.endswith=.example.com&comment=tag&page=1&per_page=100
    /// Authorization: Bearer <token>
    /// ```
    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<DnsRecord>> {
        let mut params: Vec<(&str, String)> = vec![("per_page", RECORDS_PER_PAGE.to_string())];
        if let Some(ref suffix) = filter.name_suffix {
            params.push(("name.endswith", suffix.clone()));
        }
        if let Some(ref exact) = filter.name_exact {
            params.push(("name.exact", exact.clone()));
        }
        if let Some(ref comment) = filter.comment {
            params.push(("comment", comment.clone()));
        }
        if let Some(record_type) = filter.record_type {
            params.push(("type", record_type.to_string()));
        }

        let mut records = Vec::new();
        let mut page = 1u32;
        loop {
            let request = self
                .client
                .get(self.records_url())
                .query(&params)
                .query(&[("page", page.to_string())]);
            let envelope: ApiEnvelope<Vec<DnsRecord>> = self.send(request, "Record listing").await?;

            records.extend(envelope.result.unwrap_or_default());

            let total_pages = envelope.result_info.map(|i| i.total_pages).unwrap_or(0);
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        tracing::debug!("Listed {} record(s)", records.len());
        Ok(records)
    }

    async fn create_record(&self, spec: &RecordSpec) -> Result<()> {
        let payload = json!({
            "type": spec.record_type.as_str(),
            "name": spec.name,
            "content": spec.content,
            "ttl": AUTO_TTL,
            "proxied": spec.proxied,
            "comment": spec.comment,
        });

        if self.dry_run {
            self.log_dry_run("POST", &self.records_url(), &payload);
            return Ok(());
        }

        let request = self.client.post(self.records_url()).json(&payload);
        let _: ApiEnvelope<Value> = self.send(request, "Record creation").await?;
        Ok(())
    }

    async fn update_record(&self, id: &str, spec: &RecordSpec) -> Result<()> {
        let payload = json!({
            "type": spec.record_type.as_str(),
            "name": spec.name,
            "content": spec.content,
            "comment": spec.comment,
        });

        let url = self.record_url(id);
        if self.dry_run {
            self.log_dry_run("PATCH", &url, &payload);
            return Ok(());
        }

        let request = self.client.patch(url).json(&payload);
        let _: ApiEnvelope<Value> = self.send(request, "Record update").await?;
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        let url = self.record_url(id);
        if self.dry_run {
            self.log_dry_run("DELETE", &url, &Value::Null);
            return Ok(());
        }

        let _: ApiEnvelope<Value> = self.send(self.client.delete(url), "Record deletion").await?;
        Ok(())
    }

    async fn get_or_create_tunnel(&self, name: &str) -> Result<TunnelIdentity> {
        tracing::info!("Establishing Cloudflare Tunnel {}...", name);

        let existing = self
            .find_tunnel(name)
            .await
            .map_err(|e| Error::provisioning(format!("Tunnel lookup failed: {}", e)))?;

        let tunnel = match existing {
            Some(tunnel) => {
                tracing::info!("Reusing existing tunnel {}", tunnel.id);
                tunnel
            }
            None => {
                tracing::info!("No existing tunnel found, creating a new one...");
                self.create_tunnel(name).await.map_err(|e| match e {
                    Error::Provisioning(_) => e,
                    other => Error::provisioning(format!("Tunnel creation failed: {}", other)),
                })?
            }
        };

        if tunnel.id.is_empty() {
            return Err(Error::provisioning("Failed to obtain tunnel ID"));
        }

        let token = self
            .tunnel_token(&tunnel.id)
            .await
            .map_err(|e| Error::provisioning(format!("Tunnel token fetch failed: {}", e)))?;
        if token.is_empty() {
            return Err(Error::provisioning("Failed to obtain tunnel token"));
        }

        Ok(TunnelIdentity::new(tunnel.id, token))
    }

    async fn set_tunnel_ingress(&self, tunnel_id: &str, rules: &[IngressRule]) -> Result<()> {
        let url = format!("{}/{}/configurations", self.tunnels_url(), tunnel_id);
        let payload = json!({ "config": { "ingress": rules } });

        if self.dry_run {
            self.log_dry_run("PUT", &url, &payload);
            return Ok(());
        }

        let request = self.client.put(url).json(&payload);
        let _: ApiEnvelope<Value> = self.send(request, "Tunnel configuration").await?;
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "cloudflare"
    }
}
