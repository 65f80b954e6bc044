//! Configuration types for the reconciliation system
//!
//! This module defines the configuration consumed by [`crate::SyncEngine`].
//! Sourcing the values (environment, files) is the daemon's job.

use serde::{Deserialize, Serialize};

/// Main reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// DNS zone layout and record tags
    pub zone: ZoneConfig,

    /// Tunnel to provision
    pub tunnel: TunnelConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SyncConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.zone.validate()?;
        self.tunnel.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Zone layout and ownership tags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Domain every managed hostname lives under (e.g. "example.com")
    pub domain: String,

    /// Subdomain of the dashboard hostname
    pub dashboard_subdomain: String,

    /// Origin service the dashboard hostname routes to
    #[serde(default = "default_dashboard_service")]
    pub dashboard_service: String,

    /// Comment tag marking per-service records as managed
    pub server_record_tag: String,

    /// Comment tag marking the dashboard record as managed
    pub dashboard_record_tag: String,

    /// Prefix turning a service id into its container hostname
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,
}

fn default_dashboard_service() -> String {
    "http://discopanel:8080".to_string()
}

fn default_container_prefix() -> String {
    "discopanel-server-".to_string()
}

impl ZoneConfig {
    /// Create a zone config with default dashboard service and container prefix
    pub fn new(
        domain: impl Into<String>,
        dashboard_subdomain: impl Into<String>,
        server_record_tag: impl Into<String>,
        dashboard_record_tag: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            dashboard_subdomain: dashboard_subdomain.into(),
            dashboard_service: default_dashboard_service(),
            server_record_tag: server_record_tag.into(),
            dashboard_record_tag: dashboard_record_tag.into(),
            container_prefix: default_container_prefix(),
        }
    }

    /// Validate the zone configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_domain_name(&self.domain)?;
        validate_domain_name(&self.dashboard_hostname())?;

        if self.server_record_tag.is_empty() {
            return Err(crate::Error::config("Server record tag cannot be empty"));
        }
        if self.dashboard_record_tag.is_empty() {
            return Err(crate::Error::config("Dashboard record tag cannot be empty"));
        }
        // Orphan cleanup lists by server tag, so a shared tag would sweep the dashboard away
        if self.server_record_tag == self.dashboard_record_tag {
            return Err(crate::Error::config(
                "Server and dashboard record tags must differ",
            ));
        }
        if self.dashboard_service.is_empty() {
            return Err(crate::Error::config("Dashboard service cannot be empty"));
        }
        Ok(())
    }

    /// Suffix shared by every managed per-service hostname (".example.com")
    ///
    /// Generated names are lowercase, matching what the record store returns.
    pub fn zone_suffix(&self) -> String {
        format!(".{}", self.domain).to_ascii_lowercase()
    }

    /// Hostname of the per-service records for `port`
    pub fn hostname(&self, port: &str) -> String {
        format!("{}.{}", port, self.domain).to_ascii_lowercase()
    }

    /// Hostname of the dashboard record
    pub fn dashboard_hostname(&self) -> String {
        format!("{}.{}", self.dashboard_subdomain, self.domain).to_ascii_lowercase()
    }

    /// Container hostname of a service, derived without any lookup
    pub fn container_name(&self, service_id: &str) -> String {
        format!("{}{}", self.container_prefix, service_id)
    }

    /// Port key of a managed hostname, or None if it is outside the zone
    ///
    /// DNS names are case-insensitive, so the suffix is matched ignoring case.
    pub fn port_key<'a>(&self, name: &'a str) -> Option<&'a str> {
        let suffix = self.zone_suffix();
        let split = name.len().checked_sub(suffix.len())?;
        if split == 0 || !name.is_char_boundary(split) {
            return None;
        }

        let (key, tail) = name.split_at(split);
        tail.eq_ignore_ascii_case(&suffix).then_some(key)
    }
}

/// Tunnel provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Name the tunnel is looked up / created under
    pub name: String,
}

impl TunnelConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Tunnel name cannot be empty"));
        }
        Ok(())
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Window in which further trigger events are folded into one pass
    #[serde(default = "default_trigger_debounce_ms")]
    pub trigger_debounce_ms: u64,

    /// Event channel capacity (bounded to prevent unbounded memory growth)
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Periodic resync interval in seconds (0 disables it)
    #[serde(default)]
    pub resync_interval_secs: u64,
}

fn default_trigger_debounce_ms() -> u64 {
    500
}

fn default_event_channel_capacity() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trigger_debounce_ms: default_trigger_debounce_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            resync_interval_secs: 0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.trigger_debounce_ms > 60_000 {
            return Err(crate::Error::config(
                "Trigger debounce must not exceed 60000 ms",
            ));
        }
        Ok(())
    }
}

/// Validate that a string is a valid domain name
///
/// Basic RFC 1035 checks: total length, label length, label characters.
pub fn validate_domain_name(domain: &str) -> Result<(), crate::Error> {
    if domain.is_empty() {
        return Err(crate::Error::config("Domain name cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(crate::Error::config(format!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        )));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(crate::Error::config(format!(
                "Domain name has empty label: '{}'",
                domain
            )));
        }

        if label.len() > 63 {
            return Err(crate::Error::config(format!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            )));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(crate::Error::config(format!(
                "Domain label contains invalid characters. Label: '{}'",
                label
            )));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(crate::Error::config(format!(
                "Domain label cannot start or end with hyphen. Label: '{}'",
                label
            )));
        }
    }

    Ok(())
}
