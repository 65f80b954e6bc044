//! Daemon configuration from environment variables

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tunsync_core::config::{EngineConfig, SyncConfig, TunnelConfig, ZoneConfig};
use tunsync_source_http::DEFAULT_INVENTORY_URL;

const DEFAULT_DASHBOARD_SERVICE: &str = "http://discopanel:8080";
const DEFAULT_CONTAINER_PREFIX: &str = "discopanel-server-";
const DEFAULT_CLOUDFLARED_BIN: &str = "cloudflared";
const DEFAULT_WATCH_INTERVAL_SECS: u64 = 2;

/// Variables that must be set and non-empty
const REQUIRED_VARS: &[&str] = &[
    "CLOUDFLARE_API_TOKEN",
    "ACCOUNT_ID",
    "ZONE_ID",
    "DISCOPANEL_HOST_DATA_PATH",
    "DOMAIN",
    "DASHBOARD_SUBDOMAIN",
    "TUNNEL_NAME",
    "MC_SERVER_RECORD_COMMENT",
    "MC_DASHBOARD_RECORD_COMMENT",
];

/// Whether the Cloudflare client may mutate anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    DryRun,
}

/// Application configuration
pub struct Config {
    pub api_token: String,
    pub account_id: String,
    pub zone_id: String,
    pub host_data_path: PathBuf,
    pub domain: String,
    pub dashboard_subdomain: String,
    pub dashboard_service: String,
    pub tunnel_name: String,
    pub server_record_comment: String,
    pub dashboard_record_comment: String,
    pub container_prefix: String,
    pub inventory_url: String,
    pub cloudflared_bin: String,
    pub watch_interval_secs: u64,
    pub resync_interval_secs: u64,
    pub mode: Mode,
    pub log_level: String,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_token", &"<REDACTED>")
            .field("account_id", &self.account_id)
            .field("zone_id", &self.zone_id)
            .field("host_data_path", &self.host_data_path)
            .field("domain", &self.domain)
            .field("dashboard_subdomain", &self.dashboard_subdomain)
            .field("tunnel_name", &self.tunnel_name)
            .field("inventory_url", &self.inventory_url)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        for var in REQUIRED_VARS {
            if get(var).is_none() {
                anyhow::bail!("{} not set", var);
            }
        }
        let required = |key: &str| get(key).unwrap_or_default();

        let parse_secs = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} must be a whole number of seconds. Got: {}", key, raw)),
                None => Ok(default),
            }
        };

        let mode = match get("TUNSYNC_MODE").as_deref().map(str::trim) {
            None | Some("live") => Mode::Live,
            Some("dry-run") => Mode::DryRun,
            Some(other) => anyhow::bail!(
                "TUNSYNC_MODE '{}' is not supported. Supported modes: live, dry-run",
                other
            ),
        };

        Ok(Self {
            api_token: required("CLOUDFLARE_API_TOKEN"),
            account_id: required("ACCOUNT_ID"),
            zone_id: required("ZONE_ID"),
            host_data_path: PathBuf::from(required("DISCOPANEL_HOST_DATA_PATH")),
            domain: required("DOMAIN"),
            dashboard_subdomain: required("DASHBOARD_SUBDOMAIN"),
            dashboard_service: get("DASHBOARD_SERVICE")
                .unwrap_or_else(|| DEFAULT_DASHBOARD_SERVICE.to_string()),
            tunnel_name: required("TUNNEL_NAME"),
            server_record_comment: required("MC_SERVER_RECORD_COMMENT"),
            dashboard_record_comment: required("MC_DASHBOARD_RECORD_COMMENT"),
            container_prefix: get("CONTAINER_PREFIX")
                .unwrap_or_else(|| DEFAULT_CONTAINER_PREFIX.to_string()),
            inventory_url: get("INVENTORY_URL").unwrap_or_else(|| DEFAULT_INVENTORY_URL.to_string()),
            cloudflared_bin: get("CLOUDFLARED_BIN")
                .unwrap_or_else(|| DEFAULT_CLOUDFLARED_BIN.to_string()),
            watch_interval_secs: parse_secs(
                "TUNSYNC_WATCH_INTERVAL_SECS",
                DEFAULT_WATCH_INTERVAL_SECS,
            )?,
            resync_interval_secs: parse_secs("TUNSYNC_RESYNC_INTERVAL_SECS", 0)?,
            mode,
            log_level: get("TUNSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.sync_config().validate()?;

        if !self.inventory_url.starts_with("http://") && !self.inventory_url.starts_with("https://")
        {
            anyhow::bail!(
                "INVENTORY_URL must use HTTP or HTTPS scheme. Got: {}",
                self.inventory_url
            );
        }

        if !(1..=3600).contains(&self.watch_interval_secs) {
            anyhow::bail!(
                "TUNSYNC_WATCH_INTERVAL_SECS must be between 1 and 3600 seconds. Got: {}",
                self.watch_interval_secs
            );
        }

        if self.resync_interval_secs != 0 && !(10..=86400).contains(&self.resync_interval_secs) {
            anyhow::bail!(
                "TUNSYNC_RESYNC_INTERVAL_SECS must be 0 (off) or between 10 and 86400 seconds. Got: {}",
                self.resync_interval_secs
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "TUNSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Engine configuration derived from the environment
    pub fn sync_config(&self) -> SyncConfig {
        let mut zone = ZoneConfig::new(
            &self.domain,
            &self.dashboard_subdomain,
            &self.server_record_comment,
            &self.dashboard_record_comment,
        );
        zone.dashboard_service = self.dashboard_service.clone();
        zone.container_prefix = self.container_prefix.clone();

        SyncConfig {
            zone,
            tunnel: TunnelConfig {
                name: self.tunnel_name.clone(),
            },
            engine: EngineConfig {
                resync_interval_secs: self.resync_interval_secs,
                ..EngineConfig::default()
            },
        }
    }

    /// Directory whose children are the backend servers
    pub fn servers_path(&self) -> PathBuf {
        self.host_data_path.join("servers")
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }
}
