//! Data model shared by the engine, the record store and the backend source
//!
//! Remote records are only ever held as ephemeral read copies; the desired
//! state is rebuilt from the backend source on every pass.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the hostname every tunnel answers on
pub const TUNNEL_CNAME_SUFFIX: &str = "cfargotunnel.com";

/// Service of the trailing ingress rule that matches every hostname
pub const CATCH_ALL_SERVICE: &str = "http_status:404";

/// TXT content marking a hostname as served through a tunnel (quoted form)
pub const TUNNEL_TXT_MARKER: &str = "\"cloudflared-use-tunnel\"";

/// DNS record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Txt,
    Mx,
    Ns,
    Srv,
    Caa,
    /// Any type this system never manages
    #[serde(other)]
    Other,
}

impl RecordType {
    /// Wire name of the record type
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Txt => "TXT",
            RecordType::Mx => "MX",
            RecordType::Ns => "NS",
            RecordType::Srv => "SRV",
            RecordType::Caa => "CAA",
            RecordType::Other => "OTHER",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DNS record as reported by the record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Identifier assigned by the remote store
    pub id: String,

    #[serde(rename = "type")]
    pub record_type: RecordType,

    /// Fully-qualified hostname
    pub name: String,

    pub content: String,

    /// Free-text annotation; managed records carry the configured tag here
    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub proxied: Option<bool>,
}

impl DnsRecord {
    /// Whether the stored content already equals `expected`
    ///
    /// Both sides go through [`normalize_content`], so a TXT value stored
    /// without quotes still matches the quoted marker.
    pub fn content_matches(&self, expected: &str) -> bool {
        normalize_content(self.record_type, &self.content)
            == normalize_content(self.record_type, expected)
    }
}

/// Normalize record content into the representation used on create
pub fn normalize_content(record_type: RecordType, content: &str) -> String {
    match record_type {
        RecordType::Cname => content.trim().trim_end_matches('.').to_ascii_lowercase(),
        RecordType::Txt => {
            let trimmed = content.trim();
            if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
                trimmed.to_string()
            } else {
                format!("\"{}\"", trimmed)
            }
        }
        _ => content.trim().to_string(),
    }
}

/// Desired shape of a record, used for both create and in-place update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpec {
    pub record_type: RecordType,
    pub name: String,
    pub content: String,
    /// Only honoured on create
    pub proxied: bool,
    /// Management tag written into the record comment
    pub comment: String,
}

impl RecordSpec {
    /// Proxied CNAME pointing `name` at the tunnel
    pub fn tunnel_cname(name: impl Into<String>, tunnel_id: &str, comment: impl Into<String>) -> Self {
        Self {
            record_type: RecordType::Cname,
            name: name.into(),
            content: format!("{}.{}", tunnel_id, TUNNEL_CNAME_SUFFIX),
            proxied: true,
            comment: comment.into(),
        }
    }

    /// Unproxied TXT carrying the tunnel ownership marker
    pub fn tunnel_marker(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            record_type: RecordType::Txt,
            name: name.into(),
            content: TUNNEL_TXT_MARKER.to_string(),
            proxied: false,
            comment: comment.into(),
        }
    }

    /// Whether `record` already satisfies this spec (content and tag)
    pub fn is_satisfied_by(&self, record: &DnsRecord) -> bool {
        record.record_type == self.record_type
            && record.content_matches(&self.content)
            && record.comment.as_deref().unwrap_or_default() == self.comment
    }
}

/// Query used when listing records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Only names ending with this suffix
    pub name_suffix: Option<String>,
    /// Only this exact name
    pub name_exact: Option<String>,
    /// Only records whose comment equals this tag
    pub comment: Option<String>,
    pub record_type: Option<RecordType>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.name_suffix = Some(suffix.into());
        self
    }

    pub fn name_exact(mut self, name: impl Into<String>) -> Self {
        self.name_exact = Some(name.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn record_type(mut self, record_type: RecordType) -> Self {
        self.record_type = Some(record_type);
        self
    }

    /// Evaluate the filter locally
    pub fn matches(&self, record: &DnsRecord) -> bool {
        if let Some(ref suffix) = self.name_suffix
            && !record
                .name
                .to_ascii_lowercase()
                .ends_with(&suffix.to_ascii_lowercase())
        {
            return false;
        }
        if let Some(ref exact) = self.name_exact
            && !record.name.eq_ignore_ascii_case(exact)
        {
            return false;
        }
        if let Some(ref comment) = self.comment
            && record.comment.as_deref() != Some(comment.as_str())
        {
            return false;
        }
        if let Some(record_type) = self.record_type
            && record.record_type != record_type
        {
            return false;
        }
        true
    }
}

/// One entry of a tunnel's ingress configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
}

impl IngressRule {
    /// Route `hostname` to `service`
    pub fn route(hostname: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            service: service.into(),
        }
    }

    /// The trailing rule answering 404 for every unmatched hostname
    pub fn catch_all() -> Self {
        Self {
            hostname: None,
            service: CATCH_ALL_SERVICE.to_string(),
        }
    }

    pub fn is_catch_all(&self) -> bool {
        self.hostname.is_none()
    }
}

/// Identity of a provisioned tunnel
///
/// The Debug implementation intentionally does NOT expose the token.
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelIdentity {
    pub id: String,
    /// Connector token handed to the tunnel process
    /// ⚠️ NEVER log this value
    pub token: String,
}

impl TunnelIdentity {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
        }
    }

    /// Hostname every tunnel CNAME points at
    pub fn cname_target(&self) -> String {
        format!("{}.{}", self.id, TUNNEL_CNAME_SUFFIX)
    }
}

impl fmt::Debug for TunnelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelIdentity")
            .field("id", &self.id)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// A backend service exposed through the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendService {
    pub id: String,
    pub port: String,
}

impl BackendService {
    pub fn new(id: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            port: port.into(),
        }
    }
}

/// Desired mapping of service id -> exposed port for one pass
///
/// Each port appears at most once. When two service ids claim the same
/// port, the later one takes over the earlier entry's slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    entries: Vec<BackendService>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from backends in iteration order, logging every port collision
    pub fn from_backends(backends: impl IntoIterator<Item = BackendService>) -> Self {
        let mut state = Self::new();
        for backend in backends {
            let winner = backend.id.clone();
            if let Some(replaced) = state.insert(backend) {
                tracing::warn!(
                    "Port {} claimed by both service {} and service {}; service {} wins",
                    replaced.port,
                    replaced.id,
                    winner,
                    winner
                );
            }
        }
        state
    }

    /// Insert a backend, returning the entry it displaced on a port collision
    ///
    /// A repeated service id moves that service to its new port.
    pub fn insert(&mut self, backend: BackendService) -> Option<BackendService> {
        self.entries
            .retain(|existing| existing.id != backend.id || existing.port == backend.port);

        match self.entries.iter_mut().find(|e| e.port == backend.port) {
            Some(slot) if slot.id == backend.id => None,
            Some(slot) => Some(std::mem::replace(slot, backend)),
            None => {
                self.entries.push(backend);
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackendService> {
        self.entries.iter()
    }

    pub fn ports(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.port.as_str())
    }

    pub fn contains_port(&self, port: &str) -> bool {
        self.entries.iter().any(|e| e.port == port)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for DesiredState {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::from_backends(iter.into_iter().map(|(id, port)| BackendService::new(id, port)))
    }
}
