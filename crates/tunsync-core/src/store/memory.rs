// # Memory Record Store
//
// In-memory implementation of RecordStore.
//
// ## Purpose
//
// Stands in for the remote API when embedding the engine without network
// access and in tests. Every call is recorded so callers can assert on the
// exact sequence of operations a pass issued, and failures can be injected
// per record name.
//
// ## Behavior
//
// - Record ids are assigned sequentially ("rec-1", "rec-2", ...)
// - Clones share the same underlying state
// - Nothing survives a restart

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{DnsRecord, IngressRule, RecordFilter, RecordSpec, TunnelIdentity};
use crate::traits::RecordStore;

/// A call received by the memory store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List(RecordFilter),
    Create(RecordSpec),
    Update { id: String, spec: RecordSpec },
    Delete { id: String },
    GetOrCreateTunnel { name: String },
    SetIngress { tunnel_id: String, rules: Vec<IngressRule> },
}

impl StoreCall {
    /// Whether this call creates, updates or deletes a DNS record
    pub fn is_record_mutation(&self) -> bool {
        matches!(
            self,
            StoreCall::Create(_) | StoreCall::Update { .. } | StoreCall::Delete { .. }
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<DnsRecord>,
    next_id: u64,
    tunnels: HashMap<String, TunnelIdentity>,
    ingress: HashMap<String, Vec<IngressRule>>,
    calls: Vec<StoreCall>,
    failing_names: HashSet<String>,
    fail_listing: bool,
    fail_ingress: bool,
    withhold_token: bool,
}

impl Inner {
    fn injected(&self, name: &str) -> Result<(), Error> {
        if self.failing_names.contains(name) {
            return Err(Error::transport(
                "memory",
                format!("injected failure for {}", name),
            ));
        }
        Ok(())
    }
}

/// In-memory record store implementation
///
/// # Example
///
/// ```rust,no_run
/// use tunsync_core::store::MemoryRecordStore;
/// use tunsync_core::model::{RecordFilter, RecordSpec};
/// use tunsync_core::traits::RecordStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRecordStore::new();
///     store
///         .create_record(&RecordSpec::tunnel_cname("25565.example.com", "abc123", "mc"))
///         .await?;
///
///     let records = store.list_records(&RecordFilter::new().comment("mc")).await?;
///     assert_eq!(records.len(), 1);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryRecordStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records` (their ids are kept)
    pub fn with_records(records: Vec<DnsRecord>) -> Self {
        let inner = Inner {
            next_id: records.len() as u64,
            records,
            ..Inner::default()
        };
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Register an existing tunnel
    pub async fn insert_tunnel(&self, name: impl Into<String>, identity: TunnelIdentity) {
        self.inner.write().await.tunnels.insert(name.into(), identity);
    }

    /// Snapshot of all stored records
    pub async fn records(&self) -> Vec<DnsRecord> {
        self.inner.read().await.records.clone()
    }

    /// Every call received so far, in order
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.inner.read().await.calls.clone()
    }

    /// Number of record create/update/delete calls received so far
    pub async fn record_mutation_count(&self) -> usize {
        self.inner
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.is_record_mutation())
            .count()
    }

    /// Forget the recorded calls
    pub async fn clear_calls(&self) {
        self.inner.write().await.calls.clear();
    }

    /// Last ingress list set for `tunnel_id`
    pub async fn ingress(&self, tunnel_id: &str) -> Option<Vec<IngressRule>> {
        self.inner.read().await.ingress.get(tunnel_id).cloned()
    }

    /// Make every create/update/delete touching `name` fail
    pub async fn fail_record(&self, name: impl Into<String>) {
        self.inner.write().await.failing_names.insert(name.into());
    }

    /// Make record listing fail (or succeed again)
    pub async fn set_fail_listing(&self, fail: bool) {
        self.inner.write().await.fail_listing = fail;
    }

    /// Make ingress replacement fail (or succeed again)
    pub async fn set_fail_ingress(&self, fail: bool) {
        self.inner.write().await.fail_ingress = fail;
    }

    /// Make tunnel provisioning return no token
    pub async fn set_withhold_token(&self, withhold: bool) {
        self.inner.write().await.withhold_token = withhold;
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<DnsRecord>, Error> {
        let mut inner = self.inner.write().await;
        inner.calls.push(StoreCall::List(filter.clone()));

        if inner.fail_listing {
            return Err(Error::transport("memory", "injected listing failure"));
        }

        Ok(inner
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn create_record(&self, spec: &RecordSpec) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        inner.calls.push(StoreCall::Create(spec.clone()));
        inner.injected(&spec.name)?;

        inner.next_id += 1;
        let id = format!("rec-{}", inner.next_id);
        inner.records.push(DnsRecord {
            id,
            record_type: spec.record_type,
            name: spec.name.clone(),
            content: spec.content.clone(),
            comment: Some(spec.comment.clone()),
            proxied: Some(spec.proxied),
        });
        Ok(())
    }

    async fn update_record(&self, id: &str, spec: &RecordSpec) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        inner.calls.push(StoreCall::Update {
            id: id.to_string(),
            spec: spec.clone(),
        });
        inner.injected(&spec.name)?;

        let record = inner
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found(format!("DNS record not found: {}", id)))?;
        record.record_type = spec.record_type;
        record.name = spec.name.clone();
        record.content = spec.content.clone();
        record.comment = Some(spec.comment.clone());
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        inner.calls.push(StoreCall::Delete { id: id.to_string() });

        let position = inner
            .records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::not_found(format!("DNS record not found: {}", id)))?;
        let name = inner.records[position].name.clone();
        inner.injected(&name)?;

        inner.records.remove(position);
        Ok(())
    }

    async fn get_or_create_tunnel(&self, name: &str) -> Result<TunnelIdentity, Error> {
        let mut inner = self.inner.write().await;
        inner.calls.push(StoreCall::GetOrCreateTunnel {
            name: name.to_string(),
        });

        if inner.withhold_token {
            return Err(Error::provisioning(format!(
                "Failed to obtain tunnel token for {}",
                name
            )));
        }

        let next = inner.tunnels.len() + 1;
        let identity = inner
            .tunnels
            .entry(name.to_string())
            .or_insert_with(|| {
                TunnelIdentity::new(format!("tunnel-{}", next), format!("token-{}", next))
            })
            .clone();
        Ok(identity)
    }

    async fn set_tunnel_ingress(&self, tunnel_id: &str, rules: &[IngressRule]) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        inner.calls.push(StoreCall::SetIngress {
            tunnel_id: tunnel_id.to_string(),
            rules: rules.to_vec(),
        });

        if inner.fail_ingress {
            return Err(Error::transport("memory", "injected ingress failure"));
        }

        inner.ingress.insert(tunnel_id.to_string(), rules.to_vec());
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordType;

    #[tokio::test]
    async fn test_create_update_delete() {
        let store = MemoryRecordStore::new();
        let spec = RecordSpec::tunnel_cname("25565.example.com", "abc", "mc");
        store.create_record(&spec).await.unwrap();

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "rec-1");
        assert_eq!(records[0].content, "abc.cfargotunnel.com");

        let moved = RecordSpec::tunnel_cname("25565.example.com", "def", "mc");
        store.update_record("rec-1", &moved).await.unwrap();
        assert_eq!(store.records().await[0].content, "def.cfargotunnel.com");
        assert_eq!(store.records().await[0].id, "rec-1");

        store.delete_record("rec-1").await.unwrap();
        assert!(store.records().await.is_empty());
        assert_eq!(store.record_mutation_count().await, 3);
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_state_untouched() {
        let store = MemoryRecordStore::new();
        store.fail_record("25565.example.com").await;

        let result = store
            .create_record(&RecordSpec::tunnel_marker("25565.example.com", "mc"))
            .await;
        assert!(matches!(result, Err(Error::Transport { .. })));
        assert!(store.records().await.is_empty());
        assert_eq!(store.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_tunnel_reused_by_name() {
        let store = MemoryRecordStore::new();
        let first = store.get_or_create_tunnel("home").await.unwrap();
        let second = store.get_or_create_tunnel("home").await.unwrap();
        assert_eq!(first, second);

        let other = store.get_or_create_tunnel("office").await.unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_list_applies_filter() {
        let store = MemoryRecordStore::new();
        store
            .create_record(&RecordSpec::tunnel_cname("25565.example.com", "abc", "mc"))
            .await
            .unwrap();
        store
            .create_record(&RecordSpec::tunnel_marker("25565.example.com", "mc"))
            .await
            .unwrap();

        let txt = store
            .list_records(&RecordFilter::new().record_type(RecordType::Txt))
            .await
            .unwrap();
        assert_eq!(txt.len(), 1);
        assert_eq!(txt[0].record_type, RecordType::Txt);
    }
}
