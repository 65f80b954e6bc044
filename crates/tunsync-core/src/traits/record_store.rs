// # Record Store Trait
//
// Defines the interface to the remote DNS / tunnel management API.
//
// ## Implementations
//
// - Cloudflare: `tunsync-cloudflare` crate
// - In-memory: `tunsync_core::store::MemoryRecordStore` (tests, embedding)

use async_trait::async_trait;

use crate::model::{DnsRecord, IngressRule, RecordFilter, RecordSpec, TunnelIdentity};

/// Trait for record store implementations
///
/// Every method is a single round-trip against the remote API.
///
/// # Trust Level: Untrusted
///
/// Stores are isolated and stateless:
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Parse provider-specific responses
/// - ✅ Return success or a typed failure
/// - ❌ Retry, back off or schedule (owned by the caller)
/// - ❌ Decide whether a change is needed (owned by `SyncEngine`)
/// - ❌ Cache state beyond a single request
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List records matching `filter`
    ///
    /// No ordering guarantee. A non-2xx answer is a hard failure, never a
    /// partial result.
    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<DnsRecord>, crate::Error>;

    /// Create a record
    async fn create_record(&self, spec: &RecordSpec) -> Result<(), crate::Error>;

    /// Update the record `id` in place (its id stays stable)
    async fn update_record(&self, id: &str, spec: &RecordSpec) -> Result<(), crate::Error>;

    /// Delete the record `id`
    async fn delete_record(&self, id: &str) -> Result<(), crate::Error>;

    /// Look up a non-deleted tunnel by exact name, creating it if absent,
    /// then fetch a fresh connector token for it
    ///
    /// # Returns
    ///
    /// - `Err(Error::Provisioning)`: No id or no token could be obtained
    async fn get_or_create_tunnel(&self, name: &str) -> Result<TunnelIdentity, crate::Error>;

    /// Replace the tunnel's complete ingress rule list
    async fn set_tunnel_ingress(
        &self,
        tunnel_id: &str,
        rules: &[IngressRule],
    ) -> Result<(), crate::Error>;

    /// Get the store name (for logging/debugging)
    fn store_name(&self) -> &'static str;
}
