// # Backend Source Trait
//
// Defines the interface producing the desired backend services.
//
// ## Implementations
//
// - HTTP inventory API: `tunsync-source-http` crate

use async_trait::async_trait;

use crate::model::BackendService;

/// Trait for desired-state source implementations
///
/// # Failure Semantics
///
/// An unreachable source MUST surface as an error. Returning an empty list
/// instead would make the engine delete every managed record.
#[async_trait]
pub trait BackendSource: Send + Sync {
    /// Fetch the current backend services in inventory order
    async fn fetch_backends(&self) -> Result<Vec<BackendService>, crate::Error>;

    /// Get the source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}
