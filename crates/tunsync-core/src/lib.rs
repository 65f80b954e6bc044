// # tunsync-core
//
// Core library for the tunnel/DNS reconciliation system.
//
// ## Architecture Overview
//
// This library keeps a DNS zone and a tunnel's ingress configuration in
// sync with the set of backend services running on a host:
// - **BackendSource**: Trait producing the desired service id -> port mapping
// - **RecordStore**: Trait for DNS record and tunnel management APIs
// - **ChangeTrigger**: Trait for event sources that request a new pass
// - **SyncEngine**: Core engine that diffs desired state against remote
//   records and converges them, one pass at a time
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Diff planning is pure, applying it is I/O
// 2. **Event-Driven**: Change triggers are async streams consumed serially
// 3. **Fail-Safe**: An unreachable inventory is never read as "no backends"
// 4. **Idempotency**: A converged state produces zero mutating calls
// 5. **Library-First**: The daemon is a thin layer over this crate

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod traits;
pub mod trigger;

// Re-export core types for convenience
pub use config::{EngineConfig, SyncConfig, TunnelConfig, ZoneConfig};
pub use engine::{EngineEvent, OperationFailure, PassReport, RecordOp, SyncEngine};
pub use error::{Error, Result};
pub use model::{
    BackendService, DesiredState, DnsRecord, IngressRule, RecordFilter, RecordSpec, RecordType,
    TunnelIdentity,
};
pub use store::MemoryRecordStore;
pub use traits::{BackendSource, ChangeEvent, ChangeTrigger, RecordStore};
pub use trigger::{IntervalTrigger, ManualTrigger, ManualTriggerHandle, merge_triggers};
