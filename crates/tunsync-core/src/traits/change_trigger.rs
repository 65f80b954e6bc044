// # Change Trigger Trait
//
// Defines event sources that ask the engine for a reconciliation pass.
//
// ## Implementations
//
// - Host directory watcher: `tunsync-trigger-dir` crate
// - Periodic resync: `tunsync_core::trigger::IntervalTrigger`
// - Manual: `tunsync_core::trigger::ManualTrigger`

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use tokio_stream::Stream;

/// Stream of change events consumed by the engine
pub type TriggerStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send + 'static>>;

/// Why a reconciliation pass was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A backend directory appeared
    BackendAdded { path: PathBuf },

    /// A backend directory disappeared
    BackendRemoved { path: PathBuf },

    /// Periodic resync tick
    Resync,

    /// Explicit request
    Manual { reason: String },
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::BackendAdded { path } => write!(f, "backend added at {}", path.display()),
            ChangeEvent::BackendRemoved { path } => {
                write!(f, "backend removed at {}", path.display())
            }
            ChangeEvent::Resync => f.write_str("periodic resync"),
            ChangeEvent::Manual { reason } => write!(f, "manual ({})", reason),
        }
    }
}

/// Trait for change trigger implementations
///
/// Triggers only observe; they never reconcile themselves. Spawned tasks
/// must stop once the returned stream is dropped.
pub trait ChangeTrigger: Send + Sync {
    /// Watch for changes
    ///
    /// The stream should run indefinitely under normal conditions.
    fn watch(&self) -> TriggerStream;

    /// Get the trigger name (for logging/debugging)
    fn trigger_name(&self) -> &'static str;
}
