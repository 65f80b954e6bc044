//! Core traits for the reconciliation system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`RecordStore`]: DNS record and tunnel management API
//! - [`BackendSource`]: Desired backend services
//! - [`ChangeTrigger`]: Events that request a reconciliation pass

pub mod backend_source;
pub mod change_trigger;
pub mod record_store;

pub use backend_source::BackendSource;
pub use change_trigger::{ChangeEvent, ChangeTrigger, TriggerStream};
pub use record_store::RecordStore;
