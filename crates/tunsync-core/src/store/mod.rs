// # Record Store Implementations
//
// Record stores that live inside the core crate. Remote API clients live in
// their own crates.

pub mod memory;

pub use memory::{MemoryRecordStore, StoreCall};
