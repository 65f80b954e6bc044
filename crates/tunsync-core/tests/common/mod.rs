//! Test doubles and common utilities for reconciliation contract tests
//!
//! The record store side is covered by `MemoryRecordStore`; this module adds
//! a controllable backend source and config helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tunsync_core::config::{EngineConfig, SyncConfig, TunnelConfig, ZoneConfig};
use tunsync_core::error::{Error, Result};
use tunsync_core::model::{BackendService, DnsRecord, RecordType, TunnelIdentity};
use tunsync_core::store::MemoryRecordStore;
use tunsync_core::traits::BackendSource;
use tunsync_core::{EngineEvent, SyncEngine};

pub const DOMAIN: &str = "example.com";
pub const SERVER_TAG: &str = "mc-server";
pub const DASHBOARD_TAG: &str = "mc-dashboard";
pub const TUNNEL_ID: &str = "abc123";

/// A backend source whose answer the test controls
///
/// Clones share state, so a test can keep one clone while the engine owns
/// another.
#[derive(Clone, Default)]
pub struct ControlledBackendSource {
    backends: Arc<Mutex<Vec<BackendService>>>,
    unavailable: Arc<AtomicBool>,
    fetch_count: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    delay: Arc<Mutex<Duration>>,
}

impl ControlledBackendSource {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let source = Self::default();
        source.set_backends(pairs);
        source
    }

    pub fn set_backends(&self, pairs: &[(&str, &str)]) {
        *self.backends.lock().unwrap() = pairs
            .iter()
            .map(|(id, port)| BackendService::new(*id, *port))
            .collect();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every fetch take `delay` (to widen the window for overlap)
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent fetches observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BackendSource for ControlledBackendSource {
    async fn fetch_backends(&self) -> Result<Vec<BackendService>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::transport("inventory", "connection refused"));
        }
        Ok(self.backends.lock().unwrap().clone())
    }

    fn source_name(&self) -> &'static str {
        "controlled"
    }
}

/// Minimal valid configuration for tests
pub fn test_config() -> SyncConfig {
    SyncConfig {
        zone: ZoneConfig::new(DOMAIN, "panel", SERVER_TAG, DASHBOARD_TAG),
        tunnel: TunnelConfig {
            name: "home".to_string(),
        },
        engine: EngineConfig {
            trigger_debounce_ms: 20,
            event_channel_capacity: 1000,
            resync_interval_secs: 0,
        },
    }
}

pub fn test_tunnel() -> TunnelIdentity {
    TunnelIdentity::new(TUNNEL_ID, "token")
}

/// Build an engine over clones of `store` and `source`
pub fn engine_with(
    store: &MemoryRecordStore,
    source: &ControlledBackendSource,
) -> (SyncEngine, tokio::sync::mpsc::Receiver<EngineEvent>) {
    SyncEngine::new(
        Box::new(store.clone()),
        Box::new(source.clone()),
        test_tunnel(),
        test_config(),
    )
    .expect("engine construction succeeds")
}

/// A managed record as the remote store would report it
pub fn managed_record(id: &str, record_type: RecordType, port: &str, content: &str) -> DnsRecord {
    DnsRecord {
        id: id.to_string(),
        record_type,
        name: format!("{}.{}", port, DOMAIN),
        content: content.to_string(),
        comment: Some(SERVER_TAG.to_string()),
        proxied: Some(record_type == RecordType::Cname),
    }
}

/// Sorted port keys of the managed records of each type
pub fn managed_ports(records: &[DnsRecord], record_type: RecordType) -> Vec<String> {
    let suffix = format!(".{}", DOMAIN);
    let mut ports: Vec<String> = records
        .iter()
        .filter(|r| r.record_type == record_type && r.comment.as_deref() == Some(SERVER_TAG))
        .filter_map(|r| r.name.strip_suffix(suffix.as_str()).map(str::to_string))
        .collect();
    ports.sort();
    ports
}

/// Drain every event currently buffered
pub fn drain_events(rx: &mut tokio::sync::mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
