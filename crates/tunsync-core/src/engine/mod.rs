//! Core reconciliation engine
//!
//! The SyncEngine is responsible for:
//! - Fetching the desired backends from the BackendSource
//! - Listing the managed records from the RecordStore
//! - Planning and applying the minimal create/update/delete set
//! - Replacing the tunnel ingress with the full rule list
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐
//! │ ChangeTrigger │─── ChangeEvent ───┐
//! └───────────────┘                   │
//!                                     ▼
//!                            ┌──────────────┐
//!                            │  SyncEngine  │
//!                            └──────────────┘
//!                                     │
//!         ┌───────────────────────────┼───────────────────────────┐
//!         │                           │                           │
//!         ▼                           ▼                           ▼
//! ┌───────────────┐          ┌──────────────┐            ┌─────────────┐
//! │ BackendSource │          │ RecordStore  │            │   Events    │
//! │ (desired)     │          │ (actual)     │            │  (notify)   │
//! └───────────────┘          └──────────────┘            └─────────────┘
//! ```
//!
//! ## Pass Flow
//!
//! 1. Fetch desired backends; on failure skip the pass without mutating
//! 2. List managed records under the zone suffix
//! 3. Plan: orphan deletes, then per-backend CNAME/TXT create-or-update
//! 4. Apply each action; a failed action is recorded and the pass goes on
//! 5. Replace the tunnel ingress with dashboard + backends + catch-all
//!
//! ## Serialization
//!
//! [`SyncEngine::run`] consumes triggers one at a time. Events that arrive
//! while a pass is running, or within the debounce window after the event
//! that started it, are folded into a single follow-up pass.

pub mod plan;

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::{SyncConfig, ZoneConfig};
use crate::error::{Error, Result};
use crate::model::{DesiredState, RecordFilter, RecordSpec, RecordType, TunnelIdentity};
use crate::traits::{BackendSource, ChangeEvent, RecordStore, TriggerStream};

pub use plan::{PassPlan, RecordAction, plan_pass};

/// Kind of remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    Create,
    Update,
    Delete,
    ReplaceIngress,
}

impl std::fmt::Display for RecordOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RecordOp::Create => "create",
            RecordOp::Update => "update",
            RecordOp::Delete => "delete",
            RecordOp::ReplaceIngress => "replace ingress",
        })
    }
}

/// A single failed operation within a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub op: RecordOp,
    /// None for the ingress replacement
    pub record_type: Option<RecordType>,
    /// Record hostname, or the tunnel id for the ingress replacement
    pub name: String,
    pub reason: String,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Backends in the desired state after port de-duplication
    pub desired_backends: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failures: Vec<OperationFailure>,
    /// Number of ingress rules sent
    pub ingress_rules: usize,
    pub ingress_applied: bool,
}

impl PassReport {
    /// True when every operation of the pass succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.ingress_applied
    }

    /// Successful record creates, updates and deletes
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine loop started
    Started,

    /// A pass began
    PassStarted { trigger: String },

    /// A pass was abandoned before any mutation
    PassSkipped { reason: String },

    RecordCreated { record_type: RecordType, name: String },

    RecordUpdated {
        record_type: RecordType,
        name: String,
        id: String,
    },

    RecordDeleted {
        record_type: RecordType,
        name: String,
        id: String,
    },

    /// A single operation failed; the pass continued
    OperationFailed(OperationFailure),

    /// Tunnel ingress replaced
    IngressApplied { rules: usize },

    /// A pass ran to its end
    PassCompleted {
        created: usize,
        updated: usize,
        deleted: usize,
        failed: usize,
    },

    /// Engine loop stopped
    Stopped { reason: String },
}

/// Core reconciliation engine
///
/// ## Lifecycle
///
/// 1. Provision the tunnel via [`RecordStore::get_or_create_tunnel`]
/// 2. Create with [`SyncEngine::new()`], injecting the tunnel identity
/// 3. Optionally [`SyncEngine::ensure_dashboard_record()`] and [`SyncEngine::sync_once()`]
/// 4. Drive with [`SyncEngine::run()`] until shutdown
///
/// ## Threading
///
/// Passes never overlap: `run` awaits each pass before reading the next
/// trigger, and the tunnel identity is immutable after construction.
pub struct SyncEngine {
    store: Box<dyn RecordStore>,

    source: Box<dyn BackendSource>,

    zone: ZoneConfig,

    /// Read-only for the engine's lifetime
    tunnel: TunnelIdentity,

    /// Window for folding trigger bursts into one pass
    debounce: Duration,

    event_tx: mpsc::Sender<EngineEvent>,
}

impl SyncEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        store: Box<dyn RecordStore>,
        source: Box<dyn BackendSource>,
        tunnel: TunnelIdentity,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        if tunnel.id.is_empty() {
            return Err(Error::provisioning("Tunnel identity has no id"));
        }

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            store,
            source,
            zone: config.zone,
            tunnel,
            debounce: Duration::from_millis(config.engine.trigger_debounce_ms),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Identity of the tunnel this engine routes through
    pub fn tunnel(&self) -> &TunnelIdentity {
        &self.tunnel
    }

    /// Upsert the dashboard CNAME
    ///
    /// Looks the record up by exact name; updates it in place when content
    /// or tag differ, creates it when absent, and issues no write when it is
    /// already correct.
    pub async fn ensure_dashboard_record(&self) -> Result<()> {
        let name = self.zone.dashboard_hostname();
        let spec = RecordSpec::tunnel_cname(
            name.as_str(),
            &self.tunnel.id,
            self.zone.dashboard_record_tag.as_str(),
        );

        let filter = RecordFilter::new()
            .name_exact(name.as_str())
            .record_type(RecordType::Cname);
        let existing = self.store.list_records(&filter).await?;

        match existing.first() {
            Some(record) if spec.is_satisfied_by(record) => {
                debug!("Dashboard record {} already points at the tunnel", name);
            }
            Some(record) => {
                info!("Updating CNAME record for {}", name);
                self.store.update_record(&record.id, &spec).await?;
                self.emit_event(EngineEvent::RecordUpdated {
                    record_type: RecordType::Cname,
                    name,
                    id: record.id.clone(),
                });
            }
            None => {
                info!("Creating CNAME record for {}", name);
                self.store.create_record(&spec).await?;
                self.emit_event(EngineEvent::RecordCreated {
                    record_type: RecordType::Cname,
                    name,
                });
            }
        }

        Ok(())
    }

    /// Run one full pass against freshly fetched desired state
    ///
    /// # Returns
    ///
    /// - `Ok(PassReport)`: The pass ran to its end (possibly with per-record failures)
    /// - `Err(Error)`: Desired or actual state could not be read; nothing was mutated
    pub async fn sync_once(&self) -> Result<PassReport> {
        info!(
            "Fetching backend list from {}...",
            self.source.source_name()
        );

        let backends = match self.source.fetch_backends().await {
            Ok(backends) => backends,
            Err(e) => {
                // An unreachable inventory must never read as "zero backends"
                warn!("Backend source unavailable, skipping pass: {}", e);
                self.emit_event(EngineEvent::PassSkipped {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let desired = DesiredState::from_backends(backends);
        self.reconcile(&desired).await
    }

    /// Converge DNS records and tunnel ingress onto `desired`
    ///
    /// Idempotent: a second call with unchanged desired state and remote
    /// records issues no record create, update or delete.
    pub async fn reconcile(&self, desired: &DesiredState) -> Result<PassReport> {
        let started_at = Utc::now();
        info!("Updating DNS records and tunnel config...");

        let filter = RecordFilter::new()
            .name_suffix(self.zone.zone_suffix())
            .comment(self.zone.server_record_tag.as_str());

        let managed = match self.store.list_records(&filter).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not list managed records, skipping pass: {}", e);
                self.emit_event(EngineEvent::PassSkipped {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let plan = plan_pass(&self.zone, &self.tunnel, desired, &managed);
        debug!(
            "Planned {} record action(s) for {} backend(s) against {} managed record(s)",
            plan.actions.len(),
            desired.len(),
            managed.len()
        );

        let mut report = PassReport {
            started_at,
            finished_at: started_at,
            desired_backends: desired.len(),
            created: 0,
            updated: 0,
            deleted: 0,
            failures: Vec::new(),
            ingress_rules: plan.ingress.len(),
            ingress_applied: false,
        };

        for action in &plan.actions {
            self.apply_action(action, &mut report).await;
        }

        match self
            .store
            .set_tunnel_ingress(&self.tunnel.id, &plan.ingress)
            .await
        {
            Ok(()) => {
                info!(
                    "Tunnel ingress replaced with {} rule(s)",
                    plan.ingress.len()
                );
                report.ingress_applied = true;
                self.emit_event(EngineEvent::IngressApplied {
                    rules: plan.ingress.len(),
                });
            }
            Err(e) => {
                // Not retried here; the next pass rebuilds and resends the full list
                error!("Failed to replace tunnel ingress: {}", e);
                self.record_failure(
                    &mut report,
                    OperationFailure {
                        op: RecordOp::ReplaceIngress,
                        record_type: None,
                        name: self.tunnel.id.clone(),
                        reason: e.to_string(),
                    },
                );
            }
        }

        report.finished_at = Utc::now();
        info!(
            "Pass finished: {} created, {} updated, {} deleted, {} failed",
            report.created,
            report.updated,
            report.deleted,
            report.failures.len()
        );
        self.emit_event(EngineEvent::PassCompleted {
            created: report.created,
            updated: report.updated,
            deleted: report.deleted,
            failed: report.failures.len(),
        });

        Ok(report)
    }

    /// Apply one planned action, recording its outcome in `report`
    async fn apply_action(&self, action: &RecordAction, report: &mut PassReport) {
        match action {
            RecordAction::Delete(record) => {
                info!(
                    "Deleting {} record {} ({})",
                    record.record_type, record.id, record.name
                );
                match self.store.delete_record(&record.id).await {
                    Ok(()) => {
                        report.deleted += 1;
                        self.emit_event(EngineEvent::RecordDeleted {
                            record_type: record.record_type,
                            name: record.name.clone(),
                            id: record.id.clone(),
                        });
                    }
                    Err(e) => self.record_failure(
                        report,
                        OperationFailure {
                            op: RecordOp::Delete,
                            record_type: Some(record.record_type),
                            name: record.name.clone(),
                            reason: e.to_string(),
                        },
                    ),
                }
            }
            RecordAction::Create(spec) => {
                info!("Creating {} record for {}", spec.record_type, spec.name);
                match self.store.create_record(spec).await {
                    Ok(()) => {
                        report.created += 1;
                        self.emit_event(EngineEvent::RecordCreated {
                            record_type: spec.record_type,
                            name: spec.name.clone(),
                        });
                    }
                    Err(e) => self.record_failure(
                        report,
                        OperationFailure {
                            op: RecordOp::Create,
                            record_type: Some(spec.record_type),
                            name: spec.name.clone(),
                            reason: e.to_string(),
                        },
                    ),
                }
            }
            RecordAction::Update { id, spec } => {
                info!("Updating {} record for {}", spec.record_type, spec.name);
                match self.store.update_record(id, spec).await {
                    Ok(()) => {
                        report.updated += 1;
                        self.emit_event(EngineEvent::RecordUpdated {
                            record_type: spec.record_type,
                            name: spec.name.clone(),
                            id: id.clone(),
                        });
                    }
                    Err(e) => self.record_failure(
                        report,
                        OperationFailure {
                            op: RecordOp::Update,
                            record_type: Some(spec.record_type),
                            name: spec.name.clone(),
                            reason: e.to_string(),
                        },
                    ),
                }
            }
        }
    }

    fn record_failure(&self, report: &mut PassReport, failure: OperationFailure) {
        if failure.op != RecordOp::ReplaceIngress {
            warn!(
                "Failed to {} {} record for {}: {}",
                failure.op,
                failure
                    .record_type
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
                failure.name,
                failure.reason
            );
        }
        self.emit_event(EngineEvent::OperationFailed(failure.clone()));
        report.failures.push(failure);
    }

    /// Run the trigger loop until `shutdown` fires or every trigger ends
    ///
    /// A pass in flight always runs to completion before shutdown is
    /// observed.
    pub async fn run(
        &self,
        mut triggers: TriggerStream,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<()> {
        self.emit_event(EngineEvent::Started);
        info!("Listening for change triggers");

        let reason = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break "Shutdown signal";
                }

                next = triggers.next() => {
                    let Some(event) = next else {
                        warn!("All change triggers ended");
                        break "Triggers ended";
                    };

                    let coalesced = self.collect_burst(&mut triggers).await;
                    if coalesced > 0 {
                        info!("Change detected: {} (+{} coalesced)", event, coalesced);
                    } else {
                        info!("Change detected: {}", event);
                    }

                    self.run_pass(&event).await;
                }
            }
        };

        self.emit_event(EngineEvent::Stopped {
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Drain events already queued or arriving within the debounce window
    async fn collect_burst(&self, triggers: &mut TriggerStream) -> usize {
        let deadline = tokio::time::Instant::now() + self.debounce;
        let mut count = 0;

        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, triggers.next()).await {
            debug!("Coalescing trigger: {}", event);
            count += 1;
        }

        count
    }

    async fn run_pass(&self, event: &ChangeEvent) {
        self.emit_event(EngineEvent::PassStarted {
            trigger: event.to_string(),
        });

        match self.sync_once().await {
            Ok(report) if report.is_clean() => {
                debug!(
                    "Pass converged in {} ms",
                    (report.finished_at - report.started_at).num_milliseconds()
                );
            }
            Ok(report) => {
                warn!(
                    "Pass left {} operation(s) failed; the next trigger will retry",
                    report.failures.len()
                );
            }
            Err(e) => {
                error!("Reconciliation pass failed: {}", e);
            }
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody subscribed
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let now = Utc::now();
        let report = PassReport {
            started_at: now,
            finished_at: now,
            desired_backends: 2,
            created: 2,
            updated: 1,
            deleted: 1,
            failures: Vec::new(),
            ingress_rules: 4,
            ingress_applied: true,
        };
        assert_eq!(report.mutations(), 4);
        assert!(report.is_clean());

        let failed = PassReport {
            ingress_applied: false,
            ..report
        };
        assert!(!failed.is_clean());
    }

    #[test]
    fn test_record_op_display() {
        assert_eq!(RecordOp::ReplaceIngress.to_string(), "replace ingress");
        assert_eq!(RecordOp::Delete.to_string(), "delete");
    }
}
