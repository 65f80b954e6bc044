// # Built-in Change Triggers
//
// Timer and manual triggers. The filesystem trigger lives in its own crate.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{IntervalStream, UnboundedReceiverStream};

use crate::traits::{ChangeEvent, ChangeTrigger, TriggerStream};

/// Emits [`ChangeEvent::Resync`] every `period`, first tick after one period
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    period: Duration,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl ChangeTrigger for IntervalTrigger {
    fn watch(&self) -> TriggerStream {
        let start = tokio::time::Instant::now() + self.period;
        let mut interval = tokio::time::interval_at(start, self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        Box::pin(IntervalStream::new(interval).map(|_| ChangeEvent::Resync))
    }

    fn trigger_name(&self) -> &'static str {
        "interval"
    }
}

/// Trigger fired through a [`ManualTriggerHandle`]
///
/// `watch()` hands out the underlying receiver once; later calls get a
/// stream that never yields.
pub struct ManualTrigger {
    rx: Mutex<Option<mpsc::UnboundedReceiver<ChangeEvent>>>,
}

/// Sending half of a [`ManualTrigger`]
#[derive(Debug, Clone)]
pub struct ManualTriggerHandle {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ManualTrigger {
    /// Create a trigger and the handle that fires it
    pub fn new() -> (Self, ManualTriggerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            ManualTriggerHandle { tx },
        )
    }
}

impl ChangeTrigger for ManualTrigger {
    fn watch(&self) -> TriggerStream {
        let rx = self.rx.lock().ok().and_then(|mut slot| slot.take());
        match rx {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => {
                tracing::warn!("Manual trigger already watched; returning an idle stream");
                Box::pin(tokio_stream::pending())
            }
        }
    }

    fn trigger_name(&self) -> &'static str {
        "manual"
    }
}

impl ManualTriggerHandle {
    /// Request a pass; returns false once the watching side is gone
    pub fn fire(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(ChangeEvent::Manual {
                reason: reason.into(),
            })
            .is_ok()
    }

    /// Push an arbitrary event into the stream
    pub fn send(&self, event: ChangeEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Merge several triggers into one stream
pub fn merge_triggers(triggers: &[Box<dyn ChangeTrigger>]) -> TriggerStream {
    let mut merged: TriggerStream = Box::pin(tokio_stream::pending());
    for trigger in triggers {
        tracing::debug!("Watching trigger {}", trigger.trigger_name());
        merged = Box::pin(merged.merge(trigger.watch()));
    }
    merged
}
