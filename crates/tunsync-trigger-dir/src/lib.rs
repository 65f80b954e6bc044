// # Server Directory Trigger
//
// This crate watches the host's `servers/` directory and asks for a
// reconciliation pass whenever a direct child directory appears or
// disappears.
//
// ## Architecture
//
// Polls the directory at a configurable interval and diffs the set of
// child directories against the previous snapshot. Files and nested
// entries are ignored. The first snapshot is the baseline and produces
// no events; the daemon runs its startup pass separately. Taking the
// baseline with `capture_baseline` before that pass means a directory
// created while the pass runs is still reported.
//
// A missing directory reads as empty, so creating it later with servers
// inside reports them as added.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tunsync_core::traits::{ChangeEvent, ChangeTrigger, TriggerStream};

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polling watcher for backend directories
#[derive(Debug, Clone)]
pub struct ServersDirTrigger {
    /// Directory whose direct children are backends
    servers_path: PathBuf,

    /// Polling interval
    poll_interval: Duration,

    /// Snapshot taken ahead of `watch`, consumed by the first watcher
    baseline: Arc<Mutex<Option<BTreeSet<PathBuf>>>>,
}

impl ServersDirTrigger {
    pub fn new(servers_path: impl Into<PathBuf>) -> Self {
        Self::with_interval(servers_path, DEFAULT_POLL_INTERVAL)
    }

    /// Create with custom polling interval
    pub fn with_interval(servers_path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            servers_path: servers_path.into(),
            poll_interval,
            baseline: Arc::new(Mutex::new(None)),
        }
    }

    /// Snapshot the directory now and use it as the watcher's baseline
    ///
    /// Directories appearing after this call are reported once `watch`
    /// runs, however late it starts.
    pub async fn capture_baseline(&self) -> std::io::Result<usize> {
        let dirs = snapshot_dirs(&self.servers_path).await?;
        let count = dirs.len();
        *self.baseline.lock().await = Some(dirs);
        Ok(count)
    }

    pub fn servers_path(&self) -> &Path {
        &self.servers_path
    }
}

/// Read the set of direct child directories of `path`
///
/// A missing directory is an empty set; other I/O errors are returned.
async fn snapshot_dirs(path: &Path) -> std::io::Result<BTreeSet<PathBuf>> {
    let mut dirs = BTreeSet::new();

    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.insert(entry.path());
        }
    }

    Ok(dirs)
}

/// Events turning `previous` into `current`, removals first
fn diff_snapshots(previous: &BTreeSet<PathBuf>, current: &BTreeSet<PathBuf>) -> Vec<ChangeEvent> {
    let removed = previous
        .difference(current)
        .map(|path| ChangeEvent::BackendRemoved { path: path.clone() });
    let added = current
        .difference(previous)
        .map(|path| ChangeEvent::BackendAdded { path: path.clone() });
    removed.chain(added).collect()
}

impl ChangeTrigger for ServersDirTrigger {
    fn watch(&self) -> TriggerStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let servers_path = self.servers_path.clone();
        let poll_interval = self.poll_interval;
        let baseline = self.baseline.clone();

        tokio::spawn(async move {
            tracing::info!(
                "Starting server directory monitoring (path={}, interval={:?})",
                servers_path.display(),
                poll_interval
            );

            let captured = baseline.lock().await.take();
            let mut known = match captured {
                Some(dirs) => dirs,
                None => match snapshot_dirs(&servers_path).await {
                    Ok(dirs) => dirs,
                    Err(e) => {
                        tracing::warn!("Failed to read {}: {}", servers_path.display(), e);
                        BTreeSet::new()
                    }
                },
            };

            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("Receiver dropped, stopping directory monitor");
                        break;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }

                let current = match snapshot_dirs(&servers_path).await {
                    Ok(dirs) => dirs,
                    Err(e) => {
                        // Keep the last snapshot so a transient error is not
                        // reported as every backend disappearing.
                        tracing::warn!("Failed to read {}: {}", servers_path.display(), e);
                        continue;
                    }
                };

                for event in diff_snapshots(&known, &current) {
                    tracing::info!("Server directory change: {}", event);
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                known = current;
            }
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    fn trigger_name(&self) -> &'static str {
        "servers-dir"
    }
}
