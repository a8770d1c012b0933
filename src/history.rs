use crate::error::HistoryError;
use crate::events::{EventBus, ScannerEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One successful scan, as persisted to the history file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

/// Bounded, newest-first log of successful scans, persisted as JSON.
///
/// The file is read once at startup and rewritten on every append. The log
/// is anonymous and capped; appending beyond capacity drops the oldest
/// entries.
pub struct ScanHistory {
    path: PathBuf,
    capacity: usize,
    entries: RwLock<Vec<HistoryEntry>>,
}

impl ScanHistory {
    /// Load history from `path`, creating an empty log if the file does not
    /// exist. A file that exists but cannot be parsed degrades to an empty
    /// log with a warning rather than refusing to start.
    pub async fn load(path: impl AsRef<Path>, capacity: usize) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();

        let mut entries = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<HistoryEntry>>(&bytes) {
                Ok(entries) => {
                    info!(
                        entries = entries.len(),
                        path = %path.display(),
                        "Scan history loaded"
                    );
                    entries
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Scan history file is unreadable, starting empty"
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No scan history file yet");
                Vec::new()
            }
            Err(e) => {
                return Err(HistoryError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        entries.truncate(capacity);

        Ok(Self {
            path,
            capacity,
            entries: RwLock::new(entries),
        })
    }

    /// Append a scan to the front of the log and persist it.
    pub async fn record(
        &self,
        id: Uuid,
        text: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Result<HistoryEntry, HistoryError> {
        let entry = HistoryEntry {
            id,
            text: text.into(),
            captured_at,
        };

        let snapshot = {
            let mut entries = self.entries.write().await;
            entries.insert(0, entry.clone());
            entries.truncate(self.capacity);
            entries.clone()
        };

        self.persist(&snapshot).await?;
        debug!(total = snapshot.len(), "Scan recorded to history");
        Ok(entry)
    }

    /// Current entries, newest first.
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| HistoryError::Write {
                        path: self.path.display().to_string(),
                        source: e,
                    })?;
            }
        }

        let json = serde_json::to_vec_pretty(entries)?;
        fs::write(&self.path, json)
            .await
            .map_err(|e| HistoryError::Write {
                path: self.path.display().to_string(),
                source: e,
            })
    }
}

/// Subscribes to the event bus and appends every decoded payload to the
/// history, publishing a `HistoryRecorded` event after each append.
pub struct HistoryRecorder {
    history: Arc<ScanHistory>,
    bus: Arc<EventBus>,
}

impl HistoryRecorder {
    pub fn new(history: Arc<ScanHistory>, bus: Arc<EventBus>) -> Self {
        Self { history, bus }
    }

    /// Spawn the recorder task. It runs until the token is cancelled or the
    /// bus is closed; on cancellation it drains already-published events so
    /// a decode that raced the shutdown still reaches the history file.
    pub fn start(&self, cancellation: CancellationToken) -> tokio::task::JoinHandle<()> {
        let mut receiver = self.bus.subscribe();
        let history = Arc::clone(&self.history);
        let bus = Arc::clone(&self.bus);

        tokio::spawn(async move {
            info!("History recorder started");
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        debug!("History recorder cancelled, draining");
                        while let Ok(event) = receiver.try_recv() {
                            append_event(&history, &bus, event).await;
                        }
                        break;
                    }
                    event = receiver.recv() => match event {
                        Ok(event) => append_event(&history, &bus, event).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "History recorder lagged behind the event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            info!("History recorder stopped");
        })
    }
}

async fn append_event(history: &ScanHistory, bus: &EventBus, event: ScannerEvent) {
    let ScannerEvent::PayloadDecoded {
        scan_id,
        text,
        timestamp,
        ..
    } = event
    else {
        return;
    };

    match history.record(scan_id, text, timestamp).await {
        Ok(entry) => {
            bus.publish_lossy(ScannerEvent::HistoryRecorded {
                entry_id: entry.id,
                total_entries: history.len().await,
                timestamp: Utc::now(),
            });
        }
        Err(e) => {
            error!("Failed to record scan to history: {}", e);
        }
    }
}
