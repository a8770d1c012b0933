use crate::error::{EventBusError, SessionFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur in the scanner system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScannerEvent {
    /// A scan session started acquiring a camera
    SessionStarted { timestamp: DateTime<Utc> },
    /// A QR payload was decoded from the camera stream
    PayloadDecoded {
        scan_id: Uuid,
        text: String,
        hyperlink: bool,
        timestamp: DateTime<Utc>,
    },
    /// The active scan session was stopped by the caller
    SessionStopped { timestamp: DateTime<Utc> },
    /// The active scan session failed
    SessionFailed {
        kind: SessionFailure,
        timestamp: DateTime<Utc>,
    },
    /// A decoded payload was appended to the persistent history
    HistoryRecorded {
        entry_id: Uuid,
        total_entries: usize,
        timestamp: DateTime<Utc>,
    },
}

impl ScannerEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ScannerEvent::SessionStarted { timestamp } => *timestamp,
            ScannerEvent::PayloadDecoded { timestamp, .. } => *timestamp,
            ScannerEvent::SessionStopped { timestamp } => *timestamp,
            ScannerEvent::SessionFailed { timestamp, .. } => *timestamp,
            ScannerEvent::HistoryRecorded { timestamp, .. } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ScannerEvent::SessionStarted { .. } => "Scan session started".to_string(),
            ScannerEvent::PayloadDecoded {
                text, hyperlink, ..
            } => {
                format!(
                    "Payload decoded ({} chars{})",
                    text.len(),
                    if *hyperlink { ", hyperlink" } else { "" }
                )
            }
            ScannerEvent::SessionStopped { .. } => "Scan session stopped".to_string(),
            ScannerEvent::SessionFailed { kind, .. } => {
                format!("Scan session failed: {}", kind)
            }
            ScannerEvent::HistoryRecorded { total_entries, .. } => {
                format!("History recorded ({} entries)", total_entries)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ScannerEvent::SessionStarted { .. } => "session_started",
            ScannerEvent::PayloadDecoded { .. } => "payload_decoded",
            ScannerEvent::SessionStopped { .. } => "session_stopped",
            ScannerEvent::SessionFailed { .. } => "session_failed",
            ScannerEvent::HistoryRecorded { .. } => "history_recorded",
        }
    }
}

/// Event bus for component coordination using broadcast channels.
///
/// `publish` is synchronous: the result sink contract requires the decoded
/// payload to be handed off before control returns to the scheduling tick,
/// and `broadcast::Sender::send` never suspends.
pub struct EventBus {
    sender: broadcast::Sender<ScannerEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ScannerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: ScannerEvent) -> Result<usize, EventBusError> {
        match &event {
            ScannerEvent::PayloadDecoded {
                hyperlink,
                text,
                ..
            } => {
                info!(
                    hyperlink = *hyperlink,
                    chars = text.len(),
                    "QR payload decoded"
                );
            }
            ScannerEvent::SessionFailed { kind, .. } => {
                error!("Scan session failed: {}", kind);
            }
            ScannerEvent::SessionStopped { .. } => {
                info!("Scan session stopped");
            }
            _ => {
                debug!("Event: {}", event.description());
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish an event, tolerating the absence of subscribers.
    ///
    /// A bus with no receivers is normal during startup and teardown.
    pub fn publish_lossy(&self, event: ScannerEvent) {
        if let Err(e) = self.publish(event) {
            warn!("Event dropped: {}", e);
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}
