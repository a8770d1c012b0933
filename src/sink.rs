use crate::events::{EventBus, ScannerEvent};
use crate::frame::DecodedPayload;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Receiver for decoded payloads.
///
/// The session calls this exactly once per successful decode, synchronously,
/// before the triggering tick returns. Side effects (presentation, history)
/// belong to implementations, not the session.
pub trait ResultSink {
    fn on_result(&mut self, payload: &DecodedPayload);
}

/// How a decoded payload should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Hyperlink,
    PlainText,
}

impl Classification {
    /// Classify payload text. Only exact lowercase `http://` and `https://`
    /// prefixes count as hyperlinks; no other scheme is recognized.
    pub fn of(text: &str) -> Self {
        if text.starts_with("http://") || text.starts_with("https://") {
            Classification::Hyperlink
        } else {
            Classification::PlainText
        }
    }

    pub fn is_hyperlink(self) -> bool {
        matches!(self, Classification::Hyperlink)
    }
}

/// Sink that publishes every payload onto the event bus for downstream
/// collaborators (presentation, history recorder).
pub struct BusSink {
    bus: Arc<EventBus>,
}

impl BusSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl ResultSink for BusSink {
    fn on_result(&mut self, payload: &DecodedPayload) {
        let classification = Classification::of(&payload.text);
        self.bus.publish_lossy(ScannerEvent::PayloadDecoded {
            scan_id: Uuid::new_v4(),
            text: payload.text.clone(),
            hyperlink: classification.is_hyperlink(),
            timestamp: Utc::now(),
        });
    }
}

/// Sink that records every payload it receives. For tests and examples.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub received: Vec<DecodedPayload>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultSink for CollectSink {
    fn on_result(&mut self, payload: &DecodedPayload) {
        self.received.push(payload.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_is_case_sensitive() {
        assert_eq!(
            Classification::of("https://example.com"),
            Classification::Hyperlink
        );
        assert_eq!(
            Classification::of("http://example.com"),
            Classification::Hyperlink
        );
        assert_eq!(
            Classification::of("HTTP://EXAMPLE.COM"),
            Classification::PlainText
        );
        assert_eq!(
            Classification::of("Https://example.com"),
            Classification::PlainText
        );
    }

    #[test]
    fn test_only_http_schemes_are_recognized() {
        assert_eq!(Classification::of("plain text"), Classification::PlainText);
        assert_eq!(
            Classification::of("ftp://example.com"),
            Classification::PlainText
        );
        assert_eq!(
            Classification::of("mailto:someone@example.com"),
            Classification::PlainText
        );
        assert_eq!(Classification::of(""), Classification::PlainText);
        // prefix match, not containment
        assert_eq!(
            Classification::of("see https://example.com"),
            Classification::PlainText
        );
    }

    #[tokio::test]
    async fn test_bus_sink_publishes_classified_payload() {
        let bus = Arc::new(EventBus::new(16));
        let mut receiver = bus.subscribe();
        let mut sink = BusSink::new(Arc::clone(&bus));

        sink.on_result(&DecodedPayload::new("https://example.com", None));

        match receiver.recv().await.unwrap() {
            ScannerEvent::PayloadDecoded {
                text, hyperlink, ..
            } => {
                assert_eq!(text, "https://example.com");
                assert!(hyperlink);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_collect_sink_records_in_order() {
        let mut sink = CollectSink::new();
        sink.on_result(&DecodedPayload::new("first", None));
        sink.on_result(&DecodedPayload::new("second", None));
        assert_eq!(sink.received.len(), 2);
        assert_eq!(sink.received[0].text, "first");
        assert_eq!(sink.received[1].text, "second");
    }
}
