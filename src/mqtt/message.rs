use chrono::NaiveDateTime;
use std::fmt;

/// A PUBLISH received from the broker, stamped with the local receive time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.payload.chars().take(32).collect();
        let ellipsis = if preview.len() < self.payload.len() {
            "..."
        } else {
            ""
        };
        write!(
            f,
            "{} - {}: {}{}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.topic,
            preview,
            ellipsis
        )
    }
}

impl InboundMessage {
    pub fn from_topic(topic: String, payload: String) -> Self {
        InboundMessage {
            topic,
            payload,
            timestamp: chrono::Local::now().naive_local(),
        }
    }
}
