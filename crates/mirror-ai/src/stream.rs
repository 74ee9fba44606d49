use serde_json::json;

/// Content type of the framed reply protocol.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Content type of the pre-stream JSON fallback.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// One event of a streamed turn.
///
/// Every started turn yields `Start`, zero or more `Delta`s, then exactly one
/// of `Error` or `Done`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// First event of every turn.
    Start,
    /// Incremental reply text.
    Delta { text: String },
    /// Terminal failure.
    Error { message: String },
    /// Terminal success carrying the authoritative full reply.
    Done { reply: String },
}

impl StreamEvent {
    /// Event name written to the `event:` line.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Delta { .. } => "delta",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// JSON payload written to the `data:` line.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Start => json!({ "ok": true }),
            Self::Delta { text } => json!({ "text": text }),
            Self::Error { message } => json!({ "message": message }),
            Self::Done { reply } => json!({ "reply": reply }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }

    /// Encodes the event as one frame: `event: <kind>\ndata: <json>\n\n`.
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.kind(), self.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_match_wire_shapes() {
        assert_eq!(StreamEvent::Start.to_frame(), "event: start\ndata: {\"ok\":true}\n\n");
        assert_eq!(
            StreamEvent::Delta { text: "Hel\nlo".into() }.to_frame(),
            "event: delta\ndata: {\"text\":\"Hel\\nlo\"}\n\n"
        );
        assert_eq!(
            StreamEvent::Done { reply: "Hello".into() }.to_frame(),
            "event: done\ndata: {\"reply\":\"Hello\"}\n\n"
        );
        assert!(StreamEvent::Error { message: "x".into() }.is_terminal());
        assert!(!StreamEvent::Start.is_terminal());
    }
}
