//! Client-side reader for streamed turns.
//!
//! Folds framed events into exactly one assistant message per turn, or renders
//! the plain JSON object the server returns when it refuses to open a stream.

use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt as _};
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::sse::{Frame, FrameDecoder};
use crate::stream::{EVENT_STREAM_CONTENT_TYPE, JSON_CONTENT_TYPE};

const STREAM_FAILED: &str = "Failed to stream assistant reply.";
const SAFETY_FALLBACK: &str = "Safety notice triggered";
const GENERIC_ERROR: &str = "Sorry, something went wrong.";
/// Shown when the connection fails underneath the reader.
pub const TRANSPORT_ERROR: &str = "Sorry, something went wrong. Please try again.";

/// Display label attached to a non-regular assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLabel {
    SafetyNotice,
    Error,
}

impl MessageLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SafetyNotice => "Safety Notice",
            Self::Error => "Error",
        }
    }
}

/// Local transcript entry for the assistant side of the current turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistantMessage {
    pub content: String,
    pub streaming: bool,
    pub label: Option<MessageLabel>,
}

impl AssistantMessage {
    /// Empty entry in streaming state, as created on `start`.
    pub fn placeholder() -> Self {
        Self {
            content: String::new(),
            streaming: true,
            label: None,
        }
    }

    fn labelled(content: impl Into<String>, label: MessageLabel) -> Self {
        Self {
            content: content.into(),
            streaming: false,
            label: Some(label),
        }
    }
}

/// Folds frames into the current turn's message.
#[derive(Debug)]
pub struct ReplyFold {
    message: AssistantMessage,
    terminal: bool,
}

impl Default for ReplyFold {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyFold {
    pub fn new() -> Self {
        Self {
            message: AssistantMessage::placeholder(),
            terminal: false,
        }
    }

    pub fn message(&self) -> &AssistantMessage {
        &self.message
    }

    /// Whether a `done` or `error` frame has been applied.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Applies one frame. Returns `true` when the message changed.
    ///
    /// Frames after a terminal event and unknown event kinds are ignored.
    pub fn apply(&mut self, frame: &Frame) -> bool {
        if self.terminal {
            return false;
        }
        let payload = frame.payload();
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        match frame.event.as_str() {
            "start" => {
                self.message = AssistantMessage::placeholder();
            }
            "delta" => {
                let Some(text) = field("text") else {
                    return false;
                };
                self.message.content.push_str(&text);
                self.message.streaming = true;
            }
            "error" => {
                self.message.content = field("message").unwrap_or_else(|| STREAM_FAILED.into());
                self.message.label = Some(MessageLabel::Error);
                self.message.streaming = false;
                self.terminal = true;
            }
            "done" => {
                if let Some(reply) = field("reply") {
                    self.message.content = reply;
                }
                self.message.streaming = false;
                self.terminal = true;
            }
            other => {
                debug!(event = other, "ignoring unknown frame");
                return false;
            }
        }
        true
    }

    /// Ends the turn. Without a terminal event, partial content is kept.
    pub fn finish(mut self) -> AssistantMessage {
        if !self.terminal {
            debug!(chars = self.message.content.len(), "stream ended without terminal event");
        }
        self.message.streaming = false;
        self.message
    }

    fn fail_transport(&mut self) {
        self.message = AssistantMessage::labelled(TRANSPORT_ERROR, MessageLabel::Error);
        self.terminal = true;
    }
}

/// Plain JSON object returned instead of an event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FallbackReply {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub safe_block: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FallbackReply {
    pub fn safety_notice(message: impl Into<String>) -> Self {
        Self {
            safe_block: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Renders the object as a finished assistant message.
    pub fn render(&self) -> AssistantMessage {
        let non_empty = |s: &Option<String>| s.clone().filter(|s| !s.is_empty());
        if self.safe_block {
            return AssistantMessage::labelled(
                non_empty(&self.message).unwrap_or_else(|| SAFETY_FALLBACK.into()),
                MessageLabel::SafetyNotice,
            );
        }
        AssistantMessage::labelled(
            non_empty(&self.error)
                .or_else(|| non_empty(&self.message))
                .unwrap_or_else(|| GENERIC_ERROR.into()),
            MessageLabel::Error,
        )
    }
}

/// Reads one turn's response body.
///
/// The content type decides the path before any byte is parsed: the framed
/// protocol is folded frame by frame (calling `on_update` after each change),
/// a JSON object is rendered directly.
pub async fn read_reply<S, E, F>(
    content_type: Option<&str>,
    mut body: S,
    mut on_update: F,
) -> Result<AssistantMessage, ClientError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
    F: FnMut(&AssistantMessage),
{
    let content_type = content_type.unwrap_or_default();

    if content_type.contains(JSON_CONTENT_TYPE) {
        let mut raw = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ClientError::Transport(e.to_string()))?;
            raw.extend_from_slice(&chunk);
        }
        let fallback: FallbackReply = serde_json::from_slice(&raw)
            .map_err(|e| ClientError::InvalidFallback(e.to_string()))?;
        let message = fallback.render();
        on_update(&message);
        return Ok(message);
    }

    if !content_type.starts_with(EVENT_STREAM_CONTENT_TYPE) {
        return Err(ClientError::UnexpectedContentType(content_type.to_string()));
    }

    let mut decoder = FrameDecoder::new();
    let mut fold = ReplyFold::new();
    on_update(fold.message());
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, "reply stream failed mid-turn");
                fold.fail_transport();
                on_update(fold.message());
                break;
            }
        };
        for frame in decoder.push_chunk(&chunk) {
            if fold.apply(&frame) {
                on_update(fold.message());
            }
        }
    }

    let terminal = fold.is_terminal();
    let message = fold.finish();
    if !terminal {
        on_update(&message);
    }
    Ok(message)
}
