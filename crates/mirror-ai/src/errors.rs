use crate::model::{ProviderId, TaskId};
use crate::retry::{Attempt, AttemptOutcome};

/// Errors returned by an upstream generator before they are classified by
/// the retry engine or the turn controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider returned an application-level failure (HTTP status, auth, etc.).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// Provider response envelope or event sequencing was invalid.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

impl ProviderError {
    /// Creates a provider-level error.
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the provider associated with this error.
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Protocol { provider, .. } => provider,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// Configuration and builder-input errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MirrorError {
    /// Invalid client/provider configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid input to a builder API.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Failure class of one structured-output attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The upstream call itself failed.
    Transport,
    /// The response was not one JSON value.
    Parse,
    /// Well-formed JSON with the wrong shape.
    Validation,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Transport => "transport",
            Self::Parse => "parse",
            Self::Validation => "validation",
        })
    }
}

/// Terminal failure of the structured-output retry engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    /// The request carried no schema, so there is nothing to validate against.
    #[error("task {task} has no output schema")]
    MissingSchema { task: TaskId },
    /// Every attempt in the budget failed.
    #[error("task {task} failed after {} attempts ({})", .attempts.len(), last_failure_summary(.attempts))]
    Exhausted { task: TaskId, attempts: Vec<Attempt> },
}

impl GenerationError {
    /// Returns the last recorded attempt, if any attempt was made.
    pub fn last_attempt(&self) -> Option<&Attempt> {
        match self {
            Self::MissingSchema { .. } => None,
            Self::Exhausted { attempts, .. } => attempts.last(),
        }
    }

    /// Returns the failure class of the last attempt.
    pub fn failure_class(&self) -> Option<FailureClass> {
        self.last_attempt().map(|attempt| attempt.outcome.failure_class())
    }

    /// Number of upstream calls made before giving up.
    pub fn attempt_count(&self) -> usize {
        match self {
            Self::MissingSchema { .. } => 0,
            Self::Exhausted { attempts, .. } => attempts.len(),
        }
    }
}

fn last_failure_summary(attempts: &[Attempt]) -> String {
    match attempts.last() {
        Some(attempt) => format!(
            "{}: {}",
            attempt.outcome.failure_class(),
            attempt.outcome.detail()
        ),
        None => "no attempts".into(),
    }
}

impl AttemptOutcome {
    /// Classifies the failure for diagnostics.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::TransportFailed { .. } => FailureClass::Transport,
            Self::ParseFailed { .. } => FailureClass::Parse,
            Self::ValidationFailed { .. } => FailureClass::Validation,
        }
    }
}

/// Failure of a catalog task: the request could not be built, or generation
/// did not produce a valid result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Request(#[from] MirrorError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Errors surfaced before a turn's event stream is opened.
///
/// Nothing has been committed to the inbound connection yet, so callers may
/// still answer with a conventional error status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    /// Invalid turn input.
    #[error("validation error: {0}")]
    Validation(String),
    /// The upstream token source could not be opened.
    #[error("stream init failed: {0}")]
    StreamInit(ProviderError),
}

/// Terminal failure of a started turn, reported in-band as an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum TurnFailure {
    /// Upstream failed while chunks were being consumed.
    #[error("upstream failure: {message}")]
    Upstream { message: String },
    /// The stream ended without any usable text.
    #[error("empty reply")]
    EmptyReply,
    /// No chunk arrived within the configured idle timeout.
    #[error("upstream stalled")]
    Stalled,
    /// The reply grew past the configured length cap.
    #[error("reply exceeded {limit} characters")]
    TooLong { limit: usize },
    /// The completed turn could not be persisted.
    #[error("persistence failure: {message}")]
    Persistence { message: String },
    /// The turn was cancelled by the caller or the consumer went away.
    #[error("turn cancelled")]
    Cancelled,
    /// The turn task ended without reporting an outcome.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
}

impl TurnFailure {
    /// Message framed into the `error` event; upstream detail stays in logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::EmptyReply => "The assistant returned an empty reply. Please try again.",
            Self::Stalled | Self::TooLong { .. } => {
                "The assistant reply was interrupted. Please try again."
            }
            Self::Upstream { .. }
            | Self::Persistence { .. }
            | Self::Cancelled
            | Self::Protocol { .. } => "Failed to stream assistant reply.",
        }
    }
}

/// Transcript store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store rejected the turn: {0}")]
    Rejected(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the event stream reader and chat client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("config error: {0}")]
    Config(String),
    /// The request never produced a readable response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response content type is neither the framed protocol nor JSON.
    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),
    /// A plain JSON fallback body could not be decoded.
    #[error("invalid fallback body: {0}")]
    InvalidFallback(String),
}
