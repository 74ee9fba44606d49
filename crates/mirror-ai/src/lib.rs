//! Boundary layer between the reflection tool and an external generative
//! text/vision service.
//!
//! Two halves:
//! - a structured-output retry engine ([`StructuredGenerator`]) that forces a
//!   schema-valid JSON result out of a generator that may answer with
//!   malformed or non-conforming text;
//! - a streaming reply protocol: the server-side [`TurnController`] reframes
//!   a token stream as `start`, `delta`*, `error`|`done` events and persists
//!   the finished turn, and the client-side [`reader`] folds those frames
//!   back into exactly one assistant message.
//!
//! Vendor-specific APIs are namespaced under `vendors::*`.
//!
//! # Structured task (Gemini)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mirror_ai::prelude::*;
//! use mirror_ai::schema::Field;
//! use mirror_ai::vendors::gemini::GeminiProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = StructuredGenerator::new(Arc::new(GeminiProvider::from_env()?));
//!
//! let request = GenerationRequest::builder("checkin_feedback", "Confirm the action.")
//!     .schema(SchemaDescriptor::object([
//!         Field::required("feedback", SchemaDescriptor::non_empty_string()),
//!     ]))
//!     .temperature(0.5)
//!     .build()?;
//!
//! let value = engine.generate(&request).await?;
//! println!("{}", value["feedback"]);
//! # Ok(())
//! # }
//! ```

/// HTTP client for the streaming chat endpoint.
pub mod client;
/// Prompt parts and the normalized upstream call.
pub mod content;
/// Public error types.
pub mod errors;
/// Provider and task identifiers.
pub mod model;
/// Common imports for typical usage.
pub mod prelude;
/// Upstream generator contract.
pub mod provider;
pub mod reader;
/// Generation request builder.
pub mod request;
pub mod retry;
pub mod schema;
pub mod sse;
/// Streamed turn events and their wire framing.
pub mod stream;
pub mod tasks;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transcript;
pub mod turn;
/// Vendor-specific integrations.
pub mod vendors;

pub use client::{ChatClient, ChatGoal, ChatTurnRequest};
pub use content::{BinaryPart, GenerateCall, InputPart};
pub use errors::{
    ClientError, FailureClass, GenerationError, MirrorError, ProviderError, StoreError, TaskError,
    TurnError, TurnFailure,
};
pub use model::{ProviderId, TaskId};
pub use provider::{ChunkStream, Generator, TextChunk};
pub use reader::{AssistantMessage, FallbackReply, MessageLabel, ReplyFold, read_reply};
pub use request::{GenerationRequest, GenerationRequestBuilder};
pub use retry::{Attempt, AttemptOutcome, StructuredGenerator};
pub use schema::{CompiledSchema, Field, SchemaDescriptor, ValidationIssue};
pub use sse::{Frame, FrameDecoder};
pub use stream::StreamEvent;
pub use transcript::{InMemoryTranscriptStore, Role, TranscriptEntry, TranscriptStore, TurnRecord};
pub use turn::{
    AbortHandle, DeltaCursor, TurnController, TurnOptions, TurnReply, TurnRequest, TurnStream,
};
