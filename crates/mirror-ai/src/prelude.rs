//! Common imports for typical usage.
pub use crate::{
    AbortHandle, AssistantMessage, BinaryPart, ChatClient, GenerationError, GenerationRequest,
    Generator, InMemoryTranscriptStore, MirrorError, ProviderError, SchemaDescriptor,
    StreamEvent, StructuredGenerator, TaskError, TranscriptStore, TurnController, TurnError,
    TurnFailure, TurnRequest, TurnStream,
};
