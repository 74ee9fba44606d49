use std::pin::Pin;

use futures::Stream;

use crate::content::GenerateCall;
use crate::errors::ProviderError;
use crate::model::ProviderId;

/// Canonical chunk shape produced by every vendor adapter.
///
/// Whether `text` is a cumulative snapshot or an increment is unknown to the
/// adapter; the turn controller resolves that with its delta cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
}

impl TextChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Boxed asynchronous token source. Dropping it closes the upstream stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<TextChunk, ProviderError>> + Send>>;

/// Upstream generator collaborator.
///
/// Construct one implementation explicitly and pass it (as
/// `Arc<dyn Generator>`) into the retry engine and the turn controller.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Stable provider identifier.
    fn id(&self) -> ProviderId;

    /// Performs one single-shot call and returns the raw response text.
    async fn generate(&self, call: GenerateCall) -> Result<String, ProviderError>;

    /// Opens a token stream for a conversational reply.
    async fn stream(&self, call: GenerateCall) -> Result<ChunkStream, ProviderError>;
}
