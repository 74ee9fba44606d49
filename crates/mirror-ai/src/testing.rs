//! Scripted `Generator` doubles for unit and integration tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;

use crate::content::GenerateCall;
use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::provider::{ChunkStream, Generator, TextChunk};

/// Behavior of one queued `stream()` call.
#[derive(Clone, Debug)]
pub enum StreamScript {
    /// Opening the stream fails.
    OpenError(ProviderError),
    /// Yields the items, then ends.
    Items(Vec<Result<TextChunk, ProviderError>>),
    /// Yields the chunks, then never produces another item.
    Stall(Vec<TextChunk>),
}

impl StreamScript {
    /// Yields each text as a chunk, then ends.
    pub fn chunks<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Items(texts.into_iter().map(|t| Ok(TextChunk::new(t))).collect())
    }
}

/// FIFO-scripted generator that records every call it receives.
pub struct ScriptedGenerator {
    id: ProviderId,
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    calls: Mutex<Vec<GenerateCall>>,
    closed_streams: Arc<AtomicUsize>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            id: ProviderId::new("scripted"),
            responses: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            closed_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues a successful single-shot response.
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push_response(Ok(text.into()));
        self
    }

    /// Queues a failed single-shot call.
    pub fn with_error(self, err: ProviderError) -> Self {
        self.push_response(Err(err));
        self
    }

    /// Queues the behavior of the next `stream()` call.
    pub fn with_stream(self, script: StreamScript) -> Self {
        lock(&self.streams).push_back(script);
        self
    }

    /// Every call received so far, in order (single-shot and streaming).
    pub fn calls(&self) -> Vec<GenerateCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of opened token streams that have since been dropped.
    pub fn closed_streams(&self) -> usize {
        self.closed_streams.load(Ordering::SeqCst)
    }

    fn push_response(&self, response: Result<String, ProviderError>) {
        lock(&self.responses).push_back(response);
    }
}

#[async_trait::async_trait]
impl Generator for ScriptedGenerator {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn generate(&self, call: GenerateCall) -> Result<String, ProviderError> {
        lock(&self.calls).push(call);
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::protocol(self.id.clone(), "script exhausted")))
    }

    async fn stream(&self, call: GenerateCall) -> Result<ChunkStream, ProviderError> {
        lock(&self.calls).push(call);
        let script = lock(&self.streams)
            .pop_front()
            .unwrap_or_else(|| StreamScript::OpenError(ProviderError::protocol(
                self.id.clone(),
                "stream script exhausted",
            )));
        let (items, stall) = match script {
            StreamScript::OpenError(err) => return Err(err),
            StreamScript::Items(items) => (items, false),
            StreamScript::Stall(chunks) => (chunks.into_iter().map(Ok).collect(), true),
        };
        Ok(Box::pin(TrackedStream {
            items: items.into(),
            stall,
            closed: self.closed_streams.clone(),
        }))
    }
}

struct TrackedStream {
    items: VecDeque<Result<TextChunk, ProviderError>>,
    stall: bool,
    closed: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = Result<TextChunk, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.items.pop_front() {
            Some(item) => Poll::Ready(Some(item)),
            None if self.stall => Poll::Pending,
            None => Poll::Ready(None),
        }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
