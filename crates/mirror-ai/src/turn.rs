//! Streaming turn controller.
//!
//! Consumes an upstream token stream of unknown chunking discipline, reframes
//! it as `start`, `delta`*, then one of `error`/`done`, and persists the
//! completed turn exactly once.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::errors::{TurnError, TurnFailure};
use crate::model::ProviderId;
use crate::provider::{ChunkStream, Generator, TextChunk};
use crate::request::GenerationRequest;
use crate::stream::StreamEvent;
use crate::transcript::{TranscriptStore, TurnRecord};

/// Tracks the longest prefix already emitted for the current turn.
///
/// A chunk that starts with the cursor is treated as a cumulative snapshot
/// and only its suffix is emitted; anything else is treated as an increment
/// and appended. An increment that happens to repeat the whole cursor as its
/// prefix is misclassified as a snapshot.
#[derive(Clone, Debug, Default)]
pub struct DeltaCursor {
    emitted: String,
}

impl DeltaCursor {
    /// Returns the text attributable to `chunk`, or `None` when it adds nothing.
    pub fn next_delta(&mut self, chunk: &str) -> Option<String> {
        let delta = match chunk.strip_prefix(self.emitted.as_str()) {
            Some(suffix) => {
                let suffix = suffix.to_string();
                self.emitted = chunk.to_string();
                suffix
            }
            None => {
                self.emitted.push_str(chunk);
                chunk.to_string()
            }
        };
        (!delta.is_empty()).then_some(delta)
    }

    /// Full reassembled text so far.
    pub fn text(&self) -> &str {
        &self.emitted
    }
}

/// Per-controller behavior options.
#[derive(Clone, Debug)]
pub struct TurnOptions {
    /// Bounded event buffer between the turn task and the consumer.
    pub buffer_capacity: usize,
    /// Longest wait for the next upstream chunk before the turn fails.
    pub idle_timeout: Option<Duration>,
    /// Reply length cap in characters.
    pub max_reply_chars: Option<usize>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 128,
            idle_timeout: None,
            max_reply_chars: None,
        }
    }
}

/// Input for one conversational turn.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub session_id: String,
    /// Raw user message, persisted as the user side of the turn.
    pub user_message: String,
    /// Prompt sent upstream (typically built from the user message and goal).
    pub request: GenerationRequest,
}

/// Successful turn outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReply {
    pub turn_id: uuid::Uuid,
    pub reply: String,
}

/// Handle used to cancel a running turn.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Becomes visible as a terminal `error` event; nothing is persisted.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Starts streamed turns against one generator and one transcript store.
#[derive(Clone)]
pub struct TurnController {
    generator: Arc<dyn Generator>,
    store: Arc<dyn TranscriptStore>,
    options: TurnOptions,
}

impl TurnController {
    pub fn new(generator: Arc<dyn Generator>, store: Arc<dyn TranscriptStore>) -> Self {
        Self {
            generator,
            store,
            options: TurnOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TurnOptions) -> Self {
        self.options = options;
        self
    }

    /// Opens the upstream token source and spawns the turn task.
    ///
    /// Errors returned here happen before any event exists, so the caller can
    /// still answer with a conventional error status.
    pub async fn start(&self, turn: TurnRequest) -> Result<TurnStream, TurnError> {
        if turn.session_id.trim().is_empty() {
            return Err(TurnError::Validation("session id must not be empty".into()));
        }
        if turn.user_message.trim().is_empty() {
            return Err(TurnError::Validation(
                "user message must not be empty".into(),
            ));
        }
        if self.options.buffer_capacity == 0 {
            return Err(TurnError::Validation(
                "buffer_capacity must be greater than 0".into(),
            ));
        }

        let turn_id = uuid::Uuid::new_v4();
        let provider = self.generator.id();
        let chunks = self
            .generator
            .stream(turn.request.call(None))
            .await
            .map_err(|err| {
                warn!(%turn_id, session_id = %turn.session_id, %provider, error = %err, "failed to open upstream stream");
                TurnError::StreamInit(err)
            })?;

        let (tx, rx) = mpsc::channel(self.options.buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        let task = TurnTask {
            turn_id,
            provider,
            session_id: turn.session_id,
            user_message: turn.user_message,
            store: self.store.clone(),
            options: self.options.clone(),
        };
        tokio::spawn(run_turn(task, chunks, tx, final_tx, abort_rx));

        Ok(TurnStream {
            turn_id,
            rx,
            final_rx,
            abort_handle: AbortHandle { tx: abort_tx },
            saw_terminal: false,
        })
    }
}

/// Event stream of one started turn.
pub struct TurnStream {
    turn_id: uuid::Uuid,
    rx: mpsc::Receiver<StreamEvent>,
    final_rx: oneshot::Receiver<Result<TurnReply, TurnFailure>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl TurnStream {
    pub fn turn_id(&self) -> uuid::Uuid {
        self.turn_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next event. Returns `None` once the turn task is gone.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(StreamEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains remaining events and returns the turn outcome.
    pub async fn finish(mut self) -> Result<TurnReply, TurnFailure> {
        while !self.saw_terminal {
            match self.next_event().await {
                Some(_) => {}
                None => break,
            }
        }
        match self.final_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TurnFailure::Protocol {
                message: format!("turn {} ended without an outcome", self.turn_id),
            }),
        }
    }

    /// Converts the handle into a plain event stream. Dropping the stream
    /// cancels the turn.
    pub fn into_events(self) -> impl futures::Stream<Item = StreamEvent> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next_event().await.map(|event| (event, stream))
        })
    }
}

struct TurnTask {
    turn_id: uuid::Uuid,
    provider: ProviderId,
    session_id: String,
    user_message: String,
    store: Arc<dyn TranscriptStore>,
    options: TurnOptions,
}

enum Step {
    Chunk(Result<Option<TextChunk>, TurnFailure>),
    ConsumerGone,
    Aborted,
    AbortHandleDropped,
    AbortNoop,
}

async fn run_turn(
    task: TurnTask,
    mut chunks: ChunkStream,
    tx: mpsc::Sender<StreamEvent>,
    final_tx: oneshot::Sender<Result<TurnReply, TurnFailure>>,
    abort_rx: watch::Receiver<bool>,
) {
    let outcome = drive_turn(&task, &mut chunks, &tx, abort_rx).await;
    drop(chunks);
    debug!(turn_id = %task.turn_id, provider = %task.provider, ok = outcome.is_ok(), "upstream token source closed");
    let _ = final_tx.send(outcome);
}

async fn drive_turn(
    task: &TurnTask,
    chunks: &mut ChunkStream,
    tx: &mpsc::Sender<StreamEvent>,
    mut abort_rx: watch::Receiver<bool>,
) -> Result<TurnReply, TurnFailure> {
    if !send_event(tx, StreamEvent::Start).await {
        return Err(TurnFailure::Cancelled);
    }

    let mut cursor = DeltaCursor::default();
    let mut abort_open = true;
    let mut seq = 0_u64;
    loop {
        let step = tokio::select! {
            biased;
            _ = tx.closed() => Step::ConsumerGone,
            changed = abort_rx.changed(), if abort_open => match changed {
                Ok(()) if *abort_rx.borrow() => Step::Aborted,
                Ok(()) => Step::AbortNoop,
                Err(_) => Step::AbortHandleDropped,
            },
            next = next_chunk(chunks, task.options.idle_timeout) => Step::Chunk(next),
        };

        match step {
            Step::Chunk(Ok(Some(chunk))) => {
                let Some(delta) = cursor.next_delta(&chunk.text) else {
                    continue;
                };
                if let Some(limit) = task.options.max_reply_chars
                    && cursor.text().chars().count() > limit
                {
                    return fail(task, tx, TurnFailure::TooLong { limit }).await;
                }
                debug!(turn_id = %task.turn_id, provider = %task.provider, seq, "reply delta");
                seq = seq.saturating_add(1);
                if !send_event(tx, StreamEvent::Delta { text: delta }).await {
                    return Err(TurnFailure::Cancelled);
                }
            }
            Step::Chunk(Ok(None)) => break,
            Step::Chunk(Err(failure)) => return fail(task, tx, failure).await,
            Step::ConsumerGone => {
                debug!(turn_id = %task.turn_id, "consumer disconnected mid-turn");
                return Err(TurnFailure::Cancelled);
            }
            Step::Aborted => return fail(task, tx, TurnFailure::Cancelled).await,
            Step::AbortHandleDropped => abort_open = false,
            Step::AbortNoop => {}
        }
    }

    let reply = cursor.text().trim().to_string();
    if reply.is_empty() {
        return fail(task, tx, TurnFailure::EmptyReply).await;
    }

    let record = TurnRecord {
        session_id: task.session_id.clone(),
        turn_id: task.turn_id,
        user: task.user_message.clone(),
        assistant: reply.clone(),
    };
    if let Err(err) = task.store.append_turn(record).await {
        let failure = TurnFailure::Persistence {
            message: err.to_string(),
        };
        return fail(task, tx, failure).await;
    }
    debug!(turn_id = %task.turn_id, session_id = %task.session_id, chars = reply.len(), "turn persisted");

    if !send_event(tx, StreamEvent::Done { reply: reply.clone() }).await {
        debug!(turn_id = %task.turn_id, "consumer left before done; turn already persisted");
    }
    Ok(TurnReply {
        turn_id: task.turn_id,
        reply,
    })
}

async fn next_chunk(
    chunks: &mut ChunkStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<TextChunk>, TurnFailure> {
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, chunks.next())
            .await
            .map_err(|_| TurnFailure::Stalled)?,
        None => chunks.next().await,
    };
    next.transpose().map_err(|err| TurnFailure::Upstream {
        message: err.to_string(),
    })
}

async fn fail(
    task: &TurnTask,
    tx: &mpsc::Sender<StreamEvent>,
    failure: TurnFailure,
) -> Result<TurnReply, TurnFailure> {
    warn!(turn_id = %task.turn_id, session_id = %task.session_id, provider = %task.provider, %failure, "turn failed");
    let message = failure.user_message().to_string();
    let _ = send_event(tx, StreamEvent::Error { message }).await;
    Err(failure)
}

async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProviderError, StoreError};
    use crate::testing::{ScriptedGenerator, StreamScript};
    use crate::transcript::{InMemoryTranscriptStore, TranscriptEntry};

    fn deltas(chunks: &[&str]) -> (Vec<String>, String) {
        let mut cursor = DeltaCursor::default();
        let emitted = chunks.iter().filter_map(|c| cursor.next_delta(c)).collect();
        (emitted, cursor.text().to_string())
    }

    #[test]
    fn cursor_handles_cumulative_snapshots() {
        let (emitted, text) = deltas(&["Hello", "Hello world"]);
        assert_eq!(emitted, vec!["Hello", " world"]);
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn cursor_handles_incremental_chunks() {
        let (emitted, text) = deltas(&["Hel", "lo wor", "ld"]);
        assert_eq!(emitted, vec!["Hel", "lo wor", "ld"]);
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn cursor_drops_empty_deltas() {
        let (emitted, text) = deltas(&["", "Hi", "Hi", ""]);
        assert_eq!(emitted, vec!["Hi"]);
        assert_eq!(text, "Hi");
    }

    fn turn_request(message: &str) -> TurnRequest {
        TurnRequest {
            session_id: "session-1".into(),
            user_message: message.into(),
            request: GenerationRequest::builder("future_self_reply", format!("User: {message}"))
                .temperature(0.65)
                .build()
                .expect("request"),
        }
    }

    struct Fixture {
        generator: Arc<ScriptedGenerator>,
        store: Arc<InMemoryTranscriptStore>,
        controller: TurnController,
    }

    fn fixture(script: StreamScript, options: TurnOptions) -> Fixture {
        let generator = Arc::new(ScriptedGenerator::new().with_stream(script));
        let store = Arc::new(InMemoryTranscriptStore::new());
        let controller =
            TurnController::new(generator.clone(), store.clone()).with_options(options);
        Fixture {
            generator,
            store,
            controller,
        }
    }

    async fn collect(stream: &mut TurnStream) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event);
        }
        events
    }

    async fn persisted(store: &InMemoryTranscriptStore) -> Vec<TranscriptEntry> {
        store.entries("session-1").await.expect("entries")
    }

    #[tokio::test]
    async fn snapshot_stream_emits_suffix_deltas_and_persists_once() {
        let fx = fixture(
            StreamScript::chunks(["Hello", "Hello world"]),
            TurnOptions::default(),
        );
        let mut stream = fx.controller.start(turn_request("hi")).await.expect("start");

        let events = collect(&mut stream).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Start,
                StreamEvent::Delta { text: "Hello".into() },
                StreamEvent::Delta { text: " world".into() },
                StreamEvent::Done { reply: "Hello world".into() },
            ]
        );
        let reply = stream.finish().await.expect("reply");
        assert_eq!(reply.reply, "Hello world");

        let entries = persisted(&fx.store).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "hi");
        assert_eq!(entries[1].content, "Hello world");
        assert_eq!(fx.generator.closed_streams(), 1);
    }

    #[tokio::test]
    async fn upstream_failure_after_first_chunk_is_in_band_and_persists_nothing() {
        let fx = fixture(
            StreamScript::Items(vec![
                Ok(TextChunk::new("Hel")),
                Err(ProviderError::transport("scripted", "connection reset")),
                Ok(TextChunk::new("lo")),
            ]),
            TurnOptions::default(),
        );
        let mut stream = fx.controller.start(turn_request("hi")).await.expect("start");

        let events = collect(&mut stream).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::Start);
        assert_eq!(events[1], StreamEvent::Delta { text: "Hel".into() });
        assert!(matches!(&events[2], StreamEvent::Error { message } if !message.contains("connection reset")));
        assert!(matches!(stream.finish().await, Err(TurnFailure::Upstream { .. })));
        assert!(persisted(&fx.store).await.is_empty());
        assert_eq!(fx.generator.closed_streams(), 1);
    }

    #[tokio::test]
    async fn failure_before_first_chunk_still_starts_then_errors() {
        let fx = fixture(
            StreamScript::Items(vec![Err(ProviderError::provider("scripted", "quota", Some(429)))]),
            TurnOptions::default(),
        );
        let mut stream = fx.controller.start(turn_request("hi")).await.expect("start");
        let events = collect(&mut stream).await;
        assert_eq!(events[0], StreamEvent::Start);
        assert!(matches!(events[1], StreamEvent::Error { .. }));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn whitespace_reply_is_an_empty_reply_error() {
        let fx = fixture(StreamScript::chunks(["  ", "\n"]), TurnOptions::default());
        let stream = fx.controller.start(turn_request("hi")).await.expect("start");
        assert_eq!(stream.finish().await, Err(TurnFailure::EmptyReply));
        assert!(persisted(&fx.store).await.is_empty());
    }

    #[tokio::test]
    async fn done_carries_trimmed_reply() {
        let fx = fixture(StreamScript::chunks(["  Hi", " there \n"]), TurnOptions::default());
        let mut stream = fx.controller.start(turn_request("hi")).await.expect("start");
        let events = collect(&mut stream).await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done { reply: "Hi there".into() })
        );
    }

    #[tokio::test]
    async fn open_failure_is_a_start_time_error() {
        let fx = fixture(
            StreamScript::OpenError(ProviderError::provider("scripted", "bad key", Some(401))),
            TurnOptions::default(),
        );
        let err = fx.controller.start(turn_request("hi")).await;
        assert!(matches!(err, Err(TurnError::StreamInit(_))));
        assert!(persisted(&fx.store).await.is_empty());
    }

    #[tokio::test]
    async fn blank_user_message_is_rejected_without_upstream_call() {
        let fx = fixture(StreamScript::chunks(["x"]), TurnOptions::default());
        let mut request = turn_request("hi");
        request.user_message = "   ".into();
        assert!(matches!(
            fx.controller.start(request).await,
            Err(TurnError::Validation(_))
        ));
        assert_eq!(fx.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn stalled_upstream_times_out_and_closes() {
        let fx = fixture(
            StreamScript::Stall(vec![TextChunk::new("Hel")]),
            TurnOptions {
                idle_timeout: Some(Duration::from_millis(20)),
                ..TurnOptions::default()
            },
        );
        let stream = fx.controller.start(turn_request("hi")).await.expect("start");
        assert_eq!(stream.finish().await, Err(TurnFailure::Stalled));
        assert_eq!(fx.generator.closed_streams(), 1);
        assert!(persisted(&fx.store).await.is_empty());
    }

    #[tokio::test]
    async fn reply_length_cap_fails_the_turn() {
        let fx = fixture(
            StreamScript::chunks(["abc", "def"]),
            TurnOptions {
                max_reply_chars: Some(4),
                ..TurnOptions::default()
            },
        );
        let mut stream = fx.controller.start(turn_request("hi")).await.expect("start");
        let events = collect(&mut stream).await;
        assert_eq!(events[1], StreamEvent::Delta { text: "abc".into() });
        assert!(matches!(events[2], StreamEvent::Error { .. }));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn abort_emits_error_and_releases_upstream() {
        let fx = fixture(StreamScript::Stall(vec![]), TurnOptions::default());
        let mut stream = fx.controller.start(turn_request("hi")).await.expect("start");
        assert_eq!(stream.next_event().await, Some(StreamEvent::Start));
        stream.abort_handle().abort();
        assert!(matches!(stream.next_event().await, Some(StreamEvent::Error { .. })));
        assert_eq!(stream.finish().await, Err(TurnFailure::Cancelled));
        assert_eq!(fx.generator.closed_streams(), 1);
    }

    #[tokio::test]
    async fn dropping_consumer_releases_stalled_upstream() {
        let fx = fixture(StreamScript::Stall(vec![TextChunk::new("Hel")]), TurnOptions::default());
        let stream = fx.controller.start(turn_request("hi")).await.expect("start");
        drop(stream);

        for _ in 0..100 {
            if fx.generator.closed_streams() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(fx.generator.closed_streams(), 1);
        assert!(persisted(&fx.store).await.is_empty());
    }

    struct RejectingStore;

    #[async_trait::async_trait]
    impl TranscriptStore for RejectingStore {
        async fn append_turn(&self, _turn: TurnRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("database offline".into()))
        }

        async fn entries(&self, _session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persistence_failure_replaces_done_with_error() {
        let generator = Arc::new(ScriptedGenerator::new().with_stream(StreamScript::chunks(["ok"])));
        let controller = TurnController::new(generator, Arc::new(RejectingStore));
        let mut stream = controller.start(turn_request("hi")).await.expect("start");
        let events = collect(&mut stream).await;
        assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
        assert!(matches!(stream.finish().await, Err(TurnFailure::Persistence { .. })));
    }
}
