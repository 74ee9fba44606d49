use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::content::GenerateCall;
use crate::errors::{MirrorError, ProviderError};
use crate::model::ProviderId;
use crate::provider::{ChunkStream, Generator, TextChunk};
use crate::sse::FrameDecoder;

use super::config::GeminiClientConfig;
use super::transport::{GenerateContentResponse, build_request_body, map_gemini_frame};

const GEMINI_PROVIDER: &str = "gemini";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Generator backed by the Gemini Generative Language API.
pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiClientConfig,
}

impl GeminiProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: GeminiClientConfig) -> Result<Self, MirrorError> {
        if config.api_key.trim().is_empty() {
            return Err(MirrorError::Config(
                "Gemini client config api_key must not be empty".into(),
            ));
        }
        // Streams carry no total deadline; single-shot calls set one per request.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| MirrorError::Config(format!("failed to build Gemini client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a provider from the `GEMINI_*` environment variables.
    pub fn from_env() -> Result<Self, MirrorError> {
        Self::new(GeminiClientConfig::from_env()?)
    }

    fn model_for(&self, call: &GenerateCall) -> &str {
        if call.binary_parts().next().is_some() {
            &self.config.multimodal_model
        } else {
            &self.config.text_model
        }
    }

    async fn post(
        &self,
        url: String,
        call: &GenerateCall,
        deadline: Option<Duration>,
    ) -> Result<reqwest::Response, ProviderError> {
        let provider_id = ProviderId::new(GEMINI_PROVIDER);
        let mut request = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&build_request_body(call));
        if let Some(deadline) = deadline {
            request = request.timeout(deadline);
        }
        let response = request
            .send()
            .await
            .map_err(|e| {
                ProviderError::transport(provider_id.clone(), format!("Gemini request failed: {e}"))
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::provider(
                provider_id,
                format!("Gemini request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Generator for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(GEMINI_PROVIDER)
    }

    async fn generate(&self, call: GenerateCall) -> Result<String, ProviderError> {
        let provider_id = self.id();
        let model = self.model_for(&call);
        debug!(%model, parts = call.parts.len(), structured = call.response_schema.is_some(), "Gemini generateContent");

        let response = self
            .post(self.config.generate_url(model), &call, Some(self.config.timeout))
            .await?;
        let envelope: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::protocol(provider_id.clone(), format!("invalid Gemini response: {e}"))
        })?;
        envelope.check(&provider_id)?;
        envelope.text().ok_or_else(|| {
            let reason = envelope
                .candidates
                .first()
                .and_then(|c| c.finish_reason.clone())
                .unwrap_or_else(|| "no candidates".into());
            ProviderError::protocol(provider_id, format!("Gemini response had no text ({reason})"))
        })
    }

    async fn stream(&self, call: GenerateCall) -> Result<ChunkStream, ProviderError> {
        let model = self.model_for(&call);
        debug!(%model, parts = call.parts.len(), "starting Gemini content stream");

        let response = self.post(self.config.stream_url(model), &call, None).await?;
        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(Box::pin(gemini_chunk_stream(self.id(), bytes_stream)))
    }
}

fn gemini_chunk_stream(
    provider_id: ProviderId,
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<TextChunk, ProviderError>> + Send {
    struct State {
        provider_id: ProviderId,
        bytes_stream: ByteStream,
        decoder: FrameDecoder,
        pending: VecDeque<TextChunk>,
        done: bool,
    }

    stream::try_unfold(
        State {
            provider_id,
            bytes_stream,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Ok(Some((chunk, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(bytes)) => {
                        for frame in state.decoder.push_chunk(&bytes) {
                            if let Some(chunk) = map_gemini_frame(&state.provider_id, &frame)? {
                                state.pending.push_back(chunk);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(
                            state.provider_id,
                            format!("Gemini streaming read failed: {e}"),
                        ));
                    }
                    None => state.done = true,
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{BinaryPart, InputPart};
    use futures::TryStreamExt as _;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new(
            GeminiClientConfig::new("test-key")
                .base_url(server.uri())
                .text_model("text-model")
                .multimodal_model("vision-model"),
        )
        .expect("provider")
    }

    fn text_call(text: &str) -> GenerateCall {
        GenerateCall {
            parts: vec![InputPart::Text(text.into())],
            response_schema: Some(serde_json::json!({"type": "OBJECT"})),
            temperature: 0.5,
        }
    }

    #[tokio::test]
    async fn generate_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/text-model:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": {"responseMimeType": "application/json"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "{\"ok\":true}"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let raw = provider(&server).generate(text_call("hi")).await.expect("text");
        assert_eq!(raw, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn binary_parts_route_to_multimodal_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/vision-model:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "{}"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut call = text_call("look");
        call.parts
            .push(InputPart::Binary(BinaryPart::new("image/jpeg", vec![0_u8; 4])));
        provider(&server).generate(call).await.expect("text");
    }

    #[tokio::test]
    async fn non_success_status_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(text_call("hi"))
            .await
            .expect_err("status");
        assert!(matches!(err, ProviderError::Provider { status_code: Some(503), .. }));
    }

    #[tokio::test]
    async fn stream_normalizes_sse_frames_to_chunks() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"finishReason\":\"STOP\"}]}\r\n\r\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1beta/models/text-model:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let chunks: Vec<TextChunk> = provider(&server)
            .stream(GenerateCall {
                parts: vec![InputPart::Text("hi".into())],
                response_schema: None,
                temperature: 0.65,
            })
            .await
            .expect("stream")
            .try_collect()
            .await
            .expect("chunks");
        assert_eq!(chunks, vec![TextChunk::new("Hel"), TextChunk::new("lo")]);
    }

    /// Serves one chunked SSE response, pausing `gap` before each frame.
    async fn trickle_server(frames: Vec<&'static str>, gap: Duration) -> String {
        use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0_u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n")
                .await
                .expect("head");
            for frame in frames {
                tokio::time::sleep(gap).await;
                let chunk = format!("{:x}\r\n{frame}\r\n", frame.len());
                socket.write_all(chunk.as_bytes()).await.expect("chunk");
            }
            socket.write_all(b"0\r\n\r\n").await.expect("end");
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn stream_outlives_request_timeout_while_chunks_keep_arriving() {
        let base_url = trickle_server(
            vec![
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]}}]}\n\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"b\"}]}}]}\n\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"c\"}]}}]}\n\n",
            ],
            Duration::from_millis(150),
        )
        .await;
        let provider = GeminiProvider::new(
            GeminiClientConfig::new("test-key")
                .base_url(base_url)
                .text_model("text-model")
                .timeout(Duration::from_millis(300)),
        )
        .expect("provider");

        let chunks: Vec<TextChunk> = provider
            .stream(GenerateCall {
                parts: vec![InputPart::Text("hi".into())],
                response_schema: None,
                temperature: 0.65,
            })
            .await
            .expect("stream")
            .try_collect()
            .await
            .expect("chunks");
        assert_eq!(
            chunks,
            vec![TextChunk::new("a"), TextChunk::new("b"), TextChunk::new("c")]
        );
    }

    #[tokio::test]
    async fn generate_is_bounded_by_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "candidates": [{"content": {"parts": [{"text": "{}"}]}}]
                    }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        let provider = GeminiProvider::new(
            GeminiClientConfig::new("test-key")
                .base_url(server.uri())
                .timeout(Duration::from_millis(100)),
        )
        .expect("provider");

        let err = provider.generate(text_call("hi")).await.expect_err("deadline");
        assert!(matches!(err, ProviderError::Transport { .. }));
    }

    #[tokio::test]
    async fn stream_open_failure_is_reported_before_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let result = provider(&server).stream(text_call("hi")).await;
        assert!(matches!(
            result,
            Err(ProviderError::Provider { status_code: Some(401), .. })
        ));
    }

    #[tokio::test]
    async fn env_gated_smoke_generate_if_key_present() {
        if std::env::var("GEMINI_API_KEY")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping Gemini smoke test (GEMINI_API_KEY missing)");
            return;
        }
        let provider = GeminiProvider::from_env().expect("provider");
        let result = provider
            .generate(GenerateCall {
                parts: vec![InputPart::Text("Reply with the word ok.".into())],
                response_schema: None,
                temperature: 0.0,
            })
            .await;
        assert!(result.is_ok(), "Gemini smoke failed: {result:?}");
    }
}
