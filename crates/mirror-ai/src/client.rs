//! HTTP client for the streaming chat endpoint.

use std::time::Duration;

use futures::StreamExt as _;
use tracing::warn;

use crate::errors::ClientError;
use crate::reader::{AssistantMessage, MessageLabel, TRANSPORT_ERROR, read_reply};

/// Goal the conversation is anchored to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatGoal {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Body of `POST /api/mirror/chat`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatTurnRequest {
    pub session_id: String,
    pub goal: ChatGoal,
    pub user_message: String,
}

/// Sends chat turns and folds the streamed reply into one message.
#[derive(Clone, Debug)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    /// Creates a client for a server rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, base_url))
    }

    pub fn with_http_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/mirror/chat", self.base_url.trim_end_matches('/'))
    }

    /// Posts one turn and returns the final assistant message.
    ///
    /// `on_update` observes every intermediate state of the message. A
    /// connection that cannot be established at all is rendered as an error
    /// message rather than returned as `Err`.
    pub async fn send_turn<F>(
        &self,
        request: &ChatTurnRequest,
        mut on_update: F,
    ) -> Result<AssistantMessage, ClientError>
    where
        F: FnMut(&AssistantMessage),
    {
        let response = match self.http.post(self.chat_url()).json(request).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "chat request failed");
                let message = AssistantMessage {
                    content: TRANSPORT_ERROR.into(),
                    streaming: false,
                    label: Some(MessageLabel::Error),
                };
                on_update(&message);
                return Ok(message);
            }
        };
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = response.bytes_stream().boxed();
        read_reply(content_type.as_deref(), body, on_update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn turn() -> ChatTurnRequest {
        ChatTurnRequest {
            session_id: "s1".into(),
            goal: ChatGoal {
                title: "Run a 10k".into(),
                description: None,
            },
            user_message: "I skipped training today".into(),
        }
    }

    #[tokio::test]
    async fn folds_streamed_reply() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: start\ndata: {\"ok\":true}\n\n",
            "event: delta\ndata: {\"text\":\"Tomorrow \"}\n\n",
            "event: delta\ndata: {\"text\":\"counts.\"}\n\n",
            "event: done\ndata: {\"reply\":\"Tomorrow counts.\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/mirror/chat"))
            .and(body_partial_json(serde_json::json!({"session_id": "s1", "goal": {"title": "Run a 10k"}})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri()).expect("client");
        let mut updates = 0;
        let message = client
            .send_turn(&turn(), |_| updates += 1)
            .await
            .expect("message");
        assert_eq!(message.content, "Tomorrow counts.");
        assert_eq!(message.label, None);
        assert!(updates >= 4);
    }

    #[tokio::test]
    async fn renders_safety_notice_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/mirror/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"safe_block": true, "message": "Please reach out."}),
            ))
            .mount(&server)
            .await;

        let message = ChatClient::new(server.uri())
            .expect("client")
            .send_turn(&turn(), |_| {})
            .await
            .expect("message");
        assert_eq!(message.label, Some(MessageLabel::SafetyNotice));
        assert_eq!(message.content, "Please reach out.");
    }

    #[tokio::test]
    async fn unreachable_server_renders_error_message() {
        let client = ChatClient::new("http://127.0.0.1:9").expect("client");
        let message = client.send_turn(&turn(), |_| {}).await.expect("message");
        assert_eq!(message.label, Some(MessageLabel::Error));
        assert_eq!(message.content, TRANSPORT_ERROR);
    }
}
