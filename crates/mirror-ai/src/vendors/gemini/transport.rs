//! Gemini `generateContent` wire shapes and stream-frame mapping.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::content::{GenerateCall, InputPart};
use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::provider::TextChunk;
use crate::sse::Frame;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentBody {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Content {
    pub role: &'static str,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub(crate) enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

/// Response envelope shared by `generateContent` and each streamed frame.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, with its parts concatenated.
    pub fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        Some(text)
    }

    /// Converts an in-band `error` object or a blocked prompt into an error.
    pub fn check(&self, provider: &ProviderId) -> Result<(), ProviderError> {
        if let Some(err) = &self.error {
            let message = err.message.as_deref().unwrap_or("Gemini returned an error");
            return Err(ProviderError::provider(provider.clone(), message, err.code));
        }
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ProviderError::provider(
                provider.clone(),
                format!("prompt blocked: {reason}"),
                None,
            ));
        }
        Ok(())
    }
}

pub(crate) fn build_request_body(call: &GenerateCall) -> GenerateContentBody {
    let parts = call
        .parts
        .iter()
        .map(|part| match part {
            InputPart::Text(text) => Part::Text { text: text.clone() },
            InputPart::Binary(binary) => Part::InlineData {
                inline_data: InlineData {
                    mime_type: binary.mime_type.clone(),
                    data: STANDARD.encode(&binary.data),
                },
            },
        })
        .collect();
    let structured = call.response_schema.is_some();
    GenerateContentBody {
        contents: vec![Content {
            role: "user",
            parts,
        }],
        generation_config: GenerationConfig {
            temperature: call.temperature,
            response_mime_type: structured.then_some("application/json"),
            response_schema: call.response_schema.clone(),
        },
    }
}

/// Maps one streamed frame to at most one chunk.
pub(crate) fn map_gemini_frame(
    provider: &ProviderId,
    frame: &Frame,
) -> Result<Option<TextChunk>, ProviderError> {
    let data = frame.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let response: GenerateContentResponse = serde_json::from_str(data).map_err(|e| {
        ProviderError::protocol(provider.clone(), format!("invalid Gemini stream frame: {e}"))
    })?;
    response.check(provider)?;
    Ok(response
        .text()
        .filter(|text| !text.is_empty())
        .map(TextChunk::new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::BinaryPart;

    #[test]
    fn body_carries_inline_data_and_schema_hint() {
        let call = GenerateCall {
            parts: vec![
                InputPart::Text("Describe".into()),
                InputPart::Binary(BinaryPart::new("image/png", vec![1_u8, 2, 3])),
            ],
            response_schema: Some(serde_json::json!({"type": "OBJECT"})),
            temperature: 0.5,
        };
        let body = serde_json::to_value(build_request_body(&call)).expect("json");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "Describe");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "AQID");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
    }

    #[test]
    fn plain_call_omits_json_mode() {
        let call = GenerateCall {
            parts: vec![InputPart::Text("hi".into())],
            response_schema: None,
            temperature: 0.65,
        };
        let body = serde_json::to_value(build_request_body(&call)).expect("json");
        assert!(body["generationConfig"].get("responseMimeType").is_none());
        assert!(body["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn maps_text_frames_and_errors() {
        let provider = ProviderId::new("gemini");
        let text = Frame {
            event: "message".into(),
            data: r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#.into(),
        };
        assert_eq!(
            map_gemini_frame(&provider, &text).expect("chunk"),
            Some(TextChunk::new("Hello"))
        );

        let finish = Frame {
            event: "message".into(),
            data: r#"{"candidates":[{"finishReason":"STOP"}]}"#.into(),
        };
        assert_eq!(map_gemini_frame(&provider, &finish).expect("none"), None);

        let failed = Frame {
            event: "message".into(),
            data: r#"{"error":{"code":429,"message":"quota exceeded"}}"#.into(),
        };
        let err = map_gemini_frame(&provider, &failed).expect_err("error");
        assert!(matches!(err, ProviderError::Provider { status_code: Some(429), .. }));

        let garbage = Frame {
            event: "message".into(),
            data: "{".into(),
        };
        assert!(matches!(
            map_gemini_frame(&provider, &garbage),
            Err(ProviderError::Protocol { .. })
        ));
    }
}
