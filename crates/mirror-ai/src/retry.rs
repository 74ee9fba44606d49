//! Structured-output retry engine.
//!
//! Drives a bounded, strictly sequential series of upstream calls until one
//! response parses as JSON and passes the request's schema. Each retry carries
//! a correction hint derived from the previous attempt's failure.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::GenerationError;
use crate::provider::Generator;
use crate::request::GenerationRequest;
use crate::schema::{CompiledSchema, ValidationIssue, summarize_issues};

const RAW_PREVIEW_CHARS: usize = 300;

const TRANSPORT_HINT: &str = "Return strict JSON only. No markdown, no extra keys, no extra text.";
const PARSE_HINT: &str =
    "Your last response was not valid JSON. Return one valid JSON object only.";

/// Failure recorded for one attempt. Successful attempts end the run and
/// are returned to the caller instead.
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptOutcome {
    TransportFailed { message: String },
    ParseFailed { message: String },
    ValidationFailed { issues: Vec<ValidationIssue> },
}

impl AttemptOutcome {
    /// Diagnostic detail for logs and failure reasons.
    pub fn detail(&self) -> String {
        match self {
            Self::TransportFailed { message } | Self::ParseFailed { message } => message.clone(),
            Self::ValidationFailed { issues } => summarize_issues(issues),
        }
    }

    /// Correction hint for the attempt that follows this one.
    pub fn correction_hint(&self) -> String {
        match self {
            Self::TransportFailed { .. } => TRANSPORT_HINT.to_string(),
            Self::ParseFailed { .. } => PARSE_HINT.to_string(),
            Self::ValidationFailed { issues } => format!(
                "Fix schema issues exactly: {}. Return one valid JSON object only.",
                summarize_issues(issues)
            ),
        }
    }
}

/// Record of one upstream call.
#[derive(Clone, Debug, PartialEq)]
pub struct Attempt {
    /// 1-based ordinal.
    pub index: u32,
    /// Raw response text, when the call returned one.
    pub raw: Option<String>,
    pub outcome: AttemptOutcome,
}

/// Retry engine for single-shot structured tasks.
#[derive(Clone)]
pub struct StructuredGenerator {
    generator: Arc<dyn Generator>,
}

impl StructuredGenerator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Returns the first schema-valid value, or fails after
    /// `request.max_attempts()` calls.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        self.run(request, |value| Ok(value.clone())).await
    }

    /// Like [`generate`](Self::generate), then decodes into `T`.
    ///
    /// A value that passes the schema but does not decode counts as a
    /// validation failure and consumes an attempt.
    pub async fn generate_typed<T: DeserializeOwned>(
        &self,
        request: &GenerationRequest,
    ) -> Result<T, GenerationError> {
        self.run(request, |value| {
            serde_json::from_value::<T>(value.clone())
                .map_err(|e| vec![ValidationIssue::new("(root)", e.to_string())])
        })
        .await
    }

    async fn run<T, F>(&self, request: &GenerationRequest, decode: F) -> Result<T, GenerationError>
    where
        F: Fn(&Value) -> Result<T, Vec<ValidationIssue>>,
    {
        let Some(schema) = request.schema() else {
            return Err(GenerationError::MissingSchema {
                task: request.task().clone(),
            });
        };
        let task = request.task();
        let total = request.max_attempts();
        let provider = self.generator.id();
        let mut attempts: Vec<Attempt> = Vec::with_capacity(total as usize);

        for index in 1..=total {
            let instruction = match attempts.last().map(|a| a.outcome.correction_hint()) {
                Some(hint) => format!("{}\n\nIMPORTANT: {hint}", request.instruction()),
                None => request.instruction().to_string(),
            };
            let call = request.call(Some(&instruction));

            let raw = match self.generator.generate(call).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(%task, %provider, attempt = index, total, error = %err, "structured request failed");
                    attempts.push(Attempt {
                        index,
                        raw: None,
                        outcome: AttemptOutcome::TransportFailed {
                            message: err.to_string(),
                        },
                    });
                    continue;
                }
            };

            let outcome = match check_response(&raw, schema, &decode) {
                Ok(value) => {
                    debug!(%task, %provider, attempt = index, total, "structured output validated");
                    return Ok(value);
                }
                Err(outcome) => outcome,
            };
            warn!(
                %task,
                %provider,
                attempt = index,
                total,
                detail = %outcome.detail(),
                raw_preview = %preview(&raw),
                "structured output rejected"
            );
            attempts.push(Attempt {
                index,
                raw: Some(raw),
                outcome,
            });
        }

        Err(GenerationError::Exhausted {
            task: task.clone(),
            attempts,
        })
    }
}

fn check_response<T, F>(raw: &str, schema: &CompiledSchema, decode: &F) -> Result<T, AttemptOutcome>
where
    F: Fn(&Value) -> Result<T, Vec<ValidationIssue>>,
{
    let value: Value = serde_json::from_str(raw).map_err(|e| AttemptOutcome::ParseFailed {
        message: e.to_string(),
    })?;
    schema
        .validate(&value)
        .and_then(|()| decode(&value))
        .map_err(|issues| AttemptOutcome::ValidationFailed { issues })
}

fn preview(raw: &str) -> String {
    raw.chars().take(RAW_PREVIEW_CHARS).collect()
}
