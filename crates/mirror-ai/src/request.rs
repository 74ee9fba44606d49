use crate::content::{BinaryPart, GenerateCall, InputPart};
use crate::errors::MirrorError;
use crate::model::TaskId;
use crate::schema::{CompiledSchema, SchemaDescriptor};

/// Default attempt budget for structured tasks (two retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default sampling temperature when the caller sets none.
pub const DEFAULT_TEMPERATURE: f32 = 0.6;

/// Normalized, immutable generation request.
///
/// Built through [`GenerationRequest::builder`]; fields are read-only after
/// `build()`.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    task: TaskId,
    instruction: String,
    attachments: Vec<BinaryPart>,
    schema: Option<CompiledSchema>,
    temperature: f32,
    max_attempts: u32,
}

impl GenerationRequest {
    /// Starts a builder for the given task and base instruction text.
    pub fn builder(
        task: impl Into<TaskId>,
        instruction: impl Into<String>,
    ) -> GenerationRequestBuilder {
        GenerationRequestBuilder {
            task: task.into(),
            instruction: instruction.into(),
            attachments: Vec::new(),
            schema: None,
            temperature: DEFAULT_TEMPERATURE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn task(&self) -> &TaskId {
        &self.task
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn attachments(&self) -> &[BinaryPart] {
        &self.attachments
    }

    /// Output schema, compiled when the request was built.
    pub fn schema(&self) -> Option<&CompiledSchema> {
        self.schema.as_ref()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Builds the upstream call, optionally replacing the instruction text.
    ///
    /// Attachments follow the text part exactly once, in their original order.
    pub fn call(&self, instruction_override: Option<&str>) -> GenerateCall {
        let text = instruction_override.unwrap_or(&self.instruction);
        let mut parts = Vec::with_capacity(1 + self.attachments.len());
        parts.push(InputPart::Text(text.to_string()));
        parts.extend(self.attachments.iter().cloned().map(InputPart::Binary));
        GenerateCall {
            parts,
            response_schema: self
                .schema
                .as_ref()
                .map(|schema| schema.descriptor().to_response_schema()),
            temperature: self.temperature,
        }
    }
}

/// Builder for [`GenerationRequest`].
pub struct GenerationRequestBuilder {
    task: TaskId,
    instruction: String,
    attachments: Vec<BinaryPart>,
    schema: Option<SchemaDescriptor>,
    temperature: f32,
    max_attempts: u32,
}

impl GenerationRequestBuilder {
    /// Appends a binary attachment.
    pub fn attach(mut self, part: BinaryPart) -> Self {
        self.attachments.push(part);
        self
    }

    /// Sets the target output schema.
    pub fn schema(mut self, schema: SchemaDescriptor) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the total attempt budget (first call plus retries).
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Validates the builder state and produces the immutable request.
    pub fn build(self) -> Result<GenerationRequest, MirrorError> {
        if self.task.as_str().trim().is_empty() {
            return Err(MirrorError::Validation("task must not be empty".into()));
        }
        if self.instruction.trim().is_empty() {
            return Err(MirrorError::Validation(
                "instruction must not be empty".into(),
            ));
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(MirrorError::Validation(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.max_attempts == 0 {
            return Err(MirrorError::Validation(
                "max_attempts must be greater than 0".into(),
            ));
        }
        for part in &self.attachments {
            if part.mime_type.trim().is_empty() {
                return Err(MirrorError::Validation(
                    "attachment mime type must not be empty".into(),
                ));
            }
            if part.data.is_empty() {
                return Err(MirrorError::Validation(
                    "attachment data must not be empty".into(),
                ));
            }
        }
        let schema = self.schema.map(SchemaDescriptor::compile).transpose()?;
        Ok(GenerationRequest {
            task: self.task,
            instruction: self.instruction,
            attachments: self.attachments,
            schema,
            temperature: self.temperature,
            max_attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    #[test]
    fn defaults_apply() {
        let request = GenerationRequest::builder("chat", "hello").build().expect("build");
        assert_eq!(request.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(request.temperature(), DEFAULT_TEMPERATURE);
        assert!(request.schema().is_none());
    }

    #[test]
    fn rejects_blank_instruction_and_bad_budget() {
        let err = GenerationRequest::builder("chat", "  ").build();
        assert!(matches!(err, Err(MirrorError::Validation(msg)) if msg.contains("instruction")));

        let err = GenerationRequest::builder("chat", "hi").max_attempts(0).build();
        assert!(matches!(err, Err(MirrorError::Validation(msg)) if msg.contains("max_attempts")));

        let err = GenerationRequest::builder("chat", "hi").temperature(f32::NAN).build();
        assert!(matches!(err, Err(MirrorError::Validation(msg)) if msg.contains("temperature")));
    }

    #[test]
    fn rejects_empty_attachment() {
        let err = GenerationRequest::builder("reframe", "describe")
            .attach(BinaryPart::new("image/png", Vec::<u8>::new()))
            .build();
        assert!(matches!(err, Err(MirrorError::Validation(msg)) if msg.contains("attachment data")));
    }

    #[test]
    fn call_places_text_first_and_shares_attachment_bytes() {
        let image = BinaryPart::new("image/jpeg", vec![9_u8; 16]);
        let request = GenerationRequest::builder("reframe", "describe")
            .attach(image.clone())
            .schema(SchemaDescriptor::object([Field::required(
                "narration",
                SchemaDescriptor::non_empty_string(),
            )]))
            .temperature(0.6)
            .build()
            .expect("build");

        let call = request.call(Some("describe\n\nIMPORTANT: fix it"));
        assert_eq!(call.parts.len(), 2);
        assert_eq!(call.parts[0].as_text(), Some("describe\n\nIMPORTANT: fix it"));
        let attached = call.binary_parts().next().expect("binary part");
        assert_eq!(attached.data.as_ptr(), image.data.as_ptr());
        assert_eq!(
            call.response_schema.as_ref().map(|s| s["type"].clone()),
            Some(serde_json::json!("OBJECT"))
        );
        assert_eq!(request.call(None).parts[0].as_text(), Some("describe"));
    }
}
