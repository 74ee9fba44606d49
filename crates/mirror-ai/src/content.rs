use bytes::Bytes;

/// Binary content attached to a generation request (for example one photo).
///
/// The payload is reference-counted, so cloning a part for each attempt
/// shares the original buffer instead of copying it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryPart {
    /// MIME type reported to the provider (for example `image/jpeg`).
    pub mime_type: String,
    /// Raw bytes.
    pub data: Bytes,
}

impl BinaryPart {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// One prompt part sent to the upstream generator.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum InputPart {
    /// Plain text input.
    Text(String),
    /// Attached binary content.
    Binary(BinaryPart),
}

impl InputPart {
    /// Returns the text of a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

/// Normalized upstream call produced from a `GenerationRequest`.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerateCall {
    /// Prompt parts in order: instruction text first, then attachments.
    pub parts: Vec<InputPart>,
    /// Provider response-schema hint, when structured output is requested.
    pub response_schema: Option<serde_json::Value>,
    /// Sampling temperature.
    pub temperature: f32,
}

impl GenerateCall {
    /// Concatenates the text parts of the call.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Some(text) = part.as_text() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    /// Iterates over the binary parts of the call.
    pub fn binary_parts(&self) -> impl Iterator<Item = &BinaryPart> {
        self.parts.iter().filter_map(|part| match part {
            InputPart::Binary(binary) => Some(binary),
            InputPart::Text(_) => None,
        })
    }
}
