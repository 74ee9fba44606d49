//! Declarative output schemas.
//!
//! A [`SchemaDescriptor`] is rendered twice: into the provider's
//! response-schema hint to bias generation, and into a standard JSON Schema
//! that is compiled once with `jsonschema` and validates the parsed result
//! locally. Validation returns a discriminated result and never panics on
//! malformed input.

use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use serde_json::{Map, Value};

use crate::errors::MirrorError;

/// One validation problem, located by a dotted field path.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationIssue {
    /// Dotted path (`action_task.instructions.0`), or `(root)`.
    pub path: String,
    /// Rule that was violated.
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Renders issues as `path: message; path: message`.
pub fn summarize_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A named member of an object schema.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: SchemaDescriptor,
    pub required: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            name: name.into(),
            schema,
            required: false,
        }
    }
}

/// Declarative shape of a structured response.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaDescriptor {
    String {
        min_len: Option<usize>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number,
    Boolean,
    Array {
        items: Box<SchemaDescriptor>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    Object {
        fields: Vec<Field>,
    },
}

impl SchemaDescriptor {
    pub fn string() -> Self {
        Self::String { min_len: None }
    }

    /// String with at least one character.
    pub fn non_empty_string() -> Self {
        Self::String { min_len: Some(1) }
    }

    pub fn integer() -> Self {
        Self::Integer {
            min: None,
            max: None,
        }
    }

    /// Integer constrained to `min..=max`.
    pub fn integer_range(min: i64, max: i64) -> Self {
        Self::Integer {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn number() -> Self {
        Self::Number
    }

    pub fn boolean() -> Self {
        Self::Boolean
    }

    pub fn array(items: SchemaDescriptor) -> Self {
        Self::Array {
            items: Box::new(items),
            min_items: None,
            max_items: None,
        }
    }

    pub fn object(fields: impl IntoIterator<Item = Field>) -> Self {
        Self::Object {
            fields: fields.into_iter().collect(),
        }
    }

    /// Requires at least `n` array elements. No effect on non-array schemas.
    pub fn min_items(mut self, n: usize) -> Self {
        if let Self::Array { min_items, .. } = &mut self {
            *min_items = Some(n);
        }
        self
    }

    /// Requires exactly `n` array elements. No effect on non-array schemas.
    pub fn exact_len(mut self, n: usize) -> Self {
        if let Self::Array {
            min_items,
            max_items,
            ..
        } = &mut self
        {
            *min_items = Some(n);
            *max_items = Some(n);
        }
        self
    }

    /// Renders the provider response-schema hint.
    ///
    /// Length and range constraints are local-only; the hint carries types,
    /// properties and required-ness.
    pub fn to_response_schema(&self) -> Value {
        match self {
            Self::String { .. } => serde_json::json!({ "type": "STRING" }),
            Self::Integer { .. } => serde_json::json!({ "type": "INTEGER" }),
            Self::Number => serde_json::json!({ "type": "NUMBER" }),
            Self::Boolean => serde_json::json!({ "type": "BOOLEAN" }),
            Self::Array { items, .. } => serde_json::json!({
                "type": "ARRAY",
                "items": items.to_response_schema(),
            }),
            Self::Object { fields } => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    properties.insert(field.name.clone(), field.schema.to_response_schema());
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                let mut schema = serde_json::json!({
                    "type": "OBJECT",
                    "properties": properties,
                });
                if !required.is_empty() {
                    schema["required"] = Value::Array(required);
                }
                schema
            }
        }
    }

    /// Renders the standard JSON Schema used for local validation.
    pub fn to_json_schema(&self) -> Value {
        match self {
            Self::String { min_len } => {
                let mut schema = serde_json::json!({ "type": "string" });
                if let Some(min) = min_len {
                    schema["minLength"] = (*min).into();
                }
                schema
            }
            Self::Integer { min, max } => {
                let mut schema = serde_json::json!({ "type": "integer" });
                if let Some(min) = min {
                    schema["minimum"] = (*min).into();
                }
                if let Some(max) = max {
                    schema["maximum"] = (*max).into();
                }
                schema
            }
            Self::Number => serde_json::json!({ "type": "number" }),
            Self::Boolean => serde_json::json!({ "type": "boolean" }),
            Self::Array {
                items,
                min_items,
                max_items,
            } => {
                let mut schema = serde_json::json!({
                    "type": "array",
                    "items": items.to_json_schema(),
                });
                if let Some(min) = min_items {
                    schema["minItems"] = (*min).into();
                }
                if let Some(max) = max_items {
                    schema["maxItems"] = (*max).into();
                }
                schema
            }
            Self::Object { fields } => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    properties.insert(field.name.clone(), field.schema.to_json_schema());
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
        }
    }

    /// Compiles the descriptor into a reusable validator.
    pub fn compile(self) -> Result<CompiledSchema, MirrorError> {
        let validator = jsonschema::validator_for(&self.to_json_schema())
            .map_err(|e| MirrorError::Validation(format!("invalid output schema: {e}")))?;
        Ok(CompiledSchema {
            descriptor: self,
            validator: Arc::new(validator),
        })
    }
}

/// A [`SchemaDescriptor`] compiled once for repeated validation.
#[derive(Clone)]
pub struct CompiledSchema {
    descriptor: SchemaDescriptor,
    validator: Arc<jsonschema::Validator>,
}

impl CompiledSchema {
    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    /// Validates `value`, collecting every issue.
    ///
    /// A missing required field is reported at the field's own path. Unknown
    /// extra fields are accepted.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        let issues: Vec<ValidationIssue> = self
            .validator
            .iter_errors(value)
            .map(|err| {
                let mut path = pointer_segments(&err.instance_path.to_string());
                if let ValidationErrorKind::Required { property } = &err.kind {
                    path.push(property.as_str().map_or_else(|| property.to_string(), str::to_string));
                    return ValidationIssue::new(render_path(&path), "Required");
                }
                ValidationIssue::new(render_path(&path), err.to_string())
            })
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CompiledSchema {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor
    }
}

/// Splits a JSON pointer (`/action_task/instructions/0`) into unescaped segments.
fn pointer_segments(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn render_path(path: &[String]) -> String {
    if path.is_empty() {
        "(root)".to_string()
    } else {
        path.join(".")
    }
}
