use crate::content::BinaryPart;
use crate::errors::MirrorError;
use crate::request::GenerationRequest;
use crate::schema::{Field, SchemaDescriptor};

use super::{GoalContext, or_none};

const REFRAME_SYSTEM: &str = "Based on the reality scene image, generate 3 specific future differences \
(objects/layout/behavior traces/micro-rituals). \
Provide 80-150 words narration. \
Output JSON: future_deltas[{id,type,text}], narration, action_seed.hint. \
Avoid judging the present, only describe the achievable version.";

/// One concrete difference between the photographed scene and the
/// achieved-goal version of it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FutureDelta {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActionSeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReframeOutput {
    pub future_deltas: Vec<FutureDelta>,
    pub narration: String,
    #[serde(default)]
    pub action_seed: ActionSeed,
}

/// Exactly three deltas; a missing `action_seed` defaults to empty.
pub fn reframe_schema() -> SchemaDescriptor {
    SchemaDescriptor::object([
        Field::required(
            "future_deltas",
            SchemaDescriptor::array(SchemaDescriptor::object([
                Field::required("id", SchemaDescriptor::non_empty_string()),
                Field::required("type", SchemaDescriptor::non_empty_string()),
                Field::required("text", SchemaDescriptor::non_empty_string()),
            ]))
            .exact_len(3),
        ),
        Field::required("narration", SchemaDescriptor::non_empty_string()),
        Field::optional(
            "action_seed",
            SchemaDescriptor::object([Field::optional("hint", SchemaDescriptor::string())]),
        ),
    ])
}

/// `reframe`: image plus goal, temperature 0.6.
pub fn reframe_request(
    goal: &GoalContext,
    user_context: Option<&str>,
    image: BinaryPart,
    max_attempts: u32,
) -> Result<GenerationRequest, MirrorError> {
    GenerationRequest::builder(
        "reframe",
        format!(
            "{REFRAME_SYSTEM}\nRelated goal: {}\nUser context: {}",
            goal.title,
            or_none(user_context)
        ),
    )
    .attach(image)
    .schema(reframe_schema())
    .temperature(0.6)
    .max_attempts(max_attempts)
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn two_deltas_fail_validation() {
        let value = json!({
            "future_deltas": [
                {"id": "1", "type": "object", "text": "A plant on the sill"},
                {"id": "2", "type": "layout", "text": "Shoes by the door"}
            ],
            "narration": "Morning light."
        });
        let issues = reframe_schema().compile().expect("schema").validate(&value).expect_err("invalid");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "future_deltas");
    }

    #[test]
    fn missing_action_seed_decodes_to_default() {
        let value = json!({
            "future_deltas": [
                {"id": "1", "type": "object", "text": "a"},
                {"id": "2", "type": "layout", "text": "b"},
                {"id": "3", "type": "ritual", "text": "c"}
            ],
            "narration": "Morning light."
        });
        assert_eq!(reframe_schema().compile().expect("schema").validate(&value), Ok(()));
        let out: ReframeOutput = serde_json::from_value(value).expect("decode");
        assert_eq!(out.action_seed, ActionSeed::default());
        assert_eq!(out.future_deltas[2].kind, "ritual");
    }

    #[test]
    fn request_attaches_image_once() {
        let request = reframe_request(
            &GoalContext::new("Tidy home"),
            None,
            BinaryPart::new("image/jpeg", vec![1_u8]),
            3,
        )
        .expect("request");
        assert_eq!(request.attachments().len(), 1);
        assert!(request.instruction().ends_with("Related goal: Tidy home\nUser context: none"));
    }
}
