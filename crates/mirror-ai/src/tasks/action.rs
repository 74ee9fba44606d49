use crate::errors::MirrorError;
use crate::request::GenerationRequest;
use crate::schema::{Field, SchemaDescriptor};

use super::{GoalContext, or_none};

const ACTION_SYSTEM: &str = "Generate a 10-20 minute physical action that can be completed and photographed. \
Output JSON action_task{title,instructions[],rationale,estimated_minutes,requires_photo:true}. \
Avoid vague words, keep steps verifiable and concise.";

const CHECKIN_SYSTEM: &str = "Confirm user action, don't exaggerate, provide one small sustainable adjustment. \
Output JSON: feedback, one_small_sustainment, next_prompt. \
Keep tone simple and practical.";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActionTask {
    pub title: String,
    pub instructions: Vec<String>,
    pub rationale: String,
    #[serde(deserialize_with = "whole_minutes")]
    pub estimated_minutes: u32,
    pub requires_photo: bool,
}

/// Accepts `15` and `15.0` alike; the schema's `integer` admits both.
fn whole_minutes<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize as _;
    use serde::de::Error as _;

    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(whole) = number.as_u64() {
        return u32::try_from(whole).map_err(D::Error::custom);
    }
    match number.as_f64() {
        Some(minutes) if minutes.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&minutes) => {
            Ok(minutes as u32)
        }
        _ => Err(D::Error::custom(format!(
            "estimated_minutes must be a whole number, got {number}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActionOutput {
    pub action_task: ActionTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Budget {
    Free,
    Low,
    Any,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActionConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
}

/// What the session has produced so far.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActionContext {
    pub chat_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub future_deltas: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<ActionConstraints>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckinOutput {
    pub feedback: String,
    pub one_small_sustainment: String,
    pub next_prompt: String,
}

/// Inputs summarized for check-in feedback.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckinInput {
    pub goal: GoalContext,
    #[serde(default)]
    pub reflection_text: Option<String>,
    #[serde(default)]
    pub session_context_summary: Option<String>,
}

pub fn action_schema() -> SchemaDescriptor {
    SchemaDescriptor::object([Field::required(
        "action_task",
        SchemaDescriptor::object([
            Field::required("title", SchemaDescriptor::non_empty_string()),
            Field::required(
                "instructions",
                SchemaDescriptor::array(SchemaDescriptor::non_empty_string()).min_items(1),
            ),
            Field::required("rationale", SchemaDescriptor::non_empty_string()),
            Field::required("estimated_minutes", SchemaDescriptor::integer_range(1, 120)),
            Field::required("requires_photo", SchemaDescriptor::boolean()),
        ]),
    )])
}

pub fn checkin_schema() -> SchemaDescriptor {
    SchemaDescriptor::object([
        Field::required("feedback", SchemaDescriptor::non_empty_string()),
        Field::required("one_small_sustainment", SchemaDescriptor::non_empty_string()),
        Field::required("next_prompt", SchemaDescriptor::non_empty_string()),
    ])
}

fn action_summary(goal: &GoalContext, context: &ActionContext) -> String {
    let deltas = serde_json::Value::Array(context.future_deltas.clone().unwrap_or_default());
    let constraints = serde_json::to_value(context.constraints.clone().unwrap_or_default())
        .unwrap_or_else(|_| serde_json::json!({}));
    [
        format!("Goal: {}", goal.title),
        format!("Chat summary: {}", context.chat_summary),
        format!("Deltas: {deltas}"),
        format!("Constraints: {constraints}"),
    ]
    .join(" | ")
}

/// `action_task`: temperature 0.5.
pub fn action_task_request(
    goal: &GoalContext,
    context: &ActionContext,
    max_attempts: u32,
) -> Result<GenerationRequest, MirrorError> {
    GenerationRequest::builder(
        "action_task",
        format!("{ACTION_SYSTEM}\nContext: {}", action_summary(goal, context)),
    )
    .schema(action_schema())
    .temperature(0.5)
    .max_attempts(max_attempts)
    .build()
}

/// `checkin_feedback`: temperature 0.5.
pub fn checkin_request(
    input: &CheckinInput,
    max_attempts: u32,
) -> Result<GenerationRequest, MirrorError> {
    let summary = [
        format!("Goal: {}", input.goal.title),
        format!("Reflection: {}", or_none(input.reflection_text.as_deref())),
        format!(
            "Session context: {}",
            or_none(input.session_context_summary.as_deref())
        ),
    ]
    .join(" | ");
    GenerationRequest::builder(
        "checkin_feedback",
        format!("{CHECKIN_SYSTEM}\nAction summary: {summary}"),
    )
    .schema(checkin_schema())
    .temperature(0.5)
    .max_attempts(max_attempts)
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_summary_serializes_optional_context() {
        let context = ActionContext {
            chat_summary: "Wants to run mornings".into(),
            future_deltas: None,
            constraints: Some(ActionConstraints {
                max_minutes: None,
                budget: Some(Budget::Free),
            }),
        };
        let request =
            action_task_request(&GoalContext::new("Run a 10k"), &context, 3).expect("request");
        assert!(request.instruction().ends_with(
            "Context: Goal: Run a 10k | Chat summary: Wants to run mornings | Deltas: [] | Constraints: {\"budget\":\"free\"}"
        ));
        assert_eq!(request.temperature(), 0.5);
    }

    #[test]
    fn estimated_minutes_out_of_range_is_rejected() {
        let value = json!({"action_task": {
            "title": "Walk",
            "instructions": ["Put on shoes"],
            "rationale": "Momentum",
            "estimated_minutes": 0,
            "requires_photo": true
        }});
        let issues = action_schema().compile().expect("schema").validate(&value).expect_err("invalid");
        assert_eq!(issues[0].path, "action_task.estimated_minutes");
    }

    #[test]
    fn whole_minutes_accept_float_form() {
        let task = |minutes: serde_json::Value| {
            serde_json::from_value::<ActionTask>(json!({
                "title": "Walk",
                "instructions": ["Put on shoes"],
                "rationale": "Momentum",
                "estimated_minutes": minutes,
                "requires_photo": true
            }))
        };
        assert_eq!(task(json!(15.0)).expect("float form").estimated_minutes, 15);
        assert_eq!(task(json!(15)).expect("integer form").estimated_minutes, 15);
        assert!(task(json!(15.5)).is_err());
        assert!(task(json!(-3)).is_err());
    }

    #[test]
    fn checkin_request_fills_missing_fields_with_none() {
        let input = CheckinInput {
            goal: GoalContext::new("Read more"),
            reflection_text: Some("Read 10 pages".into()),
            session_context_summary: None,
        };
        let request = checkin_request(&input, 3).expect("request");
        assert!(request.instruction().ends_with(
            "Action summary: Goal: Read more | Reflection: Read 10 pages | Session context: none"
        ));
    }
}
