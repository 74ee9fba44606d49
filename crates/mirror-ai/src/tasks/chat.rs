use crate::errors::MirrorError;
use crate::request::GenerationRequest;
use crate::schema::{Field, SchemaDescriptor};

use super::GoalContext;

const CHAT_SYSTEM: &str = "You are the user's future self who has already achieved their goal. \
Speak warmly, specifically, without cliches. \
Output JSON with fields: reply, gentle_challenge_question, narrative_rewrite, next_step. \
Keep responses concise and practical. Avoid psychological diagnosis or quantum/universe promises.";

const REPLY_SYSTEM: &str = "You are the user's trusted friend from their future. \
Reply as one natural chat message, like WhatsApp. \
Be warm and specific; avoid cliches, diagnosis, and hype. \
Use 4-8 short sentences and keep it practical.";

/// Structured chat reply.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatOutput {
    pub reply: String,
    pub gentle_challenge_question: String,
    pub narrative_rewrite: String,
    pub next_step: NextStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NextStep {
    pub suggest_photo_anchor: bool,
    pub suggest_action_collapse: bool,
}

pub fn chat_schema() -> SchemaDescriptor {
    SchemaDescriptor::object([
        Field::required("reply", SchemaDescriptor::non_empty_string()),
        Field::required("gentle_challenge_question", SchemaDescriptor::non_empty_string()),
        Field::required("narrative_rewrite", SchemaDescriptor::non_empty_string()),
        Field::required(
            "next_step",
            SchemaDescriptor::object([
                Field::required("suggest_photo_anchor", SchemaDescriptor::boolean()),
                Field::required("suggest_action_collapse", SchemaDescriptor::boolean()),
            ]),
        ),
    ])
}

fn turn_context(goal: &GoalContext, user_message: &str) -> String {
    format!(
        "Goal: {}\nDescription: {}\nUser: {user_message}",
        goal.title,
        goal.description_or_none()
    )
}

/// `future_self_chat`: structured reply, temperature 0.6.
pub fn future_self_chat_request(
    goal: &GoalContext,
    user_message: &str,
    max_attempts: u32,
) -> Result<GenerationRequest, MirrorError> {
    GenerationRequest::builder(
        "future_self_chat",
        format!("{CHAT_SYSTEM}\nUser input: {}", turn_context(goal, user_message)),
    )
    .schema(chat_schema())
    .temperature(0.6)
    .max_attempts(max_attempts)
    .build()
}

/// `future_self_reply`: free-text streamed reply, temperature 0.65, no schema.
pub fn future_self_reply_request(
    goal: &GoalContext,
    user_message: &str,
) -> Result<GenerationRequest, MirrorError> {
    GenerationRequest::builder(
        "future_self_reply",
        format!("{REPLY_SYSTEM}\n\nContext:\n{}", turn_context(goal, user_message)),
    )
    .temperature(0.65)
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_request_is_schemaless_with_goal_context() {
        let request =
            future_self_reply_request(&GoalContext::new("Run a 10k"), "I skipped today").expect("request");
        assert!(request.schema().is_none());
        assert_eq!(request.temperature(), 0.65);
        assert!(request
            .instruction()
            .ends_with("Goal: Run a 10k\nDescription: none\nUser: I skipped today"));
    }

    #[test]
    fn chat_schema_rejects_missing_next_step_flag() {
        let value = serde_json::json!({
            "reply": "r",
            "gentle_challenge_question": "q",
            "narrative_rewrite": "n",
            "next_step": {"suggest_photo_anchor": true}
        });
        let issues = chat_schema().compile().expect("schema").validate(&value).expect_err("invalid");
        assert_eq!(issues[0].path, "next_step.suggest_action_collapse");
    }
}
