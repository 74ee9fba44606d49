//! Task catalog: prompts, output schemas and typed outputs for each
//! generation the reflection tool performs.

mod action;
mod chat;
mod reframe;

use std::sync::Arc;

pub use action::{
    ActionConstraints, ActionContext, ActionOutput, ActionTask, Budget, CheckinInput,
    CheckinOutput, action_schema, action_task_request, checkin_request, checkin_schema,
};
pub use chat::{
    ChatOutput, NextStep, chat_schema, future_self_chat_request, future_self_reply_request,
};
pub use reframe::{ActionSeed, FutureDelta, ReframeOutput, reframe_request, reframe_schema};

use crate::content::BinaryPart;
use crate::errors::TaskError;
use crate::provider::Generator;
use crate::request::{DEFAULT_MAX_ATTEMPTS, GenerationRequest};
use crate::retry::StructuredGenerator;

/// Goal a session is anchored to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GoalContext {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl GoalContext {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description text, or `"none"` when absent or blank.
    pub fn description_or_none(&self) -> &str {
        or_none(self.description.as_deref())
    }
}

pub(crate) fn or_none(value: Option<&str>) -> &str {
    value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or("none")
}

/// Runs catalog tasks through the retry engine.
#[derive(Clone)]
pub struct MirrorTasks {
    engine: StructuredGenerator,
    max_attempts: u32,
}

impl MirrorTasks {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            engine: StructuredGenerator::new(generator),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Overrides the attempt budget applied to every task.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Single-shot structured chat reply.
    pub async fn future_self_chat(
        &self,
        goal: &GoalContext,
        user_message: &str,
    ) -> Result<ChatOutput, TaskError> {
        let request = future_self_chat_request(goal, user_message, self.max_attempts)?;
        self.run(&request).await
    }

    /// Three future deltas and a narration for a photographed scene.
    pub async fn reframe(
        &self,
        goal: &GoalContext,
        user_context: Option<&str>,
        image: BinaryPart,
    ) -> Result<ReframeOutput, TaskError> {
        let request = reframe_request(goal, user_context, image, self.max_attempts)?;
        self.run(&request).await
    }

    /// One small, photographable action.
    pub async fn action_task(
        &self,
        goal: &GoalContext,
        context: &ActionContext,
    ) -> Result<ActionOutput, TaskError> {
        let request = action_task_request(goal, context, self.max_attempts)?;
        self.run(&request).await
    }

    /// Feedback on a completed action.
    pub async fn checkin_feedback(&self, input: &CheckinInput) -> Result<CheckinOutput, TaskError> {
        let request = checkin_request(input, self.max_attempts)?;
        self.run(&request).await
    }

    async fn run<T: serde::de::DeserializeOwned>(
        &self,
        request: &GenerationRequest,
    ) -> Result<T, TaskError> {
        Ok(self.engine.generate_typed(request).await?)
    }
}
