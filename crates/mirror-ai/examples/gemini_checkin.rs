use std::sync::Arc;

use mirror_ai::prelude::*;
use mirror_ai::tasks::{CheckinInput, GoalContext, MirrorTasks};
use mirror_ai::vendors::gemini::GeminiProvider;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tasks = MirrorTasks::new(Arc::new(GeminiProvider::from_env()?));

    let input = CheckinInput {
        goal: GoalContext::new("Read twenty books this year"),
        reflection_text: Some("Read 15 pages before breakfast.".into()),
        session_context_summary: None,
    };
    match tasks.checkin_feedback(&input).await {
        Ok(out) => {
            println!("{}", out.feedback);
            println!("Sustainment: {}", out.one_small_sustainment);
            println!("Tomorrow: {}", out.next_prompt);
        }
        Err(TaskError::Generation(err)) => {
            eprintln!("gave up after {} attempts: {err}", err.attempt_count());
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
