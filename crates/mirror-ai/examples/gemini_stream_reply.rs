use std::sync::Arc;

use mirror_ai::prelude::*;
use mirror_ai::tasks::{GoalContext, future_self_reply_request};
use mirror_ai::vendors::gemini::GeminiProvider;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryTranscriptStore::new());
    let controller = TurnController::new(Arc::new(GeminiProvider::from_env()?), store.clone());

    let message = "I skipped my run again today.";
    let goal = GoalContext::new("Run a 10k").with_description("Race in May");
    let mut turn = controller
        .start(TurnRequest {
            session_id: "demo".into(),
            user_message: message.into(),
            request: future_self_reply_request(&goal, message)?,
        })
        .await?;

    while let Some(event) = turn.next_event().await {
        match event {
            StreamEvent::Delta { text } => print!("{text}"),
            StreamEvent::Done { .. } => println!(),
            StreamEvent::Error { message } => eprintln!("turn error: {message}"),
            StreamEvent::Start => {}
        }
    }

    let reply = turn.finish().await?;
    println!("persisted turn {} ({} entries)", reply.turn_id, store.entries("demo").await?.len());
    Ok(())
}
