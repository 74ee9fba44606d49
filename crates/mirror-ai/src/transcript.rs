//! Transcript persistence collaborator.
//!
//! Storage itself lives outside this crate; the turn controller only needs an
//! all-or-nothing append of one user/assistant pair.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::errors::StoreError;

/// Author of a transcript entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One persisted message.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TranscriptEntry {
    pub session_id: String,
    pub turn_id: uuid::Uuid,
    pub role: Role,
    pub content: String,
}

/// A completed turn, appended as one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnRecord {
    pub session_id: String,
    pub turn_id: uuid::Uuid,
    pub user: String,
    pub assistant: String,
}

impl TurnRecord {
    /// The user entry followed by the assistant entry.
    pub fn entries(&self) -> [TranscriptEntry; 2] {
        [
            TranscriptEntry {
                session_id: self.session_id.clone(),
                turn_id: self.turn_id,
                role: Role::User,
                content: self.user.clone(),
            },
            TranscriptEntry {
                session_id: self.session_id.clone(),
                turn_id: self.turn_id,
                role: Role::Assistant,
                content: self.assistant.clone(),
            },
        ]
    }
}

/// Persistence collaborator for completed turns.
#[async_trait::async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Commits both sides of the turn, or neither.
    async fn append_turn(&self, turn: TurnRecord) -> Result<(), StoreError>;

    /// Entries of a session in append order.
    async fn entries(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError>;
}

/// Process-local store keyed by session id.
#[derive(Default)]
pub struct InMemoryTranscriptStore {
    sessions: RwLock<HashMap<String, Vec<TranscriptEntry>>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn append_turn(&self, turn: TurnRecord) -> Result<(), StoreError> {
        if turn.session_id.trim().is_empty() {
            return Err(StoreError::Rejected("session id must not be empty".into()));
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(turn.session_id.clone())
            .or_default()
            .extend(turn.entries());
        Ok(())
    }

    async fn entries(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_turn_writes_user_then_assistant() {
        let store = InMemoryTranscriptStore::new();
        let turn_id = uuid::Uuid::new_v4();
        store
            .append_turn(TurnRecord {
                session_id: "s1".into(),
                turn_id,
                user: "hi".into(),
                assistant: "hello".into(),
            })
            .await
            .expect("append");

        let entries = store.entries("s1").await.expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].role, Role::Assistant);
        assert!(entries.iter().all(|e| e.turn_id == turn_id));
        assert!(store.entries("other").await.expect("entries").is_empty());
    }

    #[tokio::test]
    async fn rejected_turn_writes_nothing() {
        let store = InMemoryTranscriptStore::new();
        let err = store
            .append_turn(TurnRecord {
                session_id: " ".into(),
                turn_id: uuid::Uuid::new_v4(),
                user: "hi".into(),
                assistant: "hello".into(),
            })
            .await;
        assert!(matches!(err, Err(StoreError::Rejected(_))));
        assert!(store.entries(" ").await.expect("entries").is_empty());
    }
}
