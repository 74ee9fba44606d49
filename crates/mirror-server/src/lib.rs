//! HTTP surface of the mirror reflection tool.
//!
//! Structured tasks answer with one validated JSON object; the chat endpoint
//! streams a framed event sequence, or a plain JSON object when the turn is
//! refused before the stream opens.

pub mod config;
pub mod error;
pub mod observability;
mod routes;
pub mod safety;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use mirror_ai::tasks::MirrorTasks;
use mirror_ai::{Generator, MirrorError, TranscriptStore, TurnController};

use crate::config::ServerConfig;
use crate::safety::{KeywordScreen, SafetyScreen};

/// Fetches images referenced by URL in task payloads.
#[derive(Clone)]
pub struct ImageFetcher {
    http: reqwest::Client,
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, MirrorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::Config(format!("failed to build image client: {e}")))?;
        Ok(Self { http })
    }
}

/// Shared handler state. Every collaborator is injected.
#[derive(Clone)]
pub struct AppState {
    tasks: MirrorTasks,
    turns: TurnController,
    store: Arc<dyn TranscriptStore>,
    safety: Arc<dyn SafetyScreen>,
    images: ImageFetcher,
}

impl AppState {
    pub fn new(
        generator: Arc<dyn Generator>,
        store: Arc<dyn TranscriptStore>,
        config: &ServerConfig,
    ) -> Result<Self, MirrorError> {
        Ok(Self {
            tasks: MirrorTasks::new(generator.clone()).with_max_attempts(config.max_attempts),
            turns: TurnController::new(generator, store.clone())
                .with_options(config.turn_options()),
            store,
            safety: Arc::new(KeywordScreen::default()),
            images: ImageFetcher::new(config.image_fetch_timeout)?,
        })
    }

    /// Replaces the default keyword screen.
    pub fn with_safety_screen(mut self, screen: Arc<dyn SafetyScreen>) -> Self {
        self.safety = screen;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/api/mirror/chat", post(routes::chat_stream))
        .route("/api/mirror/chat/structured", post(routes::chat_structured))
        .route("/api/mirror/reframe", post(routes::reframe))
        .route("/api/mirror/action/generate", post(routes::action_generate))
        .route("/api/mirror/action/checkin", post(routes::action_checkin))
        .with_state(state)
}

/// Serves the router until Ctrl-C.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
}
