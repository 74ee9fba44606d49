use std::time::Duration;

use crate::errors::MirrorError;

/// Model used when `GEMINI_MODEL_TEXT` / `GEMINI_MODEL_MULTI` are unset.
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Configuration for the Gemini provider client.
#[derive(Clone, Debug)]
pub struct GeminiClientConfig {
    /// API key sent as `x-goog-api-key`.
    pub api_key: String,
    /// Base URL of the Generative Language API.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    /// Model for text-only calls.
    pub text_model: String,
    /// Model for calls carrying binary parts.
    pub multimodal_model: String,
    /// Default HTTP timeout for requests.
    pub timeout: Duration,
}

impl GeminiClientConfig {
    /// Creates a config with default models and a provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: DEFAULT_MODEL.to_string(),
            multimodal_model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `GEMINI_API_KEY`, `GEMINI_MODEL_TEXT`,
    /// `GEMINI_MODEL_MULTI` and `GEMINI_BASE_URL`.
    pub fn from_env() -> Result<Self, MirrorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, MirrorError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let Some(api_key) = non_empty("GEMINI_API_KEY") else {
            return Err(MirrorError::Config(
                "missing GEMINI_API_KEY for Gemini provider".into(),
            ));
        };
        let mut config = Self::new(api_key);
        if let Some(model) = non_empty("GEMINI_MODEL_TEXT") {
            config.text_model = model;
        }
        if let Some(model) = non_empty("GEMINI_MODEL_MULTI") {
            config.multimodal_model = model;
        }
        if let Some(base_url) = non_empty("GEMINI_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn multimodal_model(mut self, model: impl Into<String>) -> Self {
        self.multimodal_model = model.into();
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        )
    }

    pub(crate) fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/')
        )
    }
}
