use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use mirror_ai::MirrorError;
use mirror_ai::request::DEFAULT_MAX_ATTEMPTS;
use mirror_ai::turn::TurnOptions;

/// Loads `.env` from the crate directory, then from the working directory.
pub fn init() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

/// Parses one variable. Unset or blank yields `None`.
fn parse_var<T: FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, MirrorError> {
    match raw.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| {
            tracing::error!(key, value, "invalid environment value");
            MirrorError::Config(format!("invalid value for {key}: {value}"))
        }),
    }
}

/// Runtime settings of the HTTP server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Longest wait for the next upstream chunk of a streamed reply.
    pub stream_idle_timeout: Option<Duration>,
    /// Reply length cap in characters.
    pub max_reply_chars: Option<usize>,
    /// Attempt budget for structured tasks.
    pub max_attempts: u32,
    /// Timeout for fetching a referenced image.
    pub image_fetch_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            stream_idle_timeout: Some(Duration::from_secs(60)),
            max_reply_chars: Some(8_000),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            image_fetch_timeout: Duration::from_secs(20),
        }
    }
}

impl ServerConfig {
    /// Builds the config from `MIRROR_BIND_ADDR`, `MIRROR_STREAM_IDLE_TIMEOUT_SECS`,
    /// `MIRROR_MAX_REPLY_CHARS` and `MIRROR_MAX_ATTEMPTS`.
    ///
    /// A value of `0` for the timeout or the length cap disables it.
    pub fn from_env() -> Result<Self, MirrorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, MirrorError> {
        let mut config = Self::default();
        if let Some(addr) = parse_var::<SocketAddr>("MIRROR_BIND_ADDR", lookup("MIRROR_BIND_ADDR"))? {
            config.bind_addr = addr;
        }
        if let Some(secs) = parse_var::<u64>(
            "MIRROR_STREAM_IDLE_TIMEOUT_SECS",
            lookup("MIRROR_STREAM_IDLE_TIMEOUT_SECS"),
        )? {
            config.stream_idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(chars) =
            parse_var::<usize>("MIRROR_MAX_REPLY_CHARS", lookup("MIRROR_MAX_REPLY_CHARS"))?
        {
            config.max_reply_chars = (chars > 0).then_some(chars);
        }
        if let Some(attempts) =
            parse_var::<u32>("MIRROR_MAX_ATTEMPTS", lookup("MIRROR_MAX_ATTEMPTS"))?
        {
            if attempts == 0 {
                return Err(MirrorError::Config(
                    "MIRROR_MAX_ATTEMPTS must be greater than 0".into(),
                ));
            }
            config.max_attempts = attempts;
        }
        Ok(config)
    }

    pub fn turn_options(&self) -> TurnOptions {
        TurnOptions {
            idle_timeout: self.stream_idle_timeout,
            max_reply_chars: self.max_reply_chars,
            ..TurnOptions::default()
        }
    }
}
