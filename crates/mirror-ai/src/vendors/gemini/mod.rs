//! Gemini provider integration.
//!
//! Vendor wire shapes stay in this module; everything above it sees only
//! `GenerateCall` in and raw text or `TextChunk`s out.
mod adapter;
mod config;
pub(crate) mod transport;

pub use adapter::GeminiProvider;
pub use config::{DEFAULT_MODEL, GeminiClientConfig};
