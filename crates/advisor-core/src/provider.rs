//! Text Completion Provider
//!
//! Defines the interface the advisor uses to talk to a language model.
//! The backend receives the whole accumulated transcript as a single prompt
//! and returns one continuation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use advisor_core::provider::{CompletionProvider, GenerationOptions};
//!
//! let provider = OllamaProvider::from_config(config);
//! provider.initialize().await?;
//!
//! let completion = provider
//!     .generate("User: hi\n\nAssistant:", &GenerationOptions::default(), &cancel)
//!     .await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Stop sequence that keeps the model from writing the user's next turn
pub const USER_TURN_STOP: &str = "User:";

/// Sampling configuration for a single generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Stop sequences
    #[serde(default = "default_stop_sequences")]
    pub stop_sequences: Vec<String>,
}

const fn default_temperature() -> f32 { 0.7 }
const fn default_max_tokens() -> u32 { 2048 }
fn default_stop_sequences() -> Vec<String> { vec![USER_TURN_STOP.into()] }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop_sequences: default_stop_sequences(),
        }
    }
}

/// Response from a text completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

impl Completion {
    /// Completion carrying only text
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        }
    }
}

/// Token usage statistics
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
}

/// Strategy trait for text completion backends
///
/// Implementations must be safe to call from several tasks, although the
/// advisor itself serializes queries.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// Load the model. Calling it again after success is a no-op.
    async fn initialize(&self) -> Result<()>;

    /// Generate one continuation of `prompt`.
    ///
    /// Must return [`AdvisorError::Cancelled`](crate::AdvisorError::Cancelled)
    /// promptly once `cancel` fires.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<Completion>;

    /// Estimate token count for text (provider-specific tokenization)
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Default: rough estimate of ~4 chars per token
        u32::try_from(text.len() / 4).unwrap_or(u32::MAX)
    }
}
