//! Error Types

use thiserror::Error;

/// Result type alias for advisor operations
pub type Result<T> = std::result::Result<T, AdvisorError>;

/// Advisor error types
///
/// Only initialization, generation and cancellation failures ever leave
/// [`Advisor::process_query`](crate::Advisor::process_query). Tool failures
/// are folded into the conversation as text.
#[derive(Error, Debug)]
pub enum AdvisorError {
    /// A provider failed to start
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Completion backend failed (resource exhaustion, backend crash, ...)
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Tool catalog transport not initialized or unreachable
    #[error("Tool catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// Tool not present in the catalog
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AdvisorError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Initialization(_) | Self::CatalogUnavailable(_) | Self::Io(_)
        )
    }

    /// Message without the variant prefix, as reported by the failing party
    pub fn detail(&self) -> String {
        match self {
            Self::Initialization(msg)
            | Self::Generation(msg)
            | Self::CatalogUnavailable(msg)
            | Self::ToolExecution(msg)
            | Self::Config(msg)
            | Self::Other(msg) => msg.clone(),
            Self::ToolNotFound(name) => format!("no tool named '{name}'"),
            other => other.to_string(),
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Initialization(msg) => {
                format!("The advisor could not start: {msg}")
            }
            Self::Generation(_) => {
                "The language model failed to produce an answer. Please try again.".into()
            }
            Self::CatalogUnavailable(_) => "Health data tools are currently unavailable.".into(),
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::ToolExecution(msg) => format!("Tool error: {msg}"),
            Self::Cancelled => "The request was cancelled.".into(),
            Self::Config(msg) => format!("The advisor is misconfigured: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AdvisorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
