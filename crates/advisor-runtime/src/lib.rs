//! # advisor-runtime
//!
//! Concrete providers for the health advisor.
//!
//! ## Providers
//!
//! - **Ollama** (default): local LLM inference over the Ollama HTTP API
//! - **MCP**: tool catalog served by a stdio Model Context Protocol server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use advisor_runtime::{McpToolClient, OllamaProvider, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_env()?;
//! let advisor = AdvisorBuilder::new()
//!     .completions(Arc::new(OllamaProvider::from_config(config.llm)))
//!     .catalog(Arc::new(McpToolClient::new(config.tool_server)))
//!     .build()?;
//! ```

pub mod config;
pub mod download;
pub mod mcp;
pub mod model_file;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use config::{ComputeBackend, LlmConfig, RuntimeConfig, ToolServerConfig};
pub use download::ModelDownloader;
pub use mcp::McpToolClient;
pub use model_file::{ModelFileInfo, validate_model_file};

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;

// Re-export core types for convenience
pub use advisor_core::{
    Advisor, AdvisorBuilder, AdvisorError, CancellationToken, CompletionProvider, Result,
    ToolCatalog, ToolDescriptor,
};
