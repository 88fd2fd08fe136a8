//! # advisor-core
//!
//! Orchestration loop that lets a locally hosted language model answer
//! health questions by calling external data tools.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Advisor                               │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Prompt    │  │  Tool-Call  │  │ CompletionProvider  │  │
//! │  │   Builder   │──│   Parser    │──│ ToolCatalog         │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The model requests a tool by writing
//!
//! ```text
//! TOOL_CALL: get_daily_sleep
//! ARGUMENTS: {"start_date": "2024-05-01"}
//! ```
//!
//! anywhere in its output. The tool's text result is appended to the
//! transcript and the model is asked to continue, at most
//! [`DEFAULT_MAX_ITERATIONS`] times per query.

pub mod advisor;
pub mod error;
pub mod history;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod tool;

pub use advisor::{Advisor, AdvisorBuilder, AdvisorConfig, DEFAULT_MAX_ITERATIONS};
pub use error::{AdvisorError, Result};
pub use history::ConversationHistory;
pub use parser::parse_tool_call;
pub use provider::{Completion, CompletionProvider, GenerationOptions};
pub use tool::{Tool, ToolArguments, ToolCatalog, ToolDescriptor, ToolInvocation, ToolOutcome, ToolRegistry};
pub use tokio_util::sync::CancellationToken;
