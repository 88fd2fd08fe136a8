//! Tool System
//!
//! Types and traits for the tool catalog the advisor draws on. The catalog
//! normally lives in an external process (see `advisor-runtime`), but tools
//! can also be registered in-process through [`ToolRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{AdvisorError, Result};

/// Text fed back when a tool succeeds without any text content
pub const EMPTY_TOOL_OUTPUT: &str = "Tool executed successfully but returned no text content.";

/// Arguments of a tool invocation
pub type ToolArguments = Map<String, Value>;

/// A tool as advertised by the catalog
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to the model verbatim)
    pub description: String,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Tool call request extracted from model output
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: ToolArguments,
}

/// Result of executing a tool, as seen by the reasoning loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Text reported by the tool
    Ok(String),
    /// Reason the call failed
    Failed(String),
}

impl ToolOutcome {
    /// Render the outcome as the text appended to the conversation
    pub fn into_text(self, tool_name: &str) -> String {
        match self {
            Self::Ok(text) => text,
            Self::Failed(message) => format!("Error calling tool {tool_name}: {message}"),
        }
    }

    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Tool Catalog Provider
///
/// Lists the available tools and executes them by name.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Start the underlying transport. Calling it again after success is a no-op.
    async fn initialize(&self) -> Result<()>;

    /// List tools in catalog order.
    ///
    /// Fails with [`AdvisorError::CatalogUnavailable`] before `initialize`.
    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>>;

    /// Execute a tool and return its text output.
    async fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Tool trait - implement to add an in-process capability
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name and description advertised to the model
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with given arguments
    async fn execute(&self, arguments: &ToolArguments) -> Result<String>;
}

/// In-process tool catalog
///
/// Keeps registration order so the rendered catalog is stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<(ToolDescriptor, Arc<dyn Tool>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool, replacing any tool with the same name in place
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_shared(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor();
        if let Some(slot) = self
            .tools
            .iter_mut()
            .find(|(existing, _)| existing.name == descriptor.name)
        {
            *slot = (descriptor, tool);
        } else {
            self.tools.push((descriptor, tool));
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|(descriptor, _)| descriptor.name == name)
            .map(|(_, tool)| Arc::clone(tool))
    }

    /// Descriptors in registration order
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|(descriptor, _)| descriptor.clone()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolCatalog for ToolRegistry {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tools(&self, _cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>> {
        Ok(self.descriptors())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| AdvisorError::ToolNotFound(name.to_string()))?;

        tokio::select! {
            output = tool.execute(arguments) => output,
            () = cancel.cancelled() => Err(AdvisorError::Cancelled),
        }
    }
}
