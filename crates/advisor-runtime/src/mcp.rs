//! MCP Tool Client
//!
//! JSON-RPC 2.0 client for a Model Context Protocol server spawned as a
//! child process and spoken to over newline-delimited stdio.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use advisor_core::tool::EMPTY_TOOL_OUTPUT;
use advisor_core::{AdvisorError, CancellationToken, Result, ToolArguments, ToolCatalog, ToolDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, OnceCell};

use crate::config::ToolServerConfig;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: Option<u64>,
    /// Set when the server sends us a request or notification instead
    method: Option<String>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn into_result(self, method: &str) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(AdvisorError::ToolExecution(format!(
                "{method} failed: [{}] {}",
                error.code, error.message
            )));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpTool>,
}

#[derive(Debug, Deserialize)]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

/// `tools/call` result
#[derive(Debug, Default, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

/// Content block; only text blocks matter to the advisor
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl CallToolResult {
    fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
    }

    /// First text block; a result without one gets a placeholder
    fn into_output(self, name: &str) -> Result<String> {
        let text = self.first_text().map(ToString::to_string);
        if self.is_error {
            let message = text
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| format!("tool '{name}' reported an error"));
            return Err(AdvisorError::ToolExecution(message));
        }
        Ok(text.unwrap_or_else(|| EMPTY_TOOL_OUTPUT.to_string()))
    }
}

/// Live connection to a spawned server
struct StdioTransport {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

struct McpConnection {
    transport: Mutex<StdioTransport>,
    request_id: AtomicU64,
    server_info: Value,
}

/// MCP client implementing the advisor's tool catalog
pub struct McpToolClient {
    config: ToolServerConfig,
    connection: OnceCell<McpConnection>,
}

impl McpToolClient {
    pub fn new(config: ToolServerConfig) -> Self {
        Self {
            config,
            connection: OnceCell::new(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    /// Server metadata reported during the handshake
    pub fn server_info(&self) -> Option<&Value> {
        self.connection.get().map(|c| &c.server_info)
    }

    fn connection(&self) -> Result<&McpConnection> {
        self.connection.get().ok_or_else(|| {
            AdvisorError::CatalogUnavailable("MCP client not initialized. Call initialize first.".into())
        })
    }

    /// Spawn the server and run the initialization handshake
    async fn connect(&self) -> Result<McpConnection> {
        let config = &self.config;
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(|e| {
            AdvisorError::Initialization(format!(
                "Failed to spawn MCP server '{}' (command: {}): {e}",
                config.name, config.command
            ))
        })?;

        let stdin = process.stdin.take().ok_or_else(|| {
            AdvisorError::Initialization(format!("Failed to capture stdin for MCP server '{}'", config.name))
        })?;
        let stdout = process.stdout.take().ok_or_else(|| {
            AdvisorError::Initialization(format!("Failed to capture stdout for MCP server '{}'", config.name))
        })?;

        let mut transport = StdioTransport {
            process,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let id = 1;
        let init = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method: "initialize",
            params: Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
        };
        write_message(&mut transport.stdin, &init).await?;
        let response = tokio::time::timeout(self.timeout(), read_response(&mut transport.stdout, id))
            .await
            .map_err(|_| AdvisorError::Initialization("Timeout waiting for MCP server handshake".into()))??;
        let result = response
            .into_result("initialize")
            .map_err(|e| AdvisorError::Initialization(e.detail()))?;

        let initialized = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method: "notifications/initialized",
            params: Some(serde_json::json!({})),
        };
        write_message(&mut transport.stdin, &initialized).await?;

        let server_info = result.get("serverInfo").cloned().unwrap_or(Value::Null);
        tracing::info!(
            server = %config.name,
            protocol = result.get("protocolVersion").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "MCP server connected"
        );

        Ok(McpConnection {
            transport: Mutex::new(transport),
            request_id: AtomicU64::new(id + 1),
            server_info,
        })
    }

    /// Send a request and wait for the response with the same id
    async fn request(&self, method: &str, params: Option<Value>, cancel: &CancellationToken) -> Result<Value> {
        let connection = self.connection()?;
        let id = connection.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };

        let mut transport = tokio::select! {
            () = cancel.cancelled() => return Err(AdvisorError::Cancelled),
            transport = connection.transport.lock() => transport,
        };
        write_message(&mut transport.stdin, &request).await?;

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(AdvisorError::Cancelled),
            response = tokio::time::timeout(self.timeout(), read_response(&mut transport.stdout, id)) => {
                response.map_err(|_| {
                    AdvisorError::ToolExecution(format!("Timeout waiting for MCP server response to {method}"))
                })??
            }
        };

        response.into_result(method)
    }

    /// Kill the server process
    pub async fn shutdown(&self) {
        if let Some(connection) = self.connection.get() {
            let mut transport = connection.transport.lock().await;
            if let Err(e) = transport.stdin.shutdown().await {
                tracing::debug!(error = %e, "MCP stdin already closed");
            }
            if let Err(e) = transport.process.kill().await {
                tracing::warn!(error = %e, "Failed to stop MCP server");
            }
        }
    }
}

#[async_trait]
impl ToolCatalog for McpToolClient {
    async fn initialize(&self) -> Result<()> {
        self.connection.get_or_try_init(|| self.connect()).await?;
        Ok(())
    }

    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>> {
        let result = self.request("tools/list", None, cancel).await.map_err(|e| match e {
            AdvisorError::ToolExecution(msg) => AdvisorError::CatalogUnavailable(msg),
            other => other,
        })?;
        let listed: ListToolsResult = serde_json::from_value(result)?;

        Ok(listed
            .tools
            .into_iter()
            .map(|tool| ToolDescriptor::new(tool.name, tool.description.unwrap_or_default()))
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let result = self.request("tools/call", Some(params), cancel).await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| AdvisorError::ToolExecution(format!("unexpected tools/call result: {e}")))?;
        result.into_output(name)
    }
}

/// Write one newline-delimited JSON message
async fn write_message(stdin: &mut ChildStdin, message: &JsonRpcRequest<'_>) -> Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await?;
    Ok(())
}

/// Read lines until the response for `id` arrives
///
/// Skips blank lines, log output, server-initiated messages and responses
/// to earlier requests that were abandoned.
async fn read_response<R: AsyncBufRead + Unpin>(reader: &mut R, id: u64) -> Result<JsonRpcResponse> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(AdvisorError::CatalogUnavailable(
                "MCP server closed stdout (process may have crashed)".into(),
            ));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
            Ok(response) if response.method.is_none() && response.id == Some(id) => return Ok(response),
            Ok(response) => {
                tracing::trace!(id = ?response.id, method = ?response.method, "Skipping unrelated MCP message");
            }
            Err(_) => tracing::trace!(line = trimmed, "Skipping non-JSON MCP output"),
        }
    }
}
