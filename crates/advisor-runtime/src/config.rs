//! Runtime Configuration
//!
//! JSON configuration for the model backend and the tool server, with
//! environment overrides. A missing file is created with defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use advisor_core::{AdvisorError, Result};
use serde::{Deserialize, Serialize};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/advisor.json";

/// Llama 3.1 8B Instruct, Q4_K_M quantization
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/bartowski/Meta-Llama-3.1-8B-Instruct-GGUF/resolve/main/Meta-Llama-3.1-8B-Instruct-Q4_K_M.gguf?download=true";

/// Compute backend selector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeBackend {
    #[default]
    Cpu,
    Gpu,
}

/// Model backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Local GGUF file backing the model, validated before loading
    pub model_path: Option<PathBuf>,

    /// Model tag known to the backend
    pub model: String,

    /// CPU or GPU inference
    pub backend: ComputeBackend,

    /// Context window in tokens
    pub context_size: u32,

    /// Layers to offload when running on GPU (0 lets the backend decide)
    pub gpu_layer_count: u32,

    /// Backend host URL
    pub host: String,

    /// Backend port
    pub port: u16,

    /// HTTP timeout for a single generation, in seconds
    pub timeout_secs: u64,

    /// Where to fetch the model file from when it is missing
    pub download_url: String,

    /// Download the model file when `model_path` does not exist
    pub auto_download: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            model: "llama3.1:8b-instruct-q4_K_M".into(),
            backend: ComputeBackend::Cpu,
            context_size: 4096,
            gpu_layer_count: 0,
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 600,
            download_url: DEFAULT_MODEL_URL.into(),
            auto_download: false,
        }
    }
}

impl LlmConfig {
    /// Backend base URL
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }

    /// Layers to offload, `None` when the backend should decide
    pub const fn gpu_layers(&self) -> Option<u32> {
        match self.backend {
            ComputeBackend::Cpu => Some(0),
            ComputeBackend::Gpu if self.gpu_layer_count == 0 => None,
            ComputeBackend::Gpu => Some(self.gpu_layer_count),
        }
    }
}

/// Stdio tool server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerConfig {
    /// Server name (for logs)
    pub name: String,

    /// Executable to spawn
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Timeout for a single request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            name: "OuraMcpServer".into(),
            command: "oura-mcp-server".into(),
            args: Vec::new(),
            env: HashMap::new(),
            request_timeout_secs: 30,
        }
    }
}

/// Full runtime configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub llm: LlmConfig,
    pub tool_server: ToolServerConfig,
}

impl RuntimeConfig {
    /// Config location from `ADVISOR_CONFIG`, or the default path
    pub fn config_path() -> PathBuf {
        std::env::var("ADVISOR_CONFIG")
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// Load from `ADVISOR_CONFIG` and apply environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::load_or_create(&Self::config_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read the file, writing defaults first when it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "Created default configuration");
            return Ok(config);
        }

        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            AdvisorError::Config(format!("invalid configuration in {}: {e}", path.display()))
        })
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `OLLAMA_HOST`, `OLLAMA_PORT`, `ADVISOR_MODEL`,
    /// `ADVISOR_MODEL_PATH` and `ADVISOR_TOOL_SERVER`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.llm.host = host;
        }
        if let Some(port) = lookup("OLLAMA_PORT").and_then(|p| p.parse().ok()) {
            self.llm.port = port;
        }
        if let Some(model) = lookup("ADVISOR_MODEL") {
            self.llm.model = model;
        }
        if let Some(path) = lookup("ADVISOR_MODEL_PATH") {
            self.llm.model_path = Some(PathBuf::from(path));
        }
        if let Some(command) = lookup("ADVISOR_TOOL_SERVER") {
            self.tool_server.command = command;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.llm.base_url(), "http://localhost:11434");
        assert_eq!(config.llm.context_size, 4096);
        assert_eq!(config.llm.gpu_layers(), Some(0));
        assert_eq!(config.tool_server.request_timeout_secs, 30);
    }

    #[test]
    fn test_gpu_layers() {
        let mut llm = LlmConfig { backend: ComputeBackend::Gpu, ..LlmConfig::default() };
        assert_eq!(llm.gpu_layers(), None);
        llm.gpu_layer_count = 33;
        assert_eq!(llm.gpu_layers(), Some(33));
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("advisor.json");

        let created = RuntimeConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        let reloaded = RuntimeConfig::load_or_create(&path).unwrap();
        assert_eq!(created.llm.model, reloaded.llm.model);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("advisor.json");
        std::fs::write(&path, r#"{"llm": {"backend": "gpu", "context_size": 8192}}"#).unwrap();

        let config = RuntimeConfig::load_or_create(&path).unwrap();
        assert_eq!(config.llm.backend, ComputeBackend::Gpu);
        assert_eq!(config.llm.context_size, 8192);
        assert_eq!(config.llm.port, 11434);
        assert_eq!(config.tool_server.command, "oura-mcp-server");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("advisor.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(RuntimeConfig::load_or_create(&path), Err(AdvisorError::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("OLLAMA_PORT", "9999"),
            ("ADVISOR_MODEL", "llama3.2"),
            ("ADVISOR_MODEL_PATH", "/models/llama.gguf"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.llm.port, 9999);
        assert_eq!(config.llm.model, "llama3.2");
        assert_eq!(config.llm.model_path, Some(PathBuf::from("/models/llama.gguf")));
        assert_eq!(config.llm.host, "http://localhost");
    }
}
