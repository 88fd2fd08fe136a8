//! Ollama LLM Provider
//!
//! Implementation of `CompletionProvider` for local inference through
//! Ollama. The advisor hands over a complete transcript, so generation uses a
//! pass-through template instead of the model's chat template.
//!
//! When a GGUF file is configured it is validated, uploaded as a blob and
//! registered under the configured model tag before anything is generated.

use std::path::Path;
use std::time::Duration;

use advisor_core::{
    AdvisorError, CancellationToken, Result,
    provider::{Completion, CompletionProvider, FinishReason, GenerationOptions, TokenUsage},
};
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::{
    Ollama,
    generation::completion::request::GenerationRequest,
    models::ModelOptions,
};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::config::LlmConfig;
use crate::download::ModelDownloader;
use crate::model_file::{ModelFileInfo, validate_model_file};

/// Hand the prompt to the model untouched
const RAW_TEMPLATE: &str = "{{ .Prompt }}";

const PROGRESS_EVERY: usize = 50;

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    http: reqwest::Client,
    config: LlmConfig,
    downloader: ModelDownloader,
    loaded: OnceCell<()>,
}

impl OllamaProvider {
    /// Create from configuration
    pub fn from_config(config: LlmConfig) -> Self {
        let client = match reqwest::Url::parse(&config.host) {
            Ok(_) => Ollama::new(config.host.clone(), config.port),
            Err(e) => {
                tracing::warn!(host = %config.host, error = %e, "Invalid Ollama host, using default");
                Ollama::default()
            }
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            http,
            config,
            downloader: ModelDownloader::new(),
            loaded: OnceCell::new(),
        }
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::from_config(LlmConfig::default())
    }

    pub const fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url())
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Backend options shared by warm-up and generation
    fn model_options(&self) -> ModelOptions {
        let options = ModelOptions::default().num_ctx(self.config.context_size.into());
        match self.config.gpu_layers() {
            Some(layers) => options.num_gpu(layers),
            None => options,
        }
    }

    fn build_request(&self, prompt: &str, opts: &GenerationOptions) -> GenerationRequest<'static> {
        let options = self
            .model_options()
            .temperature(opts.temperature)
            .num_predict(i32::try_from(opts.max_tokens).unwrap_or(i32::MAX))
            .stop(opts.stop_sequences.clone());

        GenerationRequest::new(self.config.model.clone(), prompt.to_string())
            .template(RAW_TEMPLATE.to_string())
            .options(options)
    }

    /// Make sure the configured GGUF file is present and sane
    async fn prepare_model_file(&self) -> Result<Option<ModelFileInfo>> {
        let Some(path) = self.config.model_path.clone() else {
            return Ok(None);
        };

        if !tokio::fs::try_exists(&path).await? {
            if !self.config.auto_download {
                return Err(AdvisorError::Initialization(format!(
                    "Model file not found at {} and auto_download is disabled",
                    path.display()
                )));
            }
            tracing::info!(url = %self.config.download_url, "Downloading model...");
            self.downloader
                .download(&self.config.download_url, &path, &CancellationToken::new())
                .await?;
        }

        let info = blocking(move || validate_model_file(&path)).await?;
        tracing::info!(
            path = %info.path.display(),
            size = info.size,
            gguf_version = info.gguf_version,
            "Model file validated"
        );
        Ok(Some(info))
    }

    /// Upload the model file and create `config.model` from it
    async fn register_model_file(&self, info: &ModelFileInfo) -> Result<()> {
        let path = info.path.clone();
        let digest = blocking(move || file_digest(&path)).await?;
        self.push_blob(&info.path, &digest).await?;

        let request = create_request(&self.config.model, &info.path, &digest);
        self.http
            .post(self.url("/api/create"))
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                AdvisorError::Initialization(format!(
                    "Failed to create model '{}' from {}: {e}",
                    self.config.model,
                    info.path.display()
                ))
            })?;

        tracing::info!(model = %self.config.model, %digest, "Model registered from file");
        Ok(())
    }

    async fn push_blob(&self, path: &Path, digest: &str) -> Result<()> {
        let url = self.url(&format!("/api/blobs/{digest}"));
        let present = self
            .http
            .head(&url)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success());
        if present {
            tracing::debug!(%digest, "Model blob already present");
            return Ok(());
        }

        tracing::info!(path = %path.display(), "Uploading model file to Ollama...");
        let file = tokio::fs::File::open(path).await?;
        self.http
            .post(&url)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AdvisorError::Initialization(format!("Failed to upload model file: {e}")))?;
        Ok(())
    }

    /// Check the backend knows the configured model
    async fn ensure_model_available(&self) -> Result<()> {
        let models = self.client.list_local_models().await.map_err(|e| {
            AdvisorError::Initialization(format!(
                "Ollama not reachable at {}: {e}",
                self.config.base_url()
            ))
        })?;

        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        if model_listed(&names, &self.config.model) {
            Ok(())
        } else {
            Err(AdvisorError::Initialization(format!(
                "Model '{}' is not available in Ollama. Run `ollama pull {}` or set model_path.",
                self.config.model, self.config.model
            )))
        }
    }

    /// Load the model into memory with the configured context size
    async fn warm_up(&self) -> Result<()> {
        tracing::info!(model = %self.config.model, "Loading model...");
        let request = GenerationRequest::new(self.config.model.clone(), String::new())
            .options(self.model_options());

        self.client
            .generate(request)
            .await
            .map_err(|e| AdvisorError::Initialization(format!("Failed to load model '{}': {e}", self.config.model)))?;

        tracing::info!("Model loaded successfully.");
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        if let Some(info) = self.prepare_model_file().await? {
            self.register_model_file(&info).await?;
        }
        self.ensure_model_available().await?;
        self.warm_up().await
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn initialize(&self) -> Result<()> {
        self.loaded.get_or_try_init(|| self.load()).await?;
        Ok(())
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        if !self.loaded.initialized() {
            return Err(AdvisorError::Generation(
                "LLM service not initialized. Call initialize first.".into(),
            ));
        }

        let request = self.build_request(prompt, options);
        let mut stream = tokio::select! {
            () = cancel.cancelled() => return Err(AdvisorError::Cancelled),
            stream = self.client.generate_stream(request) => {
                stream.map_err(|e| AdvisorError::Generation(e.to_string()))?
            }
        };

        let mut content = String::new();
        let mut chunks = 0usize;
        let mut usage = None;
        let mut done = false;

        while !done {
            let item = tokio::select! {
                () = cancel.cancelled() => return Err(AdvisorError::Cancelled),
                item = tokio::time::timeout(self.timeout(), stream.next()) => item.map_err(|_| {
                    AdvisorError::Generation(format!(
                        "Ollama produced no output for {}s",
                        self.config.timeout_secs
                    ))
                })?,
            };
            let Some(batch) = item else { break };
            let batch = batch.map_err(|e| AdvisorError::Generation(e.to_string()))?;

            for response in batch {
                if !response.response.is_empty() {
                    if chunks == 0 {
                        tracing::debug!(token = %response.response, "First token received");
                    }
                    chunks += 1;
                    if chunks % PROGRESS_EVERY == 0 {
                        tracing::trace!(chunks, "Generating...");
                    }
                    content.push_str(&response.response);
                }
                if response.done {
                    done = true;
                    usage = token_usage(
                        response.prompt_eval_count.map(count),
                        response.eval_count.map(count),
                    );
                }
            }
        }

        if chunks == 0 {
            tracing::error!(
                prompt_chars = prompt.len(),
                "No tokens generated - backend returned an empty sequence"
            );
        }

        let completion = Completion {
            content,
            usage,
            finish_reason: Some(finish_reason(usage, options.max_tokens)),
        };
        tracing::info!(
            chars = completion.content.len(),
            tokens = usage.map_or(0, |u| u.completion_tokens),
            "Generation finished"
        );
        Ok(completion)
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        // Llama tokenizer is roughly 4 chars per token
        u32::try_from(text.len() / 4).unwrap_or(u32::MAX)
    }
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AdvisorError::Initialization(format!("model file task failed: {e}")))?
}

/// Blob digest of a model file, as Ollama names it
fn file_digest(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// `/api/create` body building `model` from an uploaded GGUF blob
fn create_request(model: &str, path: &Path, digest: &str) -> Value {
    let file_name = path
        .file_name()
        .map_or_else(|| "model.gguf".to_string(), |n| n.to_string_lossy().into_owned());
    let mut files = Map::new();
    files.insert(file_name, Value::String(digest.to_string()));

    json!({
        "model": model,
        "files": files,
        "stream": false,
    })
}

fn count<N: TryInto<u32>>(n: N) -> u32 {
    n.try_into().unwrap_or(u32::MAX)
}

fn token_usage(prompt_tokens: Option<u32>, completion_tokens: Option<u32>) -> Option<TokenUsage> {
    let (prompt_tokens, completion_tokens) = (prompt_tokens?, completion_tokens?);
    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens.saturating_add(completion_tokens),
    })
}

/// Generation hit the token cap rather than a stop sequence
fn finish_reason(usage: Option<TokenUsage>, max_tokens: u32) -> FinishReason {
    match usage {
        Some(u) if u.completion_tokens >= max_tokens => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

/// Whether `model` appears in the backend's list, allowing an implicit `:latest`
fn model_listed(names: &[&str], model: &str) -> bool {
    names.iter().any(|name| {
        *name == model || (!model.contains(':') && name.strip_suffix(":latest") == Some(model))
    })
}
