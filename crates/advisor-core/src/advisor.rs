//! Advisor Orchestrator
//!
//! Answers one user query by alternating between the completion provider
//! and the tool catalog until the model produces an answer without a tool
//! call, or the iteration budget runs out.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{AdvisorError, Result};
use crate::history::ConversationHistory;
use crate::parser::parse_tool_call;
use crate::prompt::{self, DEFAULT_INTRO};
use crate::provider::{CompletionProvider, GenerationOptions};
use crate::tool::{ToolCatalog, ToolDescriptor, ToolInvocation, ToolOutcome};

/// Default completion/tool round trips per query
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// Advisor configuration
#[derive(Clone, Debug)]
pub struct AdvisorConfig {
    /// Persona line that opens the system preamble
    pub intro: String,

    /// Maximum completion/tool round trips per query
    pub max_iterations: usize,

    /// Generation options
    pub generation: GenerationOptions,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            intro: DEFAULT_INTRO.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            generation: GenerationOptions::default(),
        }
    }
}

/// The advisor orchestrator
///
/// Queries against one advisor run one at a time, in arrival order.
pub struct Advisor {
    completions: Arc<dyn CompletionProvider>,
    catalog: Arc<dyn ToolCatalog>,
    config: AdvisorConfig,
    tools: OnceCell<Vec<ToolDescriptor>>,
    turn: Mutex<()>,
}

impl Advisor {
    pub fn new(
        completions: Arc<dyn CompletionProvider>,
        catalog: Arc<dyn ToolCatalog>,
        config: AdvisorConfig,
    ) -> Self {
        Self {
            completions,
            catalog,
            config,
            tools: OnceCell::new(),
            turn: Mutex::new(()),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(
        completions: Arc<dyn CompletionProvider>,
        catalog: Arc<dyn ToolCatalog>,
    ) -> Self {
        Self::new(completions, catalog, AdvisorConfig::default())
    }

    /// Start both providers and cache the tool catalog.
    ///
    /// Concurrent callers share one attempt. A failed attempt caches nothing,
    /// so the next call starts over.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<&[ToolDescriptor]> {
        let tools = self
            .tools
            .get_or_try_init(|| async {
                self.completions
                    .initialize()
                    .await
                    .map_err(|e| init_failure("completion provider", e))?;
                tracing::info!(provider = self.completions.name(), "LLM initialized");

                self.catalog
                    .initialize()
                    .await
                    .map_err(|e| init_failure("tool catalog", e))?;
                tracing::info!("Tool catalog initialized");

                let tools = self
                    .catalog
                    .list_tools(cancel)
                    .await
                    .map_err(|e| init_failure("tool listing", e))?;
                tracing::info!(count = tools.len(), "Tools listed");
                Ok::<_, AdvisorError>(tools)
            })
            .await?;

        Ok(tools.as_slice())
    }

    /// Whether the catalog has been fetched
    pub fn is_ready(&self) -> bool {
        self.tools.initialized()
    }

    /// Cached tool catalog, if initialized
    pub fn tools(&self) -> Option<&[ToolDescriptor]> {
        self.tools.get().map(Vec::as_slice)
    }

    /// Get configuration
    pub const fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Answer a user query.
    ///
    /// Returns the final answer trimmed. When the iteration budget is spent
    /// without an answer, the whole transcript is returned instead of an
    /// error.
    pub async fn process_query(&self, user_query: &str, cancel: &CancellationToken) -> Result<String> {
        let span = tracing::info_span!("query", id = %uuid::Uuid::new_v4());
        self.run(user_query, cancel).instrument(span).await
    }

    async fn run(&self, user_query: &str, cancel: &CancellationToken) -> Result<String> {
        let _turn = until_cancelled(cancel, self.turn.lock()).await?;
        let tools = self.initialize(cancel).await?;

        tracing::info!("Processing query...");
        let mut history =
            ConversationHistory::seeded(prompt::initial_prompt(&self.config.intro, tools, user_query));

        for iteration in 0..self.config.max_iterations {
            tracing::debug!(iteration = iteration + 1, "Generating response");
            let prompt_text = history.render();
            let completion = until_cancelled(
                cancel,
                self.completions
                    .generate(&prompt_text, &self.config.generation, cancel),
            )
            .await??;

            if let Some(usage) = completion.usage {
                tracing::debug!(tokens = usage.completion_tokens, "Completion usage");
            }
            history.push_completion(&completion.content);

            let Some(invocation) = parse_tool_call(&completion.content) else {
                tracing::info!("Final response ready");
                return Ok(completion.content.trim().to_string());
            };

            tracing::info!(tool = %invocation.name, "Tool call detected");
            let outcome = self.execute_tool(&invocation, cancel).await?;
            history.push_tool_result(&outcome.into_text(&invocation.name));
        }

        tracing::warn!(max = self.config.max_iterations, "Max iterations reached");
        Ok(history.render())
    }

    /// Execute a tool call, folding failures into the outcome
    async fn execute_tool(
        &self,
        invocation: &ToolInvocation,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome> {
        let call = self
            .catalog
            .call_tool(&invocation.name, &invocation.arguments, cancel);

        match until_cancelled(cancel, call).await? {
            Ok(text) => {
                tracing::info!(tool = %invocation.name, chars = text.len(), "Tool result received");
                Ok(ToolOutcome::Ok(text))
            }
            Err(AdvisorError::Cancelled) => Err(AdvisorError::Cancelled),
            Err(e) => {
                tracing::error!(tool = %invocation.name, error = %e, "Tool error");
                Ok(ToolOutcome::Failed(e.detail()))
            }
        }
    }
}

fn init_failure(stage: &str, err: AdvisorError) -> AdvisorError {
    match err {
        AdvisorError::Cancelled => AdvisorError::Cancelled,
        other => AdvisorError::Initialization(format!("{stage}: {}", other.detail())),
    }
}

/// Race a provider future against cancellation
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AdvisorError::Cancelled),
        output = fut => Ok(output),
    }
}

/// Builder for Advisor configuration
pub struct AdvisorBuilder {
    completions: Option<Arc<dyn CompletionProvider>>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    config: AdvisorConfig,
}

impl Default for AdvisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisorBuilder {
    pub fn new() -> Self {
        Self {
            completions: None,
            catalog: None,
            config: AdvisorConfig::default(),
        }
    }

    #[must_use]
    pub fn completions(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.completions = Some(provider);
        self
    }

    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    #[must_use]
    pub fn intro(mut self, intro: impl Into<String>) -> Self {
        self.config.intro = intro.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    #[must_use]
    pub const fn max_tokens(mut self, max: u32) -> Self {
        self.config.generation.max_tokens = max;
        self
    }

    #[must_use]
    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn build(self) -> Result<Advisor> {
        let completions = self
            .completions
            .ok_or_else(|| AdvisorError::Config("Completion provider is required".into()))?;
        let catalog = self
            .catalog
            .ok_or_else(|| AdvisorError::Config("Tool catalog is required".into()))?;

        Ok(Advisor::new(completions, catalog, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Completion;
    use crate::tool::ToolArguments;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Completion provider replaying a script; repeats the last entry
    struct Scripted {
        replies: std::sync::Mutex<VecDeque<String>>,
        prompts: std::sync::Mutex<Vec<String>>,
        inits: AtomicUsize,
        fail_init: bool,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: std::sync::Mutex::new(replies.iter().map(ToString::to_string).collect()),
                prompts: std::sync::Mutex::new(Vec::new()),
                inits: AtomicUsize::new(0),
                fail_init: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                replies: std::sync::Mutex::new(VecDeque::new()),
                prompts: std::sync::Mutex::new(Vec::new()),
                inits: AtomicUsize::new(0),
                fail_init: true,
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn initialize(&self) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(AdvisorError::Other("model file missing".into()));
            }
            Ok(())
        }

        async fn generate(
            &self,
            prompt: &str,
            _options: &GenerationOptions,
            _cancel: &CancellationToken,
        ) -> Result<Completion> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap_or_default()
            };
            Ok(Completion::text(reply))
        }
    }

    /// Completion provider that never answers
    struct Stalled;

    #[async_trait]
    impl CompletionProvider for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
            _cancel: &CancellationToken,
        ) -> Result<Completion> {
            std::future::pending().await
        }
    }

    /// Completion provider whose backend always fails
    struct Failing;

    #[async_trait]
    impl CompletionProvider for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
            _cancel: &CancellationToken,
        ) -> Result<Completion> {
            Err(AdvisorError::Generation("out of memory".into()))
        }
    }

    /// Tool catalog whose calls never finish
    struct Hanging;

    #[async_trait]
    impl ToolCatalog for Hanging {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn list_tools(&self, _cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>> {
            Ok(vec![ToolDescriptor::new("get_daily_sleep", "Gets daily sleep data.")])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: &ToolArguments,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            std::future::pending().await
        }
    }

    /// Tool catalog recording calls; `broken_tool` always fails
    struct Recording {
        tools: Vec<ToolDescriptor>,
        calls: std::sync::Mutex<Vec<(String, ToolArguments)>>,
        lists: AtomicUsize,
    }

    impl Recording {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                tools: vec![
                    ToolDescriptor::new("get_daily_sleep", "Gets daily sleep data."),
                    ToolDescriptor::new("broken_tool", "Always fails."),
                ],
                calls: std::sync::Mutex::new(Vec::new()),
                lists: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolCatalog for Recording {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn list_tools(&self, _cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: &ToolArguments,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.clone()));
            match name {
                "broken_tool" => Err(AdvisorError::ToolExecution("upstream returned 502".into())),
                "silent_tool" => Ok(String::new()),
                _ => Ok(r#"{"score": 82}"#.into()),
            }
        }
    }

    fn advisor(completions: Arc<dyn CompletionProvider>, catalog: Arc<dyn ToolCatalog>) -> Advisor {
        AdvisorBuilder::new()
            .completions(completions)
            .catalog(catalog)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_direct_answer_after_one_generation() {
        let llm = Scripted::new(&["  You slept well.  \n"]);
        let tools = Recording::new();
        let advisor = advisor(llm.clone(), tools.clone());

        let answer = advisor
            .process_query("How did I sleep?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer, "You slept well.");
        assert_eq!(llm.prompts().len(), 1);
        assert_eq!(tools.call_count(), 0);
        assert!(llm.prompts()[0].contains("- get_daily_sleep: Gets daily sleep data."));
        assert!(llm.prompts()[0].ends_with("User: How did I sleep?\n\nAssistant:\n"));
    }

    #[tokio::test]
    async fn test_tool_result_fed_back() {
        let llm = Scripted::new(&[
            "TOOL_CALL: get_daily_sleep\nARGUMENTS: {\"start_date\": \"2024-05-01\"}",
            "Your sleep score was 82.",
        ]);
        let tools = Recording::new();
        let advisor = advisor(llm.clone(), tools.clone());

        let answer = advisor
            .process_query("Sleep score?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer, "Your sleep score was 82.");
        let calls = tools.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "get_daily_sleep");
        assert_eq!(calls[0].1.get("start_date"), Some(&serde_json::json!("2024-05-01")));
        assert!(llm.prompts()[1].ends_with("\n\nTool Result: {\"score\": 82}\n\n"));
    }

    #[tokio::test]
    async fn test_iteration_cap_returns_transcript() {
        let llm = Scripted::new(&["TOOL_CALL: get_daily_sleep\nARGUMENTS: {}"]);
        let tools = Recording::new();
        let advisor = advisor(llm.clone(), tools.clone());

        let answer = advisor
            .process_query("Loop forever", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(tools.call_count(), DEFAULT_MAX_ITERATIONS);
        assert_eq!(llm.prompts().len(), DEFAULT_MAX_ITERATIONS);
        assert!(answer.contains("User: Loop forever"));
        assert_eq!(answer.matches("Tool Result:").count(), DEFAULT_MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn test_tool_failure_is_absorbed() {
        let llm = Scripted::new(&["TOOL_CALL: broken_tool\nARGUMENTS: {}", "Sorry, no data."]);
        let tools = Recording::new();
        let advisor = advisor(llm.clone(), tools.clone());

        let answer = advisor
            .process_query("Stress?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(answer, "Sorry, no data.");
        let second_prompt = &llm.prompts()[1];
        assert!(second_prompt.contains("Error calling tool broken_tool: upstream returned 502"));
    }

    #[tokio::test]
    async fn test_empty_tool_text_passed_through() {
        let llm = Scripted::new(&["TOOL_CALL: silent_tool", "Done."]);
        let advisor = advisor(llm.clone(), Recording::new());

        advisor.process_query("Tags?", &CancellationToken::new()).await.unwrap();
        assert!(llm.prompts()[1].ends_with("TOOL_CALL: silent_tool\n\nTool Result: \n\n"));
    }

    #[tokio::test]
    async fn test_generation_failure_aborts_query() {
        let tools = Recording::new();
        let advisor = advisor(Arc::new(Failing), tools.clone());

        let result = advisor.process_query("How did I sleep?", &CancellationToken::new()).await;
        assert!(matches!(result, Err(AdvisorError::Generation(msg)) if msg == "out of memory"));
        assert_eq!(tools.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_tool_call_aborts_query() {
        let llm = Scripted::new(&["TOOL_CALL: get_daily_sleep\nARGUMENTS: {}", "Never reached."]);
        let advisor = Arc::new(advisor(llm.clone(), Arc::new(Hanging)));
        let cancel = CancellationToken::new();

        let task = {
            let advisor = Arc::clone(&advisor);
            let cancel = cancel.clone();
            tokio::spawn(async move { advisor.process_query("Sleep?", &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("query should stop promptly")
            .unwrap();
        assert!(matches!(result, Err(AdvisorError::Cancelled)));
        assert_eq!(llm.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_fetched_once() {
        let llm = Scripted::new(&["Fine."]);
        let tools = Recording::new();
        let advisor = advisor(llm.clone(), tools.clone());
        let cancel = CancellationToken::new();

        assert!(!advisor.is_ready());
        advisor.process_query("a", &cancel).await.unwrap();
        advisor.process_query("b", &cancel).await.unwrap();
        advisor.initialize(&cancel).await.unwrap();

        assert!(advisor.is_ready());
        assert_eq!(tools.lists.load(Ordering::SeqCst), 1);
        assert_eq!(llm.inits.load(Ordering::SeqCst), 1);
        assert_eq!(advisor.tools().map(<[_]>::len), Some(2));
    }

    #[tokio::test]
    async fn test_initialization_failure_is_retried() {
        let llm = Scripted::failing();
        let advisor = advisor(llm.clone(), Recording::new());
        let cancel = CancellationToken::new();

        let first = advisor.process_query("hi", &cancel).await;
        assert!(matches!(first, Err(AdvisorError::Initialization(msg)) if msg.contains("model file missing")));
        assert!(!advisor.is_ready());

        let second = advisor.initialize(&cancel).await;
        assert!(second.is_err());
        assert_eq!(llm.inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_during_generation() {
        let tools = Recording::new();
        let advisor = Arc::new(advisor(Arc::new(Stalled), tools.clone()));
        let cancel = CancellationToken::new();

        let task = {
            let advisor = Arc::clone(&advisor);
            let cancel = cancel.clone();
            tokio::spawn(async move { advisor.process_query("hi", &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("query should stop promptly")
            .unwrap();
        assert!(matches!(result, Err(AdvisorError::Cancelled)));
        assert_eq!(tools.call_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_iterations_returns_seed_prompt() {
        let llm = Scripted::new(&["unused"]);
        let advisor = AdvisorBuilder::new()
            .completions(llm.clone())
            .catalog(Arc::new(crate::tool::ToolRegistry::new()))
            .max_iterations(0)
            .build()
            .unwrap();

        let answer = advisor.process_query("q", &CancellationToken::new()).await.unwrap();
        assert!(answer.contains("No tools available."));
        assert!(llm.prompts().is_empty());
    }

    #[test]
    fn test_builder_requires_providers() {
        let missing = AdvisorBuilder::new().catalog(Recording::new()).build();
        assert!(matches!(missing, Err(AdvisorError::Config(_))));
    }
}
