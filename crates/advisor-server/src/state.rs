//! Application State

use std::sync::Arc;

use advisor_core::{Advisor, CancellationToken};
use serde::Serialize;
use tokio::sync::watch;

/// Advisor readiness as seen by the sidebar
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    /// Model and tool server still starting
    Initializing,
    /// Catalog fetched, queries accepted
    Ready { tools: usize },
    /// Startup failed; the next query retries it
    Failed { error: String },
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The orchestrator
    pub advisor: Arc<Advisor>,

    /// Published readiness
    pub readiness: Arc<watch::Sender<Readiness>>,
}

impl AppState {
    pub fn new(advisor: Arc<Advisor>) -> Self {
        let (readiness, _) = watch::channel(Readiness::Initializing);
        Self {
            advisor,
            readiness: Arc::new(readiness),
        }
    }

    /// Current readiness snapshot
    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    /// Publish the outcome of an initialization attempt
    pub fn publish(&self, outcome: Readiness) {
        self.readiness.send_replace(outcome);
    }

    /// Run advisor initialization and publish how it went
    pub async fn initialize(&self, cancel: &CancellationToken) {
        match self.advisor.initialize(cancel).await {
            Ok(tools) => {
                tracing::info!(tools = tools.len(), "Advisor ready");
                for tool in tools {
                    tracing::info!("  • {}", tool.name);
                }
                self.publish(Readiness::Ready { tools: tools.len() });
            }
            Err(e) => {
                tracing::error!(error = %e, "Advisor initialization failed");
                self.publish(Readiness::Failed { error: e.to_string() });
            }
        }
    }

    /// Mark ready once the advisor has its catalog
    pub fn sync_ready(&self) {
        if let Some(tools) = self.advisor.tools() {
            let ready = Readiness::Ready { tools: tools.len() };
            self.readiness.send_if_modified(|current| {
                let changed = *current != ready;
                if changed {
                    *current = ready.clone();
                }
                changed
            });
        }
    }
}
