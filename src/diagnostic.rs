use crate::metrics::Metrics;
use crate::state::{Sample, SharedState, SourceMode};
use reqwest::StatusCode;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const NO_ANALYSIS: &str = "No analysis available.";

#[derive(Debug, Error)]
pub enum DiagnosticError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("service rejected the request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

/// Text-generation service answering a diagnostic prompt. `Ok(None)` means
/// the call succeeded but carried no answer text.
pub trait DiagnosticBackend: Send + Sync + 'static {
    fn generate(
        &self,
        prompt: String,
    ) -> impl Future<Output = Result<Option<String>, DiagnosticError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum DiagnosticStatus {
    #[default]
    Idle,
    Loading,
    Completed(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct DiagnosticState {
    pub status: DiagnosticStatus,
    pub title: Option<String>,
    #[serde(skip)]
    dismissals: u64,
}

/// Owns the lifecycle of on-demand diagnostic calls.
///
/// Requests are never cancelled. When several are in flight the one that
/// finishes last decides the visible result; there is no sequencing between
/// them. Dismissing the result drops any answer still in flight.
pub struct DiagnosticController<B> {
    backend: Arc<B>,
    state: Arc<RwLock<DiagnosticState>>,
    metrics: Arc<Metrics>,
    title: String,
}

impl<B> Clone for DiagnosticController<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
            title: self.title.clone(),
        }
    }
}

impl<B: DiagnosticBackend> DiagnosticController<B> {
    pub fn new(backend: B, metrics: Arc<Metrics>, title: impl Into<String>) -> Self {
        Self {
            backend: Arc::new(backend),
            state: Arc::new(RwLock::new(DiagnosticState::default())),
            metrics,
            title: title.into(),
        }
    }

    pub async fn state(&self) -> DiagnosticState {
        self.state.read().await.clone()
    }

    pub async fn dismiss(&self) {
        let mut guard = self.state.write().await;
        guard.status = DiagnosticStatus::Idle;
        guard.title = None;
        guard.dismissals += 1;
    }

    /// Diagnoses the newest history entry under the current source mode.
    pub async fn request_latest(&self, shared: &SharedState) -> Option<JoinHandle<()>> {
        let (latest, mode) = {
            let guard = shared.read().await;
            (guard.history.latest(), guard.mode)
        };
        self.request(latest, mode).await
    }

    /// Starts one diagnostic call for `latest`. With no sample this is a
    /// no-op and returns `None`.
    pub async fn request(
        &self,
        latest: Option<Sample>,
        mode: SourceMode,
    ) -> Option<JoinHandle<()>> {
        let sample = latest?;

        let epoch = {
            let mut guard = self.state.write().await;
            guard.status = DiagnosticStatus::Loading;
            guard.title = Some(self.title.clone());
            guard.dismissals
        };
        info!(mode = mode.label(), timestamp = %sample.timestamp, "diagnostic requested");

        let prompt = build_prompt(&sample, mode);
        let backend = self.backend.clone();
        let state = self.state.clone();
        let metrics = self.metrics.clone();
        Some(tokio::spawn(async move {
            // The call runs in its own task so a panicking backend still ends
            // in `Failed` rather than leaving `Loading` behind.
            let call = tokio::spawn(async move { backend.generate(prompt).await });
            let status = match call.await {
                Ok(Ok(text)) => {
                    metrics.inc_diagnostic("completed");
                    let text = text
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| NO_ANALYSIS.to_string());
                    DiagnosticStatus::Completed(text)
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "diagnostic failed");
                    metrics.inc_diagnostic("failed");
                    DiagnosticStatus::Failed(format!("Diagnostic failed: {err}."))
                }
                Err(err) => {
                    warn!(error = %err, "diagnostic task aborted");
                    metrics.inc_diagnostic("failed");
                    DiagnosticStatus::Failed(format!("Diagnostic failed: {err}."))
                }
            };

            let mut guard = state.write().await;
            if guard.dismissals != epoch {
                debug!("diagnostic result arrived after dismissal, dropped");
                return;
            }
            guard.status = status;
        }))
    }
}

/// Prompt sent to the text-generation service. Wording is free; it must
/// carry the readings and the mode label.
pub fn build_prompt(sample: &Sample, mode: SourceMode) -> String {
    format!(
        "Act as a Senior SRE. Analyze my system ({} Mode):\n\
         CPU: {}%, RAM: {}%, Disk: {}%, Network: {} Mb/s.\n\
         Give a 1-sentence status and 1 actionable tip.",
        mode.label(),
        sample.cpu,
        sample.memory,
        sample.disk,
        sample.network
    )
}
