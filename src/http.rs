use crate::collectors::system::HostProbe;
use crate::diagnostic::{DiagnosticBackend, DiagnosticController, DiagnosticState};
use crate::metrics::Metrics;
use crate::poller::{clock_label, PollControl, PollLoopState};
use crate::state::{Sample, SharedState, SourceMode};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("invalid listen address '{listen}': {source}")]
    Addr {
        listen: String,
        source: AddrParseError,
    },
    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Binds the API listener up front so startup can fail before any task runs.
pub async fn bind(listen: &str) -> Result<TcpListener, BindError> {
    let addr: SocketAddr = listen.parse().map_err(|source| BindError::Addr {
        listen: listen.to_string(),
        source,
    })?;
    TcpListener::bind(addr)
        .await
        .map_err(|source| BindError::Io { addr, source })
}

pub struct HttpAppState<B> {
    pub metrics: Arc<Metrics>,
    pub state: SharedState,
    pub poll: PollControl,
    pub diagnostics: DiagnosticController<B>,
    pub host: Option<Arc<Mutex<HostProbe>>>,
}

impl<B> Clone for HttpAppState<B> {
    fn clone(&self) -> Self {
        Self {
            metrics: self.metrics.clone(),
            state: self.state.clone(),
            poll: self.poll.clone(),
            diagnostics: self.diagnostics.clone(),
            host: self.host.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiState {
    pub started_at_unix: i64,
    pub last_sample_unix: i64,
    pub mode: SourceMode,
    pub poll: PollLoopState,
    pub history_capacity: usize,
    pub latest: Option<Sample>,
    pub history: Vec<Sample>,
    pub diagnostic: DiagnosticState,
}

#[derive(Debug, Clone, serde::Serialize)]
struct PollResponse {
    poll: PollLoopState,
}

pub fn build_router<B: DiagnosticBackend>(app: HttpAppState<B>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler::<B>))
        .route("/api/state", get(state_handler::<B>))
        .route("/api/history", get(history_handler::<B>))
        .route("/api/poll/pause", post(pause_handler::<B>))
        .route("/api/poll/resume", post(resume_handler::<B>))
        .route(
            "/api/diagnostic",
            get(diagnostic_handler::<B>)
                .post(diagnostic_request_handler::<B>)
                .delete(diagnostic_dismiss_handler::<B>),
        );
    if app.host.is_some() {
        router = router.route("/api/metrics", get(host_metrics_handler::<B>));
    }
    router.with_state(app)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler<B: DiagnosticBackend>(State(app): State<HttpAppState<B>>) -> Response {
    app.metrics.inc_scrape_count();
    {
        let guard = app.state.read().await;
        app.metrics.update_from_state(&guard);
    }
    match app.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler<B: DiagnosticBackend>(
    State(app): State<HttpAppState<B>>,
) -> impl IntoResponse {
    let diagnostic = app.diagnostics.state().await;
    let guard = app.state.read().await;
    Json(ApiState {
        started_at_unix: guard.started_at_unix,
        last_sample_unix: guard.last_sample_unix,
        mode: guard.mode,
        poll: app.poll.state(),
        history_capacity: guard.history.capacity(),
        latest: guard.history.latest(),
        history: guard.history.snapshot(),
        diagnostic,
    })
}

async fn history_handler<B: DiagnosticBackend>(
    State(app): State<HttpAppState<B>>,
) -> impl IntoResponse {
    let guard = app.state.read().await;
    Json(guard.history.snapshot())
}

async fn pause_handler<B: DiagnosticBackend>(
    State(app): State<HttpAppState<B>>,
) -> impl IntoResponse {
    Json(PollResponse {
        poll: app.poll.pause(),
    })
}

async fn resume_handler<B: DiagnosticBackend>(
    State(app): State<HttpAppState<B>>,
) -> impl IntoResponse {
    Json(PollResponse {
        poll: app.poll.resume(),
    })
}

async fn diagnostic_handler<B: DiagnosticBackend>(
    State(app): State<HttpAppState<B>>,
) -> impl IntoResponse {
    Json(app.diagnostics.state().await)
}

/// 202 when a call was started, 200 with the unchanged state when there is
/// nothing to diagnose yet.
async fn diagnostic_request_handler<B: DiagnosticBackend>(
    State(app): State<HttpAppState<B>>,
) -> impl IntoResponse {
    let started = app.diagnostics.request_latest(&app.state).await.is_some();
    let status = if started {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, Json(app.diagnostics.state().await))
}

async fn diagnostic_dismiss_handler<B: DiagnosticBackend>(
    State(app): State<HttpAppState<B>>,
) -> impl IntoResponse {
    app.diagnostics.dismiss().await;
    Json(app.diagnostics.state().await)
}

async fn host_metrics_handler<B: DiagnosticBackend>(
    State(app): State<HttpAppState<B>>,
) -> Response {
    let Some(host) = app.host else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let reading = host.lock().await.read(clock_label());
    Json(reading).into_response()
}
