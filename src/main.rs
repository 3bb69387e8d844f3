mod collectors;
mod config;
mod diagnostic;
mod gemini;
mod history;
mod http;
mod metrics;
mod poller;
mod state;

use axum::serve;
use clap::Parser;
use collectors::system::HostProbe;
use collectors::{HttpMetricsSource, Sampler};
use config::Config;
use diagnostic::DiagnosticController;
use gemini::GeminiClient;
use http::HttpAppState;
use metrics::{now_unix, Metrics};
use poller::PollLoop;
use reqwest::Client;
use state::State;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sysdash")]
#[command(version)]
struct Cli {
    /// YAML config; built-in defaults are used when omitted
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    print_default_config: bool,
    /// Start with the poll loop stopped
    #[arg(long)]
    start_paused: bool,
    #[arg(long, conflicts_with = "agent_off")]
    agent_on: bool,
    #[arg(long, conflicts_with = "agent_on")]
    agent_off: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if cli.start_paused {
        cfg.poll.start_paused = true;
    }
    if cli.agent_on {
        cfg.agent.enabled = true;
    } else if cli.agent_off {
        cfg.agent.enabled = false;
    }

    let api_key = cfg.diagnostic_api_key();
    if api_key.is_empty() {
        warn!(
            env = %cfg.diagnostic.api_key_env,
            "no diagnostic API key configured, requests will likely be rejected"
        );
    }

    info!(
        listen = %cfg.listen,
        source = %cfg.source.url,
        interval = %humantime::format_duration(cfg.poll.interval),
        history_capacity = cfg.poll.history_capacity,
        agent = cfg.agent.enabled,
        "starting sysdash"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let client = match Client::builder().user_agent("sysdash/0.1.0").build() {
        Ok(client) => client,
        Err(err) => {
            warn!(error = %err, "falling back to default HTTP client");
            Client::new()
        }
    };

    let shared_state = State::new(now_unix(), cfg.poll.history_capacity).shared();
    let sampler = Sampler::new(HttpMetricsSource::new(client.clone(), cfg.source.url.clone()));
    let (poll, poll_control) = PollLoop::new(
        sampler,
        shared_state.clone(),
        metrics.clone(),
        cfg.poll.interval,
        !cfg.poll.start_paused,
    );
    let diagnostics = DiagnosticController::new(
        GeminiClient::new(
            client,
            cfg.diagnostic.endpoint.clone(),
            cfg.diagnostic.model.clone(),
            api_key,
        ),
        metrics.clone(),
        cfg.diagnostic.title.clone(),
    );

    let listener = match http::bind(&cfg.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "failed to start HTTP server");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let app = HttpAppState {
            metrics: metrics.clone(),
            state: shared_state.clone(),
            poll: poll_control,
            diagnostics,
            host: cfg
                .agent
                .enabled
                .then(|| Arc::new(Mutex::new(HostProbe::new()))),
        };
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(listener, http::build_router(app)).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let poll_task = tokio::spawn(poll.run(shutdown_rx));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = poll_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
