pub mod live;
pub mod synthetic;
pub mod system;

use crate::state::{Sample, SourceMode};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub use live::{HttpMetricsSource, SourceError};

/// Body served by a live metrics endpoint. Every numeric field is required;
/// a body missing one of them is treated as malformed. A `timestamp` that is
/// not a string is ignored.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LiveReading {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: f64,
    #[serde(
        default,
        deserialize_with = "label_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
}

fn label_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(label) => Ok(Some(label)),
        _ => Ok(None),
    }
}

impl LiveReading {
    fn into_sample(self, clock_label: String) -> Sample {
        let timestamp = self
            .timestamp
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(clock_label);
        Sample {
            timestamp,
            cpu: self.cpu,
            memory: self.memory,
            disk: self.disk,
            network: self.network,
        }
    }
}

pub trait LiveSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<LiveReading, SourceError>> + Send;
}

/// Outcome of one acquisition attempt, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquired {
    Live(Sample),
    Synthetic(Sample),
}

impl Acquired {
    pub fn mode(&self) -> SourceMode {
        match self {
            Self::Live(_) => SourceMode::Live,
            Self::Synthetic(_) => SourceMode::Simulation,
        }
    }

    pub fn sample(&self) -> &Sample {
        match self {
            Self::Live(s) | Self::Synthetic(s) => s,
        }
    }

    pub fn into_sample(self) -> Sample {
        match self {
            Self::Live(s) | Self::Synthetic(s) => s,
        }
    }
}

pub struct Sampler<S> {
    source: Arc<S>,
}

impl<S> Clone for Sampler<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<S: LiveSource> Sampler<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// Tries the live source once and falls back to synthetic readings on any
    /// failure. Never fails.
    pub async fn sample(&self, clock_label: String) -> Acquired {
        match self.source.fetch().await {
            Ok(reading) => Acquired::Live(reading.into_sample(clock_label)),
            Err(err) => {
                debug!(error = %err, "live source unavailable, using simulation");
                Acquired::Synthetic(synthetic::synthesize(&mut rand::rng(), clock_label))
            }
        }
    }
}
