use crate::collectors::Acquired;
use crate::history::HistoryBuffer;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedState = Arc<RwLock<State>>;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Sample {
    pub timestamp: String,
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: f64,
}

/// Provenance of the most recent sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceMode {
    #[default]
    Connecting,
    Live,
    Simulation,
}

impl SourceMode {
    pub const ALL: [SourceMode; 3] = [Self::Connecting, Self::Live, Self::Simulation];

    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Live => "LIVE",
            Self::Simulation => "SIMULATION",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub last_sample_unix: i64,
    pub mode: SourceMode,
    pub history: HistoryBuffer,
}

impl State {
    pub fn new(now_unix: i64, history_capacity: usize) -> Self {
        Self {
            started_at_unix: now_unix,
            history: HistoryBuffer::with_capacity(history_capacity),
            ..Self::default()
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    pub fn record(&mut self, acquired: Acquired, now_unix: i64) {
        self.mode = acquired.mode();
        self.last_sample_unix = now_unix;
        self.history.append(acquired.into_sample());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64) -> Sample {
        Sample {
            timestamp: "12:00:00".to_string(),
            cpu,
            memory: 1.0,
            disk: 2.0,
            network: 3.0,
        }
    }

    #[test]
    fn mode_follows_most_recent_sample() {
        let mut state = State::new(100, 5);
        assert_eq!(state.mode, SourceMode::Connecting);

        state.record(Acquired::Live(sample(1.0)), 101);
        assert_eq!(state.mode, SourceMode::Live);

        state.record(Acquired::Synthetic(sample(2.0)), 102);
        assert_eq!(state.mode, SourceMode::Simulation);

        state.record(Acquired::Live(sample(3.0)), 103);
        assert_eq!(state.mode, SourceMode::Live);
        assert_eq!(state.last_sample_unix, 103);
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn mode_serializes_as_upper_case_label() {
        for mode in SourceMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.label()));
        }
    }
}
