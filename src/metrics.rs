use crate::state::{SourceMode, State};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dashboard_cpu_usage_percent: Gauge,
    pub dashboard_memory_usage_percent: Gauge,
    pub dashboard_disk_usage_percent: Gauge,
    pub dashboard_network_mbps: Gauge,
    pub dashboard_source_mode: GaugeVec,
    pub dashboard_history_len: Gauge,
    pub dashboard_poll_running: Gauge,
    pub dashboard_samples_total: CounterVec,
    pub dashboard_live_source_errors_total: Counter,
    pub dashboard_diagnostic_requests_total: CounterVec,
    pub dashboard_last_sample_timestamp_seconds: Gauge,
    pub dashboard_uptime_seconds: Gauge,
    pub dashboard_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let dashboard_cpu_usage_percent = Gauge::with_opts(opts!(
            "dashboard_cpu_usage_percent",
            "CPU usage of the latest sample in percent"
        ))?;
        let dashboard_memory_usage_percent = Gauge::with_opts(opts!(
            "dashboard_memory_usage_percent",
            "Memory usage of the latest sample in percent"
        ))?;
        let dashboard_disk_usage_percent = Gauge::with_opts(opts!(
            "dashboard_disk_usage_percent",
            "Disk usage of the latest sample in percent"
        ))?;
        let dashboard_network_mbps = Gauge::with_opts(opts!(
            "dashboard_network_mbps",
            "Network rate of the latest sample in Mb/s"
        ))?;
        let dashboard_source_mode = GaugeVec::new(
            opts!(
                "dashboard_source_mode",
                "1 for the mode that produced the latest sample, 0 otherwise"
            ),
            &["mode"],
        )?;
        let dashboard_history_len = Gauge::with_opts(opts!(
            "dashboard_history_len",
            "Number of samples currently held in history"
        ))?;
        let dashboard_poll_running = Gauge::with_opts(opts!(
            "dashboard_poll_running",
            "Poll loop state 0/1"
        ))?;
        let dashboard_samples_total = CounterVec::new(
            opts!(
                "dashboard_samples_total",
                "Samples recorded total by mode"
            ),
            &["mode"],
        )?;
        let dashboard_live_source_errors_total = Counter::with_opts(opts!(
            "dashboard_live_source_errors_total",
            "Ticks where the live source failed and simulation was used"
        ))?;
        let dashboard_diagnostic_requests_total = CounterVec::new(
            opts!(
                "dashboard_diagnostic_requests_total",
                "Finished diagnostic requests total by outcome"
            ),
            &["outcome"],
        )?;
        let dashboard_last_sample_timestamp_seconds = Gauge::with_opts(opts!(
            "dashboard_last_sample_timestamp_seconds",
            "Unix timestamp of the last recorded sample"
        ))?;
        let dashboard_uptime_seconds = Gauge::with_opts(opts!(
            "dashboard_uptime_seconds",
            "Dashboard uptime in seconds"
        ))?;
        let dashboard_scrape_count_total = Counter::with_opts(opts!(
            "dashboard_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &dashboard_cpu_usage_percent)?;
        register(&registry, &dashboard_memory_usage_percent)?;
        register(&registry, &dashboard_disk_usage_percent)?;
        register(&registry, &dashboard_network_mbps)?;
        register(&registry, &dashboard_source_mode)?;
        register(&registry, &dashboard_history_len)?;
        register(&registry, &dashboard_poll_running)?;
        register(&registry, &dashboard_samples_total)?;
        register(&registry, &dashboard_live_source_errors_total)?;
        register(&registry, &dashboard_diagnostic_requests_total)?;
        register(&registry, &dashboard_last_sample_timestamp_seconds)?;
        register(&registry, &dashboard_uptime_seconds)?;
        register(&registry, &dashboard_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            dashboard_cpu_usage_percent,
            dashboard_memory_usage_percent,
            dashboard_disk_usage_percent,
            dashboard_network_mbps,
            dashboard_source_mode,
            dashboard_history_len,
            dashboard_poll_running,
            dashboard_samples_total,
            dashboard_live_source_errors_total,
            dashboard_diagnostic_requests_total,
            dashboard_last_sample_timestamp_seconds,
            dashboard_uptime_seconds,
            dashboard_scrape_count_total,
        }))
    }

    pub fn update_from_state(&self, state: &State) {
        if let Some(latest) = state.history.latest() {
            self.dashboard_cpu_usage_percent.set(latest.cpu);
            self.dashboard_memory_usage_percent.set(latest.memory);
            self.dashboard_disk_usage_percent.set(latest.disk);
            self.dashboard_network_mbps.set(latest.network);
        }
        for mode in SourceMode::ALL {
            self.dashboard_source_mode
                .with_label_values(&[mode.label()])
                .set(if mode == state.mode { 1.0 } else { 0.0 });
        }
        self.dashboard_history_len.set(state.history.len() as f64);
        self.dashboard_last_sample_timestamp_seconds
            .set(state.last_sample_unix as f64);

        let uptime = now_unix().saturating_sub(state.started_at_unix) as f64;
        self.dashboard_uptime_seconds.set(uptime);
    }

    pub fn inc_sample(&self, mode: SourceMode) {
        self.dashboard_samples_total
            .with_label_values(&[mode.label()])
            .inc();
        if mode == SourceMode::Simulation {
            self.dashboard_live_source_errors_total.inc();
        }
    }

    pub fn set_poll_running(&self, running: bool) {
        self.dashboard_poll_running
            .set(if running { 1.0 } else { 0.0 });
    }

    pub fn inc_diagnostic(&self, outcome: &str) {
        self.dashboard_diagnostic_requests_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.dashboard_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
