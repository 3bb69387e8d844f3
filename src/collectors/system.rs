use super::LiveReading;
use std::time::Instant;
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};

/// Reads this host's cpu/memory/disk/network in the live-source wire format,
/// so a running instance can act as the live source for a dashboard.
pub struct HostProbe {
    system: System,
    last_net: Option<(u64, Instant)>,
}

impl HostProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_disks_list();
        system.refresh_networks_list();
        Self {
            system,
            last_net: None,
        }
    }

    pub fn read(&mut self, timestamp: String) -> LiveReading {
        let system = &mut self.system;
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks_list();
        system.refresh_disks();
        system.refresh_networks_list();
        system.refresh_networks();

        let cpu = if system.cpus().is_empty() {
            0.0
        } else {
            let sum: f32 = system.cpus().iter().map(|c| c.cpu_usage()).sum();
            (sum / system.cpus().len() as f32) as f64
        };

        let memory = percent(system.used_memory() as f64, system.total_memory() as f64);

        let (disk_used, disk_total) = system.disks().iter().fold((0_u64, 0_u64), |acc, d| {
            let total = d.total_space();
            let used = total.saturating_sub(d.available_space());
            (acc.0.saturating_add(used), acc.1.saturating_add(total))
        });
        let disk = percent(disk_used as f64, disk_total as f64);

        let net_total = system
            .networks()
            .iter()
            .map(|(_, data)| data.total_received().saturating_add(data.total_transmitted()))
            .fold(0_u64, u64::saturating_add);
        let now = Instant::now();
        let network = match self.last_net {
            Some((prev_total, prev_at)) => {
                megabits_per_sec(net_total.saturating_sub(prev_total), now - prev_at)
            }
            None => 0.0,
        };
        self.last_net = Some((net_total, now));

        LiveReading {
            cpu: round1(cpu),
            memory: round1(memory),
            disk: round1(disk),
            network: round1(network),
            timestamp: Some(timestamp),
        }
    }
}

fn percent(used: f64, total: f64) -> f64 {
    if total > 0.0 {
        (used / total * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn megabits_per_sec(bytes: u64, elapsed: std::time::Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(0.001);
    (bytes as f64) * 8.0 / 1_000_000.0 / secs
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(5.0, 0.0), 0.0);
        assert_eq!(percent(25.0, 100.0), 25.0);
        assert_eq!(percent(150.0, 100.0), 100.0);
    }

    #[test]
    fn rate_in_megabits() {
        let rate = megabits_per_sec(1_000_000, Duration::from_secs(2));
        assert!((rate - 4.0).abs() < 1e-9);
    }

    #[test]
    fn probe_reports_bounded_readings() {
        let mut probe = HostProbe::new();
        let first = probe.read("01:02:03".to_string());
        assert_eq!(first.network, 0.0);
        assert_eq!(first.timestamp.as_deref(), Some("01:02:03"));

        let second = probe.read("01:02:04".to_string());
        for v in [second.cpu, second.memory, second.disk] {
            assert!((0.0..=100.0).contains(&v), "value {v}");
        }
        assert!(second.network >= 0.0);
    }
}
