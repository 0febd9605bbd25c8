use std::{sync::Arc, time::Duration};

use serde::{Serialize, Serializer};
use sysinfo::{Disks, System};
use tracing::debug;

use crate::worker::types::{SystemStats, Worker};

const MIB: u64 = 1024 * 1024;

/// Wire form of `SystemStats`: sizes in MB, usage as a percentage string.
#[derive(Serialize)]
struct StatsView<'a> {
    cpu_usage: String,
    total_memory: String,
    used_memory: String,
    total_swap: String,
    used_swap: String,
    system_name: &'a str,
    hostname: &'a str,
    total_cpus: u64,
    disk_usage: String,
    task_count: u64,
}

impl<'a> From<&'a SystemStats> for StatsView<'a> {
    fn from(stats: &'a SystemStats) -> Self {
        let mb = |v: u64| format!("{v} MB");
        StatsView {
            cpu_usage: format!("{:.2}%", stats.cpu_usage),
            total_memory: mb(stats.total_memory),
            used_memory: mb(stats.used_memory),
            total_swap: mb(stats.total_swap),
            used_swap: mb(stats.used_swap),
            system_name: &stats.system_name,
            hostname: &stats.hostname,
            total_cpus: stats.total_cpus,
            disk_usage: format!("{:.2}%", stats.disk_usage),
            task_count: stats.task_count,
        }
    }
}

impl Serialize for SystemStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StatsView::from(self).serialize(serializer)
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}

/// Share of disk space in use across every mounted disk.
fn disk_usage(disks: &Disks) -> f32 {
    let (used, total) = disks.iter().fold((0u64, 0u64), |(used, total), disk| {
        (
            used + disk.total_space().saturating_sub(disk.available_space()),
            total + disk.total_space(),
        )
    });
    percent(used, total)
}

/// Samples the host. `system` must have been refreshed by the caller.
pub fn sample(system: &System, disks: &Disks, task_count: u64) -> SystemStats {
    let unknown = || "unknown".to_string();
    SystemStats {
        cpu_usage: system.global_cpu_usage(),
        total_memory: system.total_memory() / MIB,
        used_memory: system.used_memory() / MIB,
        total_swap: system.total_swap() / MIB,
        used_swap: system.used_swap() / MIB,
        system_name: System::name().unwrap_or_else(unknown),
        hostname: System::host_name().unwrap_or_else(unknown),
        total_cpus: system.cpus().len() as u64,
        disk_usage: disk_usage(disks),
        task_count,
    }
}

/// Refreshes the worker's host statistics every `interval`.
pub async fn collect_stats(worker: Arc<Worker>, interval: Duration) {
    let mut system = System::new_all();
    loop {
        system.refresh_all();
        let disks = Disks::new_with_refreshed_list();
        let stats = sample(&system, &disks, worker.task_count());
        debug!(
            worker = %worker.name,
            cpu_usage = stats.cpu_usage,
            used_memory = stats.used_memory,
            disk_usage = stats.disk_usage,
            "collected system stats"
        );
        *worker.stats.write().await = Some(stats);
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_units() {
        let stats = SystemStats {
            cpu_usage: 12.5,
            total_memory: 2048,
            used_memory: 1024,
            total_swap: 0,
            used_swap: 0,
            system_name: "Linux".to_string(),
            hostname: "node-1".to_string(),
            total_cpus: 4,
            disk_usage: 50.0,
            task_count: 3,
        };

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["cpu_usage"], "12.50%");
        assert_eq!(json["used_memory"], "1024 MB");
        assert_eq!(json["total_swap"], "0 MB");
        assert_eq!(json["disk_usage"], "50.00%");
        assert_eq!(json["hostname"], "node-1");
        assert_eq!(json["total_cpus"], 4);
        assert_eq!(json["task_count"], 3);
    }

    #[test]
    fn percent_of_nothing_is_zero() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[test]
    fn sample_reports_task_count() {
        let stats = sample(&System::new(), &Disks::new(), 7);
        assert_eq!(stats.task_count, 7);
        assert_eq!(stats.disk_usage, 0.0);
    }
}
