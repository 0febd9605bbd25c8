use std::time::Duration;

use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct WorkerConfig {
    #[arg(long, env = "CUBE_WORKER_NAME", default_value = "worker")]
    pub name: String,

    #[arg(long, env = "CUBE_WORKER_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "CUBE_WORKER_PORT", default_value_t = 5555)]
    pub port: u16,

    /// Seconds the run loop sleeps when its queue is empty.
    #[arg(long, env = "CUBE_WORKER_RUN_INTERVAL", default_value_t = 10)]
    pub run_interval: u64,

    #[arg(long, env = "CUBE_WORKER_STATS_INTERVAL", default_value_t = 15)]
    pub stats_interval: u64,

    /// Seconds between container status checks.
    #[arg(long, env = "CUBE_WORKER_MONITOR_INTERVAL", default_value_t = 15)]
    pub monitor_interval: u64,
}

impl WorkerConfig {
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ManagerConfig {
    #[arg(long, env = "CUBE_MANAGER_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "CUBE_MANAGER_PORT", default_value_t = 5556)]
    pub port: u16,

    /// Worker addresses (`host:port`), in round-robin order.
    #[arg(
        long = "worker",
        env = "CUBE_WORKERS",
        value_delimiter = ',',
        required = true
    )]
    pub workers: Vec<String>,

    #[arg(long, env = "CUBE_MANAGER_DISPATCH_INTERVAL", default_value_t = 10)]
    pub dispatch_interval: u64,

    #[arg(long, env = "CUBE_MANAGER_RECONCILE_INTERVAL", default_value_t = 10)]
    pub reconcile_interval: u64,

    /// Upper bound in seconds on any single request to a worker.
    #[arg(long, env = "CUBE_MANAGER_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout: u64,

    #[arg(long, env = "CUBE_MANAGER_MAX_DISPATCH_ATTEMPTS", default_value_t = 3)]
    pub max_dispatch_attempts: u32,
}

impl ManagerConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}
