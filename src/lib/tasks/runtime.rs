use async_trait::async_trait;

use super::types::{Config, ContainerStatus, ExecutionResult, RuntimeError};

/// Start/stop primitives of a container engine.
///
/// Implementations do not retry: any error is the final outcome of that call
/// and is recorded by the caller as-is.
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn run(&self, config: &Config) -> Result<ExecutionResult, RuntimeError>;

    async fn stop(&self, container_id: &str) -> Result<ExecutionResult, RuntimeError>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, RuntimeError>;
}
