use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    image::CreateImageOptions,
    models::{
        ContainerStateStatusEnum, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
    },
};
use futures_util::stream::StreamExt;
use tracing::{debug, error, info};

use super::runtime::Runtime;
use super::types::{Action, Config, ContainerStatus, ExecutionResult, RuntimeError};

/// Docker Engine driver, one connection shared by every task on the worker.
#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
}

impl DockerClient {
    pub fn new() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_unix_defaults()?;
        Ok(DockerClient { client })
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image, "pulling image");

        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(msg) = stream.next().await {
            let info = msg.inspect_err(|e| error!(image, error = %e, "image pull failed"))?;
            if let Some(status) = info.status {
                debug!(image, %status, "pull progress");
            }
        }

        info!(image, "image pulled");
        Ok(())
    }
}

fn container_config(config: &Config) -> ContainerConfig<String> {
    let restart_policy = RestartPolicy {
        name: Some(
            config
                .restart_policy
                .parse()
                .unwrap_or(RestartPolicyNameEnum::NO),
        ),
        maximum_retry_count: None,
    };

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = config
        .port_bindings
        .iter()
        .map(|(container_port, host_port)| {
            (
                container_port.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.clone()),
                }]),
            )
        })
        .collect();

    let host_config = HostConfig {
        restart_policy: Some(restart_policy),
        nano_cpus: Some((config.cpu * 1_000_000_000.0) as i64),
        memory: Some(config.memory),
        port_bindings: Some(port_bindings),
        publish_all_ports: Some(true),
        ..Default::default()
    };

    ContainerConfig {
        image: Some(config.image.clone()),
        env: Some(config.env.clone()),
        cmd: (!config.cmd.is_empty()).then(|| config.cmd.clone()),
        exposed_ports: Some(
            config
                .exposed_ports
                .iter()
                .map(|port| (format!("{port}/tcp"), HashMap::new()))
                .collect(),
        ),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl Runtime for DockerClient {
    async fn run(&self, config: &Config) -> Result<ExecutionResult, RuntimeError> {
        self.pull_image(&config.image).await?;

        let options = Some(CreateContainerOptions {
            name: config.name.clone(),
            ..Default::default()
        });

        let created = self
            .client
            .create_container(options, container_config(config))
            .await
            .inspect_err(|e| error!(name = %config.name, error = %e, "container create failed"))?;
        info!(container_id = %created.id, "container created");

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .inspect_err(|e| error!(container_id = %created.id, error = %e, "container start failed"))?;
        info!(container_id = %created.id, name = %config.name, "container started");

        Ok(ExecutionResult::success(Action::Start, &created.id))
    }

    async fn stop(&self, container_id: &str) -> Result<ExecutionResult, RuntimeError> {
        info!(container_id, "stopping container");
        self.client
            .stop_container(container_id, None::<StopContainerOptions>)
            .await?;

        self.client
            .remove_container(container_id, Some(RemoveContainerOptions::default()))
            .await?;
        info!(container_id, "container stopped and removed");

        Ok(ExecutionResult::success(Action::Stop, container_id))
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, RuntimeError> {
        let response = match self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(ContainerStatus::Missing),
            Err(e) => return Err(e.into()),
        };

        let Some(state) = response.state else {
            return Ok(ContainerStatus::Other("unknown".to_string()));
        };

        let status = match state.status {
            Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
            Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited {
                exit_code: state.exit_code.unwrap_or_default(),
            },
            Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Dead,
            Some(other) => ContainerStatus::Other(other.to_string()),
            None => ContainerStatus::Other("unknown".to_string()),
        };
        Ok(status)
    }
}
