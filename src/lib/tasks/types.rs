use std::{collections::HashMap, fmt, time::SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Pending,
        State::Scheduled,
        State::Running,
        State::Completed,
        State::Failed,
    ];
}

/// Only `id` is required on the wire; everything else falls back to its
/// default. Unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub id: Uuid,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub disk: u64,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    #[serde(default)]
    pub port_bindings: HashMap<String, String>,
    #[serde(default)]
    pub restart_policy: String,
    #[serde(default)]
    pub start_time: Option<SystemTime>,
    #[serde(default)]
    pub finish_time: Option<SystemTime>,
}

impl Task {
    pub fn new(name: &str, image: &str) -> Self {
        Task {
            id: Uuid::new_v4(),
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        }
    }
}

/// A request to move a task to `state`. Queues carry these rather than live
/// tasks, so whoever processes one reconciles it against its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEvent {
    pub id: Uuid,
    pub state: State,
    #[serde(default)]
    pub timestamp: Option<SystemTime>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state,
            timestamp: Some(SystemTime::now()),
            task,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub name: String,
    pub exposed_ports: Vec<u16>,
    pub port_bindings: HashMap<String, String>,
    pub cmd: Vec<String>,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub restart_policy: String,
}

pub fn new_config(task: &Task) -> Config {
    Config {
        name: task.name.clone(),
        image: task.image.clone(),
        cpu: task.cpu,
        memory: i64::try_from(task.memory).unwrap_or(i64::MAX),
        disk: i64::try_from(task.disk).unwrap_or(i64::MAX),
        exposed_ports: task.exposed_ports.clone(),
        port_bindings: task.port_bindings.clone(),
        restart_policy: task.restart_policy.clone(),
        ..Default::default()
    }
}

/// The runtime operation a target state maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    pub fn for_state(state: State) -> Option<Self> {
        match state {
            State::Scheduled => Some(Action::Start),
            State::Completed => Some(Action::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => write!(f, "start"),
            Action::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub action: Action,
    pub container_id: String,
    pub result: String,
}

impl ExecutionResult {
    pub fn success(action: Action, container_id: &str) -> Self {
        ExecutionResult {
            action,
            container_id: container_id.to_string(),
            result: "success".to_string(),
        }
    }
}

/// Observed state of a container, as reported by `Runtime::inspect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Exited { exit_code: i64 },
    Dead,
    Missing,
    Other(String),
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("docker engine error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("{action} failed: {message}")]
    Execution { action: Action, message: String },
}
