use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, atomic::AtomicU64},
};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::tasks::{
    runtime::Runtime,
    types::{Action, RuntimeError, State, Task, TaskEvent},
};

/// Execution-plane engine: a FIFO of submissions plus the registry of tasks
/// this worker owns. Each structure has its own lock so the HTTP handlers
/// never wait on a runtime call.
pub struct Worker {
    pub name: String,
    pub queue: Mutex<VecDeque<TaskEvent>>,
    pub db: RwLock<HashMap<Uuid, Task>>,
    pub task_count: AtomicU64,
    pub stats: RwLock<Option<SystemStats>>,
    pub runtime: Arc<dyn Runtime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemStats {
    pub cpu_usage: f32,
    pub total_memory: u64,
    pub used_memory: u64,
    pub total_swap: u64,
    pub used_swap: u64,
    pub system_name: String,
    pub hostname: String,
    pub total_cpus: u64,
    pub disk_usage: f32,
    pub task_count: u64,
}

pub struct TaskServer {
    pub worker: Arc<Worker>,
    pub address: String,
    pub port: u16,
}

/// Error body shared by the worker and manager HTTP surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub http_status_code: u16,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ErrorResponse {
            http_status_code: status.as_u16(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid state transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidStateTransition { task_id: Uuid, from: State, to: State },
    #[error("no runtime action for target state {state:?} of task {task_id}")]
    UnexpectedState { task_id: Uuid, state: State },
    #[error("task {0} has no container to stop")]
    MissingContainer(Uuid),
    #[error("task {0} not found")]
    TaskNotFound(Uuid),
    #[error("runtime {action} failed for task {task_id}: {source}")]
    Runtime {
        task_id: Uuid,
        action: Action,
        #[source]
        source: RuntimeError,
    },
}

pub type WorkerResult<T> = Result<T, WorkerError>;
