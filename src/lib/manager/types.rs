use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::scheduler::types::RoundRobin;
use crate::tasks::types::{State, Task, TaskEvent};

/// Control-plane state. The pending FIFO, the registries and the worker
/// assignments are each guarded separately; the dispatch loop, the
/// reconcile loop and the HTTP handlers all share one `Arc<Manager>`.
pub struct Manager {
    pub pending: Mutex<VecDeque<PendingEvent>>,
    pub task_db: RwLock<HashMap<Uuid, Task>>,
    pub event_db: RwLock<HashMap<Uuid, TaskEvent>>,
    pub workers: Vec<String>,
    pub assignments: Mutex<Assignments>,
    pub scheduler: Mutex<RoundRobin>,
    pub max_dispatch_attempts: u32,
    pub(crate) client: reqwest::Client,
}

/// A submission waiting to be dispatched, with the number of failed sends so far.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub event: TaskEvent,
    pub attempts: u32,
}

/// Worker to task placement, kept in both directions under one lock.
#[derive(Debug, Default)]
pub struct Assignments {
    pub worker_tasks: HashMap<String, Vec<Uuid>>,
    pub task_worker: HashMap<Uuid, String>,
}

pub struct ManagerServer {
    pub address: String,
    pub port: u16,
    pub manager: Arc<Manager>,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no workers are available to handle tasks")]
    NoWorkersAvailable,
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("cannot reach worker {worker}: {source}")]
    Transport {
        worker: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("worker {worker} responded {status}: {message}")]
    WorkerRejected {
        worker: String,
        status: u16,
        message: String,
    },
    #[error("cannot decode response from worker {worker}: {source}")]
    Decode {
        worker: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("worker {worker} reported task {task_id} that was never scheduled")]
    UnknownTask { worker: String, task_id: Uuid },
    #[error("task {0} not found")]
    TaskNotFound(Uuid),
    #[error("submissions must target {expected:?}, got {got:?}")]
    InvalidSubmission { expected: State, got: State },
}

pub type ManagerResult<T> = Result<T, ManagerError>;
