use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use futures_util::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{Assignments, Manager, ManagerError, ManagerResult, PendingEvent};
use crate::scheduler::{scheduler::Scheduler, types::RoundRobin};
use crate::tasks::{
    state::valid_state_transition,
    types::{State, Task, TaskEvent},
};
use crate::worker::types::ErrorResponse;

impl Manager {
    pub fn new(
        workers: Vec<String>,
        request_timeout: Duration,
        max_dispatch_attempts: u32,
    ) -> ManagerResult<Self> {
        if workers.is_empty() {
            return Err(ManagerError::NoWorkersAvailable);
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(ManagerError::HttpClient)?;

        let assignments = Assignments {
            worker_tasks: workers.iter().map(|w| (w.clone(), Vec::new())).collect(),
            task_worker: HashMap::new(),
        };

        Ok(Manager {
            pending: Mutex::new(VecDeque::new()),
            task_db: RwLock::new(HashMap::new()),
            event_db: RwLock::new(HashMap::new()),
            workers,
            assignments: Mutex::new(assignments),
            scheduler: Mutex::new(RoundRobin::default()),
            max_dispatch_attempts: max_dispatch_attempts.max(1),
            client,
        })
    }

    pub async fn add_task(&self, event: TaskEvent) {
        self.pending
            .lock()
            .await
            .push_back(PendingEvent { event, attempts: 0 });
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn select_worker(&self) -> ManagerResult<String> {
        self.scheduler
            .lock()
            .await
            .select_worker(&self.workers)
            .map(str::to_string)
            .ok_or(ManagerError::NoWorkersAvailable)
    }

    /// The worker a task already lives on, or a fresh round-robin pick.
    /// Retries and stop requests therefore reach the same worker as the
    /// original start.
    async fn assign_worker(&self, task_id: Uuid) -> ManagerResult<String> {
        let mut assignments = self.assignments.lock().await;
        if let Some(worker) = assignments.task_worker.get(&task_id) {
            return Ok(worker.clone());
        }

        let worker = self.select_worker().await?;
        assignments
            .worker_tasks
            .entry(worker.clone())
            .or_default()
            .push(task_id);
        assignments.task_worker.insert(task_id, worker.clone());
        Ok(worker)
    }

    pub async fn assigned_worker(&self, task_id: Uuid) -> Option<String> {
        self.assignments
            .lock()
            .await
            .task_worker
            .get(&task_id)
            .cloned()
    }

    /// Dispatches the oldest pending submission to its worker.
    ///
    /// Returns the task acknowledged by the worker, or `Ok(None)` if nothing
    /// was pending. Transport failures and 5xx responses requeue the
    /// submission until `max_dispatch_attempts` is spent; 4xx responses are
    /// final.
    pub async fn send_work(&self) -> ManagerResult<Option<Task>> {
        let Some(pending) = self.pending.lock().await.pop_front() else {
            debug!("no pending tasks to send");
            return Ok(None);
        };

        let event = pending.event.clone();
        let task_id = event.task.id;
        info!(%task_id, event_id = %event.id, attempt = pending.attempts + 1, "pulled task off pending queue");

        self.event_db.write().await.insert(event.id, event.clone());
        let worker = self.assign_worker(task_id).await?;

        if event.state != State::Completed {
            self.mark_scheduled(&event.task).await;
        }

        let url = format!("http://{worker}/tasks");
        let response = match self.client.post(&url).json(&event).send().await {
            Ok(response) => response,
            Err(source) => {
                error!(%url, error = %source, "error connecting to worker");
                self.retry_or_give_up(pending).await;
                return Err(ManagerError::Transport { worker, source });
            }
        };

        let status = response.status();
        if status.is_success() {
            let acked: Task = response
                .json()
                .await
                .map_err(|source| ManagerError::Decode {
                    worker: worker.clone(),
                    source,
                })?;
            info!(%task_id, %worker, state = ?acked.state, "worker accepted task");
            return Ok(Some(acked));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        error!(%task_id, %worker, status = status.as_u16(), %message, "worker rejected task");

        if status.is_server_error() {
            self.retry_or_give_up(pending).await;
        } else {
            self.give_up(&pending.event).await;
        }

        Err(ManagerError::WorkerRejected {
            worker,
            status: status.as_u16(),
            message,
        })
    }

    /// Records a start submission as `Scheduled`. An entry that reconcile has
    /// already moved past `Scheduled` is left alone.
    async fn mark_scheduled(&self, task: &Task) {
        let mut task_db = self.task_db.write().await;
        match task_db.get(&task.id) {
            Some(existing) if !valid_state_transition(existing.state, State::Scheduled) => {
                debug!(task_id = %task.id, state = ?existing.state, "keeping reconciled state on redispatch");
            }
            _ => {
                task_db.insert(
                    task.id,
                    Task {
                        state: State::Scheduled,
                        ..task.clone()
                    },
                );
            }
        }
    }

    async fn retry_or_give_up(&self, mut pending: PendingEvent) {
        pending.attempts += 1;
        if pending.attempts < self.max_dispatch_attempts {
            warn!(
                task_id = %pending.event.task.id,
                attempts = pending.attempts,
                "requeueing task"
            );
            self.pending.lock().await.push_back(pending);
        } else {
            error!(
                task_id = %pending.event.task.id,
                attempts = pending.attempts,
                "giving up on task after repeated dispatch failures"
            );
            self.give_up(&pending.event).await;
        }
    }

    /// A start that can never be delivered fails the task; a stop that can
    /// never be delivered leaves it as it is.
    async fn give_up(&self, event: &TaskEvent) {
        if event.state == State::Completed {
            return;
        }

        if let Some(task) = self.task_db.write().await.get_mut(&event.task.id) {
            if task.state == State::Scheduled {
                task.state = State::Failed;
            }
        }
    }

    async fn get_worker_tasks(&self, worker: &str) -> ManagerResult<Vec<Task>> {
        let url = format!("http://{worker}/tasks");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ManagerError::Transport {
                worker: worker.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ManagerError::WorkerRejected {
                worker: worker.to_string(),
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        response.json().await.map_err(|source| ManagerError::Decode {
            worker: worker.to_string(),
            source,
        })
    }

    /// Merges one worker's view of its tasks into the registry.
    ///
    /// The worker owns execution outcome (state, timestamps, container), the
    /// manager owns everything else. A task the manager never scheduled
    /// aborts the pass for this worker before anything is written.
    pub async fn update_worker_tasks(&self, worker: &str) -> ManagerResult<usize> {
        let reported = self.get_worker_tasks(worker).await?;

        let mut db = self.task_db.write().await;
        if let Some(unknown) = reported.iter().find(|t| !db.contains_key(&t.id)) {
            error!(%worker, task_id = %unknown.id, "worker reported a task that was never scheduled");
            return Err(ManagerError::UnknownTask {
                worker: worker.to_string(),
                task_id: unknown.id,
            });
        }

        for task in &reported {
            if let Some(local) = db.get_mut(&task.id) {
                if local.state != task.state {
                    info!(task_id = %task.id, from = ?local.state, to = ?task.state, "task state updated");
                }
                local.state = task.state;
                local.start_time = task.start_time;
                local.finish_time = task.finish_time;
                local.container_id = task.container_id.clone();
            }
        }

        Ok(reported.len())
    }

    /// One reconciliation pass over every worker. Workers are polled
    /// concurrently, so a slow one only costs its own request timeout.
    pub async fn update_tasks(&self) -> Vec<ManagerError> {
        let results = join_all(
            self.workers
                .iter()
                .map(|worker| self.update_worker_tasks(worker)),
        )
        .await;

        results.into_iter().filter_map(Result::err).collect()
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.task_db.read().await.values().cloned().collect()
    }

    pub async fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.task_db.read().await.get(&task_id).cloned()
    }

    /// Queues a submission asking for `task_id` to be stopped.
    pub async fn request_stop(&self, task_id: Uuid) -> ManagerResult<TaskEvent> {
        let task = self
            .get_task(task_id)
            .await
            .ok_or(ManagerError::TaskNotFound(task_id))?;

        let event = TaskEvent::new(
            State::Completed,
            Task {
                state: State::Completed,
                ..task
            },
        );
        self.add_task(event.clone()).await;
        info!(%task_id, event_id = %event.id, "added task event to stop the task");
        Ok(event)
    }
}

pub async fn process_tasks(manager: Arc<Manager>, interval: Duration) {
    loop {
        debug!("processing tasks in the queue");
        if let Err(e) = manager.send_work().await {
            error!(error = %e, "error sending work");
        }
        tokio::time::sleep(interval).await;
    }
}

pub async fn reconcile_tasks(manager: Arc<Manager>, interval: Duration) {
    loop {
        debug!("checking for task updates from workers");
        for e in manager.update_tasks().await {
            error!(error = %e, "task update failed");
        }
        debug!("task updates completed");
        tokio::time::sleep(interval).await;
    }
}
