use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{Worker, WorkerError, WorkerResult};
use crate::tasks::{
    runtime::Runtime,
    state::valid_state_transition,
    types::{Action, ContainerStatus, ExecutionResult, State, Task, TaskEvent, new_config},
};

impl Worker {
    pub fn new(name: &str, runtime: Arc<dyn Runtime>) -> Self {
        Worker {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            db: RwLock::new(HashMap::new()),
            task_count: AtomicU64::new(0),
            stats: RwLock::new(None),
            runtime,
        }
    }

    pub async fn add_task(&self, event: TaskEvent) {
        self.queue.lock().await.push_back(event);
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn task_count(&self) -> u64 {
        self.task_count.load(Ordering::Relaxed)
    }

    /// Pops the next submission and drives it through the state machine.
    ///
    /// Returns `Ok(None)` when the queue is empty. A submission for a task
    /// this worker has never seen is checked against a `Pending` baseline
    /// built from its embedded snapshot; nothing is persisted unless the
    /// transition is valid.
    pub async fn run_task(&self) -> WorkerResult<Option<ExecutionResult>> {
        let Some(event) = self.queue.lock().await.pop_front() else {
            debug!(worker = %self.name, "no tasks in queue");
            return Ok(None);
        };

        let task_id = event.task.id;
        let persisted = self.db.read().await.get(&task_id).cloned();
        let persisted = persisted.unwrap_or_else(|| Task {
            state: State::Pending,
            ..event.task.clone()
        });

        if !valid_state_transition(persisted.state, event.state) {
            warn!(
                %task_id,
                from = ?persisted.state,
                to = ?event.state,
                "invalid state transition"
            );
            return Err(WorkerError::InvalidStateTransition {
                task_id,
                from: persisted.state,
                to: event.state,
            });
        }

        match Action::for_state(event.state) {
            Some(Action::Start) => self.start_task(event.task).await.map(Some),
            Some(Action::Stop) => self.stop_task(persisted).await.map(Some),
            None => {
                error!(%task_id, state = ?event.state, "no runtime action for target state");
                Err(WorkerError::UnexpectedState {
                    task_id,
                    state: event.state,
                })
            }
        }
    }

    async fn start_task(&self, mut task: Task) -> WorkerResult<ExecutionResult> {
        task.start_time = Some(SystemTime::now());
        task.finish_time = None;
        let config = new_config(&task);

        match self.runtime.run(&config).await {
            Ok(result) => {
                info!(task_id = %task.id, container_id = %result.container_id, "task started");
                task.state = State::Running;
                task.container_id = Some(result.container_id.clone());
                self.persist(task).await;
                Ok(result)
            }
            Err(source) => {
                error!(task_id = %task.id, error = %source, "error starting task");
                let task_id = task.id;
                task.state = State::Failed;
                self.persist(task).await;
                Err(WorkerError::Runtime {
                    task_id,
                    action: Action::Start,
                    source,
                })
            }
        }
    }

    async fn stop_task(&self, task: Task) -> WorkerResult<ExecutionResult> {
        let Some(container_id) = task.container_id.as_deref() else {
            return Err(WorkerError::MissingContainer(task.id));
        };

        let result = self
            .runtime
            .stop(container_id)
            .await
            .map_err(|source| WorkerError::Runtime {
                task_id: task.id,
                action: Action::Stop,
                source,
            })?;

        self.record_stopped(task.id).await?;
        info!(task_id = %task.id, %container_id, "stopped and removed task");

        Ok(result)
    }

    /// Marks a stopped task `Completed`. If the monitor already settled it
    /// while the container was being stopped, its verdict stands.
    async fn record_stopped(&self, task_id: Uuid) -> WorkerResult<()> {
        let stopped = self
            .update_task(task_id, State::Completed, |t| {
                t.finish_time = Some(SystemTime::now());
            })
            .await;

        match stopped {
            Ok(_) => Ok(()),
            Err(WorkerError::InvalidStateTransition { from, .. }) if from.is_terminal() => {
                debug!(%task_id, state = ?from, "task settled before stop completed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn persist(&self, task: Task) {
        if self.db.write().await.insert(task.id, task).is_none() {
            self.task_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Moves a persisted task to `to`, re-checking the transition against the
    /// record as it is now rather than as it was when the work began.
    async fn update_task(
        &self,
        task_id: Uuid,
        to: State,
        apply: impl FnOnce(&mut Task),
    ) -> WorkerResult<Task> {
        let mut db = self.db.write().await;
        let task = db
            .get_mut(&task_id)
            .ok_or(WorkerError::TaskNotFound(task_id))?;

        if !valid_state_transition(task.state, to) {
            return Err(WorkerError::InvalidStateTransition {
                task_id,
                from: task.state,
                to,
            });
        }

        task.state = to;
        apply(task);
        Ok(task.clone())
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.db.read().await.values().cloned().collect()
    }

    pub async fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.db.read().await.get(&task_id).cloned()
    }

    /// Queues a submission asking for `task_id` to be stopped.
    pub async fn request_stop(&self, task_id: Uuid) -> WorkerResult<TaskEvent> {
        let task = self
            .get_task(task_id)
            .await
            .ok_or(WorkerError::TaskNotFound(task_id))?;

        let event = TaskEvent::new(
            State::Completed,
            Task {
                state: State::Completed,
                ..task
            },
        );
        self.add_task(event.clone()).await;
        info!(
            %task_id,
            container_id = ?event.task.container_id,
            "queued task to stop"
        );
        Ok(event)
    }

    /// Folds the observed state of every running container back into the
    /// registry. Returns the number of tasks that changed state.
    pub async fn inspect_tasks(&self) -> usize {
        let running: Vec<(Uuid, String)> = self
            .db
            .read()
            .await
            .values()
            .filter(|t| t.state == State::Running)
            .filter_map(|t| t.container_id.clone().map(|c| (t.id, c)))
            .collect();

        let mut changed = 0;
        for (task_id, container_id) in running {
            let observed = match self.runtime.inspect(&container_id).await {
                Ok(ContainerStatus::Exited { exit_code: 0 }) => State::Completed,
                Ok(ContainerStatus::Exited { .. } | ContainerStatus::Dead | ContainerStatus::Missing) => {
                    State::Failed
                }
                Ok(ContainerStatus::Running | ContainerStatus::Other(_)) => continue,
                Err(e) => {
                    warn!(%task_id, %container_id, error = %e, "error inspecting container");
                    continue;
                }
            };

            match self
                .update_task(task_id, observed, |t| t.finish_time = Some(SystemTime::now()))
                .await
            {
                Ok(_) => {
                    info!(%task_id, %container_id, state = ?observed, "container no longer running");
                    changed += 1;
                }
                Err(e) => warn!(%task_id, error = %e, "could not record container state"),
            }
        }

        changed
    }
}

pub async fn run_tasks(worker: Arc<Worker>, idle: Duration) {
    loop {
        if worker.queue_len().await == 0 {
            debug!(worker = %worker.name, ?idle, "no tasks in queue, sleeping");
            tokio::time::sleep(idle).await;
            continue;
        }

        match worker.run_task().await {
            Ok(Some(result)) => {
                info!(action = %result.action, container_id = %result.container_id, "task processed");
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "error running task"),
        }
    }
}

pub async fn monitor_tasks(worker: Arc<Worker>, interval: Duration) {
    loop {
        debug!(worker = %worker.name, "checking status of tasks");
        let changed = worker.inspect_tasks().await;
        debug!(worker = %worker.name, changed, "task status check completed");
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::types::{Config, RuntimeError};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct StubRuntime {
        fail_run: bool,
        fail_stop: bool,
        status: Option<ContainerStatus>,
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Runtime for StubRuntime {
        async fn run(&self, config: &Config) -> Result<ExecutionResult, RuntimeError> {
            self.calls.lock().unwrap().push(format!("run {}", config.name));
            if self.fail_run {
                return Err(RuntimeError::Execution {
                    action: Action::Start,
                    message: "image not found".to_string(),
                });
            }
            Ok(ExecutionResult::success(Action::Start, &format!("c-{}", config.name)))
        }

        async fn stop(&self, container_id: &str) -> Result<ExecutionResult, RuntimeError> {
            self.calls.lock().unwrap().push(format!("stop {container_id}"));
            if self.fail_stop {
                return Err(RuntimeError::Execution {
                    action: Action::Stop,
                    message: "no such container".to_string(),
                });
            }
            Ok(ExecutionResult::success(Action::Stop, container_id))
        }

        async fn inspect(&self, _container_id: &str) -> Result<ContainerStatus, RuntimeError> {
            Ok(self.status.clone().unwrap_or(ContainerStatus::Running))
        }
    }

    impl StubRuntime {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn worker_with(runtime: StubRuntime) -> (Worker, Arc<StubRuntime>) {
        let runtime = Arc::new(runtime);
        (Worker::new("test", runtime.clone()), runtime)
    }

    fn scheduled(name: &str) -> TaskEvent {
        let mut task = Task::new(name, "hello-world:latest");
        task.state = State::Scheduled;
        TaskEvent::new(State::Scheduled, task)
    }

    #[tokio::test]
    async fn empty_queue_is_a_noop() {
        let (worker, runtime) = worker_with(StubRuntime::default());
        assert!(worker.run_task().await.unwrap().is_none());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn stop_after_monitor_settled_task_keeps_verdict() {
        let (worker, runtime) = worker_with(StubRuntime::default());
        let event = scheduled("web");
        let task_id = event.task.id;
        worker.add_task(event).await;
        worker.run_task().await.unwrap();
        let running = worker.get_task(task_id).await.unwrap();

        worker.db.write().await.get_mut(&task_id).unwrap().state = State::Failed;

        let result = worker.stop_task(running).await.unwrap();
        assert_eq!(result.action, Action::Stop);
        let task = worker.get_task(task_id).await.unwrap();
        assert_eq!(task.state, State::Failed);
        assert_eq!(task.finish_time, None);
        assert_eq!(runtime.calls(), vec!["run web", "stop c-web"]);
    }

    #[tokio::test]
    async fn start_then_stop_round_trip() {
        let (worker, runtime) = worker_with(StubRuntime::default());
        let event = scheduled("web");
        let task_id = event.task.id;

        worker.add_task(event).await;
        let started = worker.run_task().await.unwrap().unwrap();
        assert_eq!(started.action, Action::Start);

        let running = worker.get_task(task_id).await.unwrap();
        assert_eq!(running.state, State::Running);
        assert_eq!(running.container_id.as_deref(), Some("c-web"));

        worker.request_stop(task_id).await.unwrap();
        let stopped = worker.run_task().await.unwrap().unwrap();
        assert_eq!(stopped.action, Action::Stop);

        let done = worker.get_task(task_id).await.unwrap();
        assert_eq!(done.state, State::Completed);
        assert_eq!(done.container_id.as_deref(), Some("c-web"));
        assert!(done.start_time.is_some());
        assert!(done.finish_time.is_some());
        assert_eq!(runtime.calls(), vec!["run web", "stop c-web"]);
        assert_eq!(worker.task_count(), 1);
    }

    #[tokio::test]
    async fn run_failure_marks_task_failed() {
        let (worker, _) = worker_with(StubRuntime {
            fail_run: true,
            ..Default::default()
        });
        let event = scheduled("broken");
        let task_id = event.task.id;
        worker.add_task(event).await;

        let err = worker.run_task().await.unwrap_err();
        assert!(matches!(err, WorkerError::Runtime { action: Action::Start, .. }));
        assert_eq!(worker.get_task(task_id).await.unwrap().state, State::Failed);
    }

    #[tokio::test]
    async fn stop_failure_leaves_state_unchanged() {
        let (worker, _) = worker_with(StubRuntime {
            fail_stop: true,
            ..Default::default()
        });
        let event = scheduled("web");
        let task_id = event.task.id;
        worker.add_task(event).await;
        worker.run_task().await.unwrap();

        worker.request_stop(task_id).await.unwrap();
        let err = worker.run_task().await.unwrap_err();
        assert!(matches!(err, WorkerError::Runtime { action: Action::Stop, .. }));
        assert_eq!(worker.get_task(task_id).await.unwrap().state, State::Running);
    }

    #[tokio::test]
    async fn invalid_transition_skips_runtime_and_persists_nothing() {
        let (worker, runtime) = worker_with(StubRuntime::default());
        let task = Task::new("web", "nginx");
        let task_id = task.id;
        worker.add_task(TaskEvent::new(State::Running, task)).await;

        let err = worker.run_task().await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::InvalidStateTransition {
                from: State::Pending,
                to: State::Running,
                ..
            }
        ));
        assert!(worker.get_task(task_id).await.is_none());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn terminal_task_is_never_restarted() {
        let (worker, runtime) = worker_with(StubRuntime::default());
        let event = scheduled("web");
        let task_id = event.task.id;
        worker.add_task(event.clone()).await;
        worker.run_task().await.unwrap();
        worker.request_stop(task_id).await.unwrap();
        worker.run_task().await.unwrap();
        let before = worker.get_task(task_id).await.unwrap();

        worker.add_task(event).await;
        assert!(matches!(
            worker.run_task().await,
            Err(WorkerError::InvalidStateTransition { .. })
        ));
        assert_eq!(worker.get_task(task_id).await.unwrap(), before);
        assert_eq!(runtime.calls().len(), 2);
    }

    #[tokio::test]
    async fn replayed_start_is_rejected() {
        let (worker, runtime) = worker_with(StubRuntime::default());
        let event = scheduled("web");
        worker.add_task(event.clone()).await;
        worker.add_task(event).await;

        worker.run_task().await.unwrap();
        assert!(matches!(
            worker.run_task().await,
            Err(WorkerError::InvalidStateTransition {
                from: State::Running,
                to: State::Scheduled,
                ..
            })
        ));
        assert_eq!(runtime.calls(), vec!["run web"]);
    }

    #[tokio::test]
    async fn running_target_fails_loudly() {
        let (worker, runtime) = worker_with(StubRuntime::default());
        let event = scheduled("web");
        let mut task = event.task.clone();
        worker.add_task(event).await;
        worker.run_task().await.unwrap();

        task.state = State::Running;
        worker.add_task(TaskEvent::new(State::Running, task)).await;
        assert!(matches!(
            worker.run_task().await,
            Err(WorkerError::UnexpectedState {
                state: State::Running,
                ..
            })
        ));
        assert_eq!(runtime.calls().len(), 1);
    }

    #[tokio::test]
    async fn request_stop_for_unknown_task() {
        let (worker, _) = worker_with(StubRuntime::default());
        let id = Uuid::new_v4();
        assert!(matches!(
            worker.request_stop(id).await,
            Err(WorkerError::TaskNotFound(missing)) if missing == id
        ));
        assert_eq!(worker.queue_len().await, 0);
    }

    #[tokio::test]
    async fn query_is_stable_without_submissions() {
        let (worker, _) = worker_with(StubRuntime::default());
        for name in ["a", "b", "c"] {
            worker.add_task(scheduled(name)).await;
            worker.run_task().await.unwrap();
        }

        assert_eq!(worker.get_tasks().await, worker.get_tasks().await);
        assert_eq!(worker.get_tasks().await.len(), 3);
    }

    #[tokio::test]
    async fn inspect_folds_exited_containers() {
        let (worker, _) = worker_with(StubRuntime {
            status: Some(ContainerStatus::Exited { exit_code: 0 }),
            ..Default::default()
        });
        let event = scheduled("job");
        let task_id = event.task.id;
        worker.add_task(event).await;
        worker.run_task().await.unwrap();

        assert_eq!(worker.inspect_tasks().await, 1);
        let task = worker.get_task(task_id).await.unwrap();
        assert_eq!(task.state, State::Completed);
        assert!(task.finish_time.is_some());

        assert_eq!(worker.inspect_tasks().await, 0);
    }

    #[tokio::test]
    async fn inspect_marks_dead_containers_failed() {
        let (worker, _) = worker_with(StubRuntime {
            status: Some(ContainerStatus::Exited { exit_code: 137 }),
            ..Default::default()
        });
        let event = scheduled("job");
        let task_id = event.task.id;
        worker.add_task(event).await;
        worker.run_task().await.unwrap();

        worker.inspect_tasks().await;
        assert_eq!(worker.get_task(task_id).await.unwrap().state, State::Failed);
    }
}
