#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use cube::{
    tasks::{
        runtime::Runtime,
        types::{Action, Config, ContainerStatus, ExecutionResult, RuntimeError, State, Task, TaskEvent},
    },
    worker::types::{TaskServer, Worker},
};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Runtime that records calls instead of talking to Docker.
#[derive(Default)]
pub struct StubRuntime {
    pub fail_run: bool,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Runtime for StubRuntime {
    async fn run(&self, config: &Config) -> Result<ExecutionResult, RuntimeError> {
        self.calls.lock().unwrap().push(format!("run {}", config.name));
        if self.fail_run {
            return Err(RuntimeError::Execution {
                action: Action::Start,
                message: "pull access denied".to_string(),
            });
        }
        Ok(ExecutionResult::success(Action::Start, &format!("container-{}", config.name)))
    }

    async fn stop(&self, container_id: &str) -> Result<ExecutionResult, RuntimeError> {
        self.calls.lock().unwrap().push(format!("stop {container_id}"));
        Ok(ExecutionResult::success(Action::Stop, container_id))
    }

    async fn inspect(&self, _container_id: &str) -> Result<ContainerStatus, RuntimeError> {
        Ok(ContainerStatus::Running)
    }
}

impl StubRuntime {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn stub_worker(name: &str) -> (Arc<Worker>, Arc<StubRuntime>) {
    let runtime = Arc::new(StubRuntime::default());
    (Arc::new(Worker::new(name, runtime.clone())), runtime)
}

pub fn scheduled(name: &str) -> TaskEvent {
    let task = Task {
        state: State::Scheduled,
        ..Task::new(name, "hello-world:latest")
    };
    TaskEvent::new(State::Scheduled, task)
}

/// Serves `router` on an ephemeral local port and returns its `host:port`.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr.to_string()
}

pub async fn serve_worker(worker: Arc<Worker>) -> String {
    serve(TaskServer::new(worker, "127.0.0.1", 0).router()).await
}

pub async fn request(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();

    let parsed = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, parsed)
}
